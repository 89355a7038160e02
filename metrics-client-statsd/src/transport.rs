use std::{
    fmt,
    io::{self, Write as _},
    net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs as _, UdpSocket},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

#[cfg(unix)]
use std::{
    os::unix::net::{UnixDatagram, UnixStream},
    path::PathBuf,
};

use tracing::{debug, trace};

use crate::error::{BuildError, Error};

/// Network transport used to reach the remote server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    /// UDP, over IPv4 or IPv6.
    Udp,

    /// UDP, over IPv4 only.
    Udp4,

    /// UDP, over IPv6 only.
    Udp6,

    /// TCP, over IPv4 or IPv6.
    Tcp,

    /// TCP, over IPv4 only.
    Tcp4,

    /// TCP, over IPv6 only.
    Tcp6,

    /// Unix domain socket in stream (`SOCK_STREAM`) mode.
    #[cfg(unix)]
    Unix,

    /// Unix domain socket in datagram (`SOCK_DGRAM`) mode.
    #[cfg(unix)]
    Unixgram,
}

impl Network {
    /// Returns the name of the network, as accepted by [`FromStr`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            #[cfg(unix)]
            Network::Unix => "unix",
            #[cfg(unix)]
            Network::Unixgram => "unixgram",
        }
    }

    /// Returns `true` if the network is stream-oriented.
    pub const fn is_stream(self) -> bool {
        match self {
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => true,
            #[cfg(unix)]
            Network::Unix => true,
            _ => false,
        }
    }

    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Network::Udp4 | Network::Tcp4 => addr.is_ipv4(),
            Network::Udp6 | Network::Tcp6 => addr.is_ipv6(),
            _ => true,
        }
    }
}

impl FromStr for Network {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            #[cfg(unix)]
            "unix" => Ok(Network::Unix),
            #[cfg(unix)]
            "unixgram" => Ok(Network::Unixgram),
            _ => Err(BuildError::InvalidNetwork { network: s.to_string() }),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves an `<host>:<port>` address into socket addresses.
pub(crate) type Resolver = Arc<dyn Fn(&str) -> io::Result<Vec<SocketAddr>> + Send + Sync>;

/// Returns a resolver backed by the system's name resolution.
pub(crate) fn system_resolver() -> Resolver {
    Arc::new(resolve_with_system)
}

fn resolve_with_system(address: &str) -> io::Result<Vec<SocketAddr>> {
    Ok(address.to_socket_addrs()?.collect())
}

fn resolve_inet(resolver: &Resolver, network: Network, address: &str) -> io::Result<Vec<SocketAddr>> {
    let addrs = resolver(address)?.into_iter().filter(|addr| network.accepts(addr)).collect::<Vec<_>>();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no addresses usable with network '{network}'"),
        ));
    }

    Ok(addrs)
}

#[derive(Clone, Debug)]
pub(crate) enum RemoteAddr {
    // Host and port, resolved again on every dial.
    Inet(String),

    #[cfg(unix)]
    Path(PathBuf),
}

impl RemoteAddr {
    /// Validates `address` for use with `network`.
    ///
    /// Inet addresses are resolved once here so that bad addresses are caught up front, but only the address itself is
    /// kept: every connection attempt resolves it again.
    pub fn resolve(network: Network, address: &str, resolver: &Resolver) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidAddress { address: address.to_string(), reason };

        #[cfg(unix)]
        if matches!(network, Network::Unix | Network::Unixgram) {
            if address.is_empty() {
                return Err(invalid("socket path is empty".to_string()));
            }
            return Ok(RemoteAddr::Path(PathBuf::from(address)));
        }

        resolve_inet(resolver, network, address).map_err(|e| invalid(e.to_string()))?;

        Ok(RemoteAddr::Inet(address.to_string()))
    }
}

/// Transport configuration.
pub(crate) struct TransportConfiguration {
    pub network: Network,
    pub address: String,
    pub remote_addr: RemoteAddr,
    pub resolver: Resolver,
    pub timeout: Duration,
}

enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),

    #[cfg(unix)]
    Unixgram(UnixDatagram),

    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    fn dial(config: &TransportConfiguration) -> io::Result<Self> {
        match &config.remote_addr {
            RemoteAddr::Inet(address) => {
                let addrs = resolve_inet(&config.resolver, config.network, address)?;

                let mut last_err = None;
                for addr in &addrs {
                    let result = if config.network.is_stream() {
                        dial_tcp(addr, config.timeout).map(Connection::Tcp)
                    } else {
                        dial_udp(addr, config.timeout).map(Connection::Udp)
                    };

                    match result {
                        Ok(conn) => return Ok(conn),
                        Err(e) => {
                            trace!(%addr, error = %e, "Failed to dial address.");
                            last_err = Some(e);
                        }
                    }
                }

                Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no remote addresses")))
            }

            #[cfg(unix)]
            RemoteAddr::Path(path) => {
                if config.network.is_stream() {
                    let socket = UnixStream::connect(path)?;
                    socket.set_write_timeout(Some(config.timeout))?;
                    Ok(Connection::Unix(socket))
                } else {
                    let socket = UnixDatagram::unbound()?;
                    socket.connect(path)?;
                    socket.set_write_timeout(Some(config.timeout))?;
                    Ok(Connection::Unixgram(socket))
                }
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Connection::Udp(socket) => socket.send(buf).map(|_| ()),
            Connection::Tcp(socket) => socket.write_all(buf),

            #[cfg(unix)]
            Connection::Unixgram(socket) => socket.send(buf).map(|_| ()),

            #[cfg(unix)]
            Connection::Unix(socket) => socket.write_all(buf),
        }
    }

    fn shutdown(self) {
        // Datagram sockets have nothing to shut down, and a peer that already hung up is not worth reporting.
        match self {
            Connection::Tcp(socket) => {
                let _ = socket.shutdown(Shutdown::Both);
            }

            #[cfg(unix)]
            Connection::Unix(socket) => {
                let _ = socket.shutdown(Shutdown::Both);
            }

            _ => {}
        }
    }
}

fn dial_udp(addr: &SocketAddr, timeout: Duration) -> io::Result<UdpSocket> {
    let socket = if addr.is_ipv4() {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
    } else {
        UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
    };
    socket.connect(addr)?;
    socket.set_write_timeout(Some(timeout))?;
    Ok(socket)
}

fn dial_tcp(addr: &SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = TcpStream::connect_timeout(addr, timeout)?;
    socket.set_write_timeout(Some(timeout))?;
    socket.set_nodelay(true)?;
    Ok(socket)
}

enum ConnectionState {
    // Intermediate state while a dial or write is in progress.
    Connecting,

    // Not connected, the next write will attempt to reconnect.
    Disconnected,

    // Connected and ready to write packets.
    Connected(Connection),

    // Closed for good, all writes fail.
    Closed,
}

/// Writes finished packets to the remote server.
pub(crate) trait Transport: Send {
    /// Writes a single packet.
    ///
    /// # Errors
    ///
    /// If the packet could not be written, or a connection could not be established to write it, an error is returned.
    /// The packet is not retried.
    fn write(&mut self, packet: &[u8]) -> Result<(), Error>;

    /// Closes the transport. Subsequent writes fail with [`Error::Closed`].
    fn close(&mut self);
}

/// Owns the socket to the remote server.
///
/// The connector dials once when created, and after a failed write, lazily redials on the next write. Each write makes
/// at most one connection attempt.
pub(crate) struct Connector {
    config: TransportConfiguration,
    state: ConnectionState,
}

impl Connector {
    /// Creates a connected `Connector`.
    ///
    /// # Errors
    ///
    /// If the initial connection cannot be established, an error is returned.
    pub fn dial(config: TransportConfiguration) -> Result<Self, BuildError> {
        debug!(network = %config.network, address = %config.address, "Dialing remote server.");

        let conn = Connection::dial(&config)
            .map_err(|source| BuildError::Dial { address: config.address.clone(), source })?;

        Ok(Self { config, state: ConnectionState::Connected(conn) })
    }
}

impl Transport for Connector {
    fn write(&mut self, packet: &[u8]) -> Result<(), Error> {
        loop {
            let old_state = std::mem::replace(&mut self.state, ConnectionState::Connecting);
            match old_state {
                ConnectionState::Connecting => unreachable!("transitioned _from_ connecting state"),
                ConnectionState::Closed => {
                    self.state = ConnectionState::Closed;
                    return Err(Error::Closed);
                }
                ConnectionState::Disconnected => match Connection::dial(&self.config) {
                    Ok(conn) => {
                        debug!(address = %self.config.address, "Reconnected to remote server.");
                        self.state = ConnectionState::Connected(conn);
                    }
                    Err(source) => {
                        self.state = ConnectionState::Disconnected;
                        return Err(Error::Dial { address: self.config.address.clone(), source });
                    }
                },
                ConnectionState::Connected(mut conn) => {
                    return match conn.send(packet) {
                        Ok(()) => {
                            self.state = ConnectionState::Connected(conn);
                            Ok(())
                        }
                        Err(e) => {
                            conn.shutdown();
                            self.state = ConnectionState::Disconnected;
                            Err(Error::Write(e))
                        }
                    };
                }
            }
        }
    }

    fn close(&mut self) {
        if let ConnectionState::Connected(conn) = std::mem::replace(&mut self.state, ConnectionState::Closed) {
            conn.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Read as _},
        net::{SocketAddr, TcpListener, UdpSocket},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::{
        resolve_inet, system_resolver, ConnectionState, Connector, Network, RemoteAddr, Resolver, Transport as _,
        TransportConfiguration,
    };
    use crate::error::{BuildError, Error};

    fn config_with_resolver(network: Network, address: &str, resolver: Resolver) -> TransportConfiguration {
        TransportConfiguration {
            network,
            address: address.to_string(),
            remote_addr: RemoteAddr::resolve(network, address, &resolver).unwrap(),
            resolver,
            timeout: Duration::from_secs(1),
        }
    }

    fn config(network: Network, address: &str) -> TransportConfiguration {
        config_with_resolver(network, address, system_resolver())
    }

    #[test]
    fn parse_network() {
        let cases = [
            ("udp", Network::Udp),
            ("udp4", Network::Udp4),
            ("udp6", Network::Udp6),
            ("tcp", Network::Tcp),
            ("tcp4", Network::Tcp4),
            ("tcp6", Network::Tcp6),
        ];
        for (input, expected) in cases {
            let network = input.parse::<Network>().unwrap();
            assert_eq!(network, expected);
            assert_eq!(network.as_str(), input);
        }

        #[cfg(unix)]
        {
            assert_eq!("unix".parse::<Network>().unwrap(), Network::Unix);
            assert_eq!("unixgram".parse::<Network>().unwrap(), Network::Unixgram);
        }

        for input in ["", "UDP", "http", "ip", "udp5"] {
            match input.parse::<Network>() {
                Err(BuildError::InvalidNetwork { network }) => assert_eq!(network, input),
                other => panic!("expected invalid network for '{input}', got {other:?}"),
            }
        }
    }

    #[test]
    fn resolve_filters_by_family() {
        let resolver = system_resolver();
        let expected: SocketAddr = "127.0.0.1:8125".parse().unwrap();
        assert_eq!(resolve_inet(&resolver, Network::Udp4, "127.0.0.1:8125").unwrap(), vec![expected]);

        match RemoteAddr::resolve(Network::Udp4, "127.0.0.1:8125", &resolver).unwrap() {
            RemoteAddr::Inet(address) => assert_eq!(address, "127.0.0.1:8125"),
            #[cfg(unix)]
            RemoteAddr::Path(_) => panic!("expected inet address"),
        }

        assert!(matches!(
            RemoteAddr::resolve(Network::Tcp6, "127.0.0.1:8125", &resolver),
            Err(BuildError::InvalidAddress { .. })
        ));
        assert!(matches!(
            RemoteAddr::resolve(Network::Udp, "no port here", &resolver),
            Err(BuildError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn reconnect_resolves_address_again() {
        let old = TcpListener::bind("127.0.0.1:0").unwrap();
        let new = TcpListener::bind("127.0.0.1:0").unwrap();
        let old_addr = old.local_addr().unwrap();
        let new_addr = new.local_addr().unwrap();

        // Validation at construction and the initial dial see the old address, later lookups see the new one.
        let lookups = Arc::new(AtomicUsize::new(0));
        let lookups2 = Arc::clone(&lookups);
        let resolver: Resolver = Arc::new(move |address: &str| -> io::Result<Vec<SocketAddr>> {
            assert_eq!(address, "statsd.internal:8125");
            let n = lookups2.fetch_add(1, Ordering::SeqCst);
            Ok(vec![if n < 2 { old_addr } else { new_addr }])
        });

        let config = config_with_resolver(Network::Tcp, "statsd.internal:8125", resolver);
        let mut connector = Connector::dial(config).unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
        let _first = old.accept().unwrap();

        connector.state = ConnectionState::Disconnected;
        connector.write(b"a:1|c\n").unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 3);

        let (mut second, _) = new.accept().unwrap();
        let mut buf = [0u8; 6];
        second.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"a:1|c\n");
    }

    #[test]
    fn failed_lookup_on_reconnect_is_a_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let lookups = Arc::new(AtomicUsize::new(0));
        let lookups2 = Arc::clone(&lookups);
        let resolver: Resolver = Arc::new(move |_: &str| -> io::Result<Vec<SocketAddr>> {
            if lookups2.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(vec![addr])
            } else {
                Err(io::Error::new(io::ErrorKind::NotFound, "no such host"))
            }
        });

        let config = config_with_resolver(Network::Tcp, "statsd.internal:8125", resolver);
        let mut connector = Connector::dial(config).unwrap();

        connector.state = ConnectionState::Disconnected;
        match connector.write(b"a:1|c\n") {
            Err(Error::Dial { address, source }) => {
                assert_eq!(address, "statsd.internal:8125");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected dial error, got {other:?}"),
        }
        assert!(matches!(connector.state, ConnectionState::Disconnected));
    }

    #[test]
    fn udp_write() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let addr = server.local_addr().unwrap().to_string();

        let mut connector = Connector::dial(config(Network::Udp, &addr)).unwrap();
        connector.write(b"hits:1|c\n").unwrap();

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hits:1|c\n");
    }

    #[test]
    fn tcp_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        match Connector::dial(config(Network::Tcp, &addr)) {
            Err(BuildError::Dial { address, .. }) => assert_eq!(address, addr),
            Err(e) => panic!("unexpected error: {e:?}"),
            Ok(_) => panic!("expected dial failure"),
        }
    }

    #[test]
    fn tcp_reconnects_lazily() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut connector = Connector::dial(config(Network::Tcp, &addr)).unwrap();
        let (mut first, _) = listener.accept().unwrap();
        connector.write(b"a:1|c\n").unwrap();

        let mut buf = [0u8; 6];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"a:1|c\n");

        // Simulate a torn down connection: the next write dials again before writing.
        connector.state = ConnectionState::Disconnected;
        connector.write(b"b:2|c\n").unwrap();

        let (mut second, _) = listener.accept().unwrap();
        second.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"b:2|c\n");
    }

    #[test]
    fn failed_reconnect_stays_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut connector = Connector::dial(config(Network::Tcp, &addr)).unwrap();
        drop(listener);

        connector.state = ConnectionState::Disconnected;
        assert!(matches!(connector.write(b"a:1|c\n"), Err(Error::Dial { .. })));
        assert!(matches!(connector.state, ConnectionState::Disconnected));

        // Every write makes exactly one new attempt.
        assert!(matches!(connector.write(b"a:1|c\n"), Err(Error::Dial { .. })));
        assert!(matches!(connector.state, ConnectionState::Disconnected));
    }

    #[test]
    fn closed_connector_rejects_writes() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap().to_string();

        let mut connector = Connector::dial(config(Network::Udp, &addr)).unwrap();
        connector.close();
        assert!(matches!(connector.write(b"a:1|c\n"), Err(Error::Closed)));

        // Closing again is a no-op.
        connector.close();
        assert!(matches!(connector.state, ConnectionState::Closed));
    }

    #[cfg(unix)]
    #[test]
    fn unixgram_write() {
        use std::os::unix::net::UnixDatagram;

        let dir = std::env::temp_dir().join(format!("metrics-client-statsd-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("unixgram.sock");
        let _ = std::fs::remove_file(&path);

        let server = UnixDatagram::bind(&path).unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut connector = Connector::dial(config(Network::Unixgram, path.to_str().unwrap())).unwrap();
        connector.write(b"hits:1|c\n").unwrap();

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hits:1|c\n");

        let _ = std::fs::remove_file(&path);
    }
}
