use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    batcher::{Batcher, FlushTimer},
    client::Client,
    error::{BuildError, Error, ErrorHandler},
    pool::BufferPool,
    recorder::StatsdRecorder,
    stats::Stats,
    transport::{system_resolver, Connector, Network, RemoteAddr, TransportConfiguration},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_millis(100);
const DEFAULT_MAX_PACKET_SIZE: usize = 1400;

/// Resolved client settings.
///
/// Immutable once the client is constructed.
struct ClientConfiguration {
    transport: TransportConfiguration,
    flush_period: Duration,
    max_packet_size: usize,
    prefix: String,
    error_handler: Option<ErrorHandler>,
}

/// Builder for a StatsD client.
pub struct ClientBuilder {
    timeout: Duration,
    flush_period: Duration,
    max_packet_size: usize,
    prefix: String,
    error_handler: Option<ErrorHandler>,
}

impl ClientBuilder {
    /// Set the timeout for connecting to, and writing to, the remote server.
    ///
    /// When the timeout is reached, the operation is aborted and the packet being sent at the time is dropped without
    /// retrying. A zero timeout is replaced with the default.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the flush period.
    ///
    /// Pending metrics are sent at least this often, even when the current packet is not full. A zero period is replaced
    /// with the default.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_flush_period(mut self, flush_period: Duration) -> Self {
        self.flush_period = flush_period;
        self
    }

    /// Set the maximum packet size.
    ///
    /// This controls the maximum size of a single write to the remote server. As packets are being built, they will be
    /// limited to this size. A single metric that exceeds this size by itself is dropped. A size of zero is replaced
    /// with the default.
    ///
    /// The default fits within a typical Ethernet MTU once IP and UDP headers are accounted for.
    ///
    /// Defaults to 1400 bytes.
    #[must_use]
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Set the prefix prepended to every bucket.
    ///
    /// The prefix is prepended as-is, so any separator must be part of the prefix itself: a prefix of `app.` and a
    /// bucket of `requests` are sent as `app.requests`.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<S>(mut self, prefix: S) -> Self
    where
        S: Into<String>,
    {
        self.prefix = prefix.into();
        self
    }

    /// Set the error handler.
    ///
    /// The handler is called for every error that happens after the client is built, such as metrics too large to fit
    /// in a packet, templated buckets that fail to format, or failed writes and reconnects. It is called synchronously,
    /// either on the thread emitting a metric or on the background flush thread.
    ///
    /// Defaults to discarding errors.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    fn into_configuration(self, network: &str, address: &str) -> Result<ClientConfiguration, BuildError> {
        let network = network.parse::<Network>()?;
        let resolver = system_resolver();
        let remote_addr = RemoteAddr::resolve(network, address, &resolver)?;

        let timeout = if self.timeout.is_zero() { DEFAULT_TIMEOUT } else { self.timeout };
        let flush_period = if self.flush_period.is_zero() { DEFAULT_FLUSH_PERIOD } else { self.flush_period };
        let max_packet_size = if self.max_packet_size == 0 { DEFAULT_MAX_PACKET_SIZE } else { self.max_packet_size };

        Ok(ClientConfiguration {
            transport: TransportConfiguration {
                network,
                address: address.to_string(),
                remote_addr,
                resolver,
                timeout,
            },
            flush_period,
            max_packet_size,
            prefix: self.prefix,
            error_handler: self.error_handler,
        })
    }

    /// Builds the client.
    ///
    /// The connection to the remote server is established, and the background flush thread is spawned.
    ///
    /// See [`Client::new`] for the accepted networks and address formats.
    ///
    /// # Errors
    ///
    /// If the network is not supported, the address cannot be resolved, the remote server cannot be reached, or the
    /// background flush thread cannot be spawned, an error is returned.
    pub fn build<N, A>(self, network: N, address: A) -> Result<Client, BuildError>
    where
        N: AsRef<str>,
        A: AsRef<str>,
    {
        let config = self.into_configuration(network.as_ref(), address.as_ref())?;
        let network = config.transport.network;
        let connector = Connector::dial(config.transport)?;

        let pool = Arc::new(BufferPool::new());
        let stats = Arc::new(Stats::default());
        let batcher = Arc::new(Batcher::new(
            Box::new(connector),
            Arc::clone(&pool),
            config.max_packet_size,
            config.error_handler,
            Arc::clone(&stats),
        ));

        let timer =
            FlushTimer::spawn(Arc::clone(&batcher), config.flush_period).map_err(|_| BuildError::Backend)?;

        debug!(
            %network,
            max_packet_size = config.max_packet_size,
            flush_period = ?config.flush_period,
            "Built StatsD client."
        );

        Ok(Client::from_parts(batcher, timer, pool, config.prefix, stats))
    }

    /// Builds the client and installs it as the global recorder.
    ///
    /// # Errors
    ///
    /// If the client cannot be built, or if a global recorder is already installed, an error is returned.
    pub fn install<N, A>(self, network: N, address: A) -> Result<(), BuildError>
    where
        N: AsRef<str>,
        A: AsRef<str>,
    {
        let recorder = StatsdRecorder::new(self.build(network, address)?);

        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder {
            timeout: DEFAULT_TIMEOUT,
            flush_period: DEFAULT_FLUSH_PERIOD,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            prefix: String::new(),
            error_handler: None,
        }
    }
}
