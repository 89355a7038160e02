use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of client statistics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClientStats {
    /// Number of packets successfully written to the transport.
    pub packets_sent: u64,

    /// Number of packets dropped due to write or reconnect failures.
    pub packets_dropped: u64,

    /// Number of bytes successfully written to the transport.
    pub bytes_sent: u64,

    /// Number of bytes dropped due to write or reconnect failures.
    pub bytes_dropped: u64,

    /// Number of metrics dropped before reaching a packet, because they exceeded the maximum packet size, their bucket
    /// could not be formatted, or the client was closed.
    pub fragments_dropped: u64,
}

/// Shared counters backing [`ClientStats`].
#[derive(Default)]
pub(crate) struct Stats {
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_dropped: AtomicU64,
    fragments_dropped: AtomicU64,
}

impl Stats {
    /// Tracks a successful packet send.
    pub fn track_packet_send_succeeded(&self, bytes_len: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_len as u64, Ordering::Relaxed);
    }

    /// Tracks a failed packet send.
    pub fn track_packet_send_failed(&self, bytes_len: usize) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
        self.bytes_dropped.fetch_add(bytes_len as u64, Ordering::Relaxed);
    }

    /// Tracks a fragment that was dropped before being added to a packet.
    pub fn track_fragment_dropped(&self) {
        self.fragments_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientStats {
        ClientStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_dropped: self.bytes_dropped.load(Ordering::Relaxed),
            fragments_dropped: self.fragments_dropped.load(Ordering::Relaxed),
        }
    }
}
