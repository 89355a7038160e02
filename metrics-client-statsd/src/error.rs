use std::{fmt, io, sync::Arc};

use thiserror::Error;

/// Errors that could occur while building a StatsD client, or installing it as the global recorder.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The network is not one of the supported transports.
    #[error("invalid network '{network}' (expected one of: udp, udp4, udp6, tcp, tcp4, tcp6, unix, unixgram)")]
    InvalidNetwork {
        /// The network that was given.
        network: String,
    },

    /// The remote address could not be resolved to any usable address.
    #[error("invalid remote address '{address}': {reason}")]
    InvalidAddress {
        /// The address that was given.
        address: String,

        /// Details about the resolution failure.
        reason: String,
    },

    /// The initial connection to the remote address could not be established.
    #[error("failed to connect to '{address}'")]
    Dial {
        /// The address that was dialed.
        address: String,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to spawn the background flush thread.
    #[error("failed to spawn background flush thread")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install client as global recorder")]
    FailedToInstall,
}

/// Runtime errors reported to the error handler.
///
/// None of these are ever returned to the code emitting metrics: they are handed to the configured
/// [`ErrorHandler`], if any, and otherwise dropped.
#[derive(Debug, Error)]
pub enum Error {
    /// A single encoded metric was larger than the maximum packet size, and was dropped.
    #[error("metric of {len} bytes exceeds maximum packet size of {max_packet_size} bytes")]
    PacketTooLarge {
        /// Length of the encoded metric.
        len: usize,

        /// Configured maximum packet size.
        max_packet_size: usize,
    },

    /// Formatting the bucket of a templated metric failed, and the metric was dropped.
    #[error("failed to format metric bucket")]
    Format(#[source] fmt::Error),

    /// Writing a packet to the remote address failed, and the packet was dropped.
    #[error("failed to write packet")]
    Write(#[source] io::Error),

    /// Reconnecting to the remote address failed, and the packet was dropped.
    #[error("failed to reconnect to '{address}'")]
    Dial {
        /// The address that was dialed.
        address: String,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The client was closed, and the metric or packet was dropped.
    #[error("client is closed")]
    Closed,
}

/// Callback invoked for every non-fatal error.
///
/// Handlers are called synchronously on the thread where the failure happened, which can be the thread emitting a
/// metric or the background flush thread. Handlers must not block for long.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Hands `error` to `handler`, or drops it if no handler is configured.
pub(crate) fn report(handler: Option<&ErrorHandler>, error: Error) {
    if let Some(handler) = handler {
        handler(&error);
    }
}
