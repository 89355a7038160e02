//! A batching client for sending metrics to a [StatsD][statsd]-compatible server.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! ```no_run
//! # use std::time::{Duration, Instant};
//! # use metrics::Label;
//! # use metrics_client_statsd::{Client, ClientBuilder};
//! // The simplest way to get a client is with the default options.
//! let client = Client::new("udp", "127.0.0.1:8125").expect("failed to build client");
//!
//! // The builder can configure the packet size, flush period, prefix, error handler, and so on.
//! let client = ClientBuilder::default()
//!     .with_prefix("app.")
//!     .with_flush_period(Duration::from_millis(250))
//!     .with_error_handler(|e| eprintln!("failed to send metrics: {e}"))
//!     .build("tcp", "127.0.0.1:8125")
//!     .expect("failed to build client");
//!
//! // Emitting metrics never blocks on the network beyond the configured timeout, and never fails.
//! let start = Instant::now();
//! client.increment("requests", &[Label::new("route", "/")]);
//! client.gauge("connections", 42, &[]);
//! client.timing("request_time", start, &[]);
//!
//! // Closing flushes anything still pending.
//! client.close();
//! ```
//!
//! The client can also be installed as the global [`metrics`] recorder, see [`ClientBuilder::install`] and
//! [`StatsdRecorder`].
//!
//! # Wire format
//!
//! Each metric is sent as a single line: `<prefix><bucket>[,<tag>=<value>...]:<value>|<type>`, where the type is `c`
//! for counters, `g` for gauges, and `ms` for timings. Lines are newline terminated, and batched into packets no larger
//! than the configured maximum packet size.
//!
//! # Batching
//!
//! Metrics are appended to a packet buffer, which is sent as soon as the next metric would not fit in it, or when the
//! flush period elapses, whichever comes first. A single metric is never split across two packets: a metric larger
//! than the maximum packet size is dropped.
//!
//! # Errors
//!
//! Only building the client can fail. Once built, failures such as oversized metrics or failed writes are handed to the
//! error handler if one was configured, and are otherwise dropped. Failed packets are not retried, and the connection
//! is re-established lazily on the next write.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod batcher;

mod builder;
pub use self::builder::ClientBuilder;

mod client;
pub use self::client::Client;

mod encoder;
pub use self::encoder::{encode, encode_fmt, MetricKind, MetricValue};

mod error;
pub use self::error::{BuildError, Error, ErrorHandler};

mod pool;

mod recorder;
pub use self::recorder::StatsdRecorder;

mod stats;
pub use self::stats::ClientStats;

mod transport;
pub use self::transport::Network;
