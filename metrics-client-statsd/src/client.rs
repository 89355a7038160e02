use std::{
    fmt,
    sync::Arc,
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use metrics::Label;
use parking_lot::Mutex;

use crate::{
    batcher::{Batcher, FlushTimer},
    builder::ClientBuilder,
    encoder::{encode, encode_fmt, MetricKind, MetricValue},
    error::{BuildError, Error},
    pool::BufferPool,
    stats::{ClientStats, Stats},
};

// Initial capacity of the scratch buffer each metric is encoded into.
const SCRATCH_CAPACITY: usize = 128;

struct Inner {
    batcher: Arc<Batcher>,
    timer: Mutex<Option<FlushTimer>>,
    flush_thread: ThreadId,
    pool: Arc<BufferPool>,
    prefix: String,
    stats: Arc<Stats>,
}

impl Inner {
    fn close(&self) {
        // The lock stays held until the flush thread exits. On the flush thread itself, a held lock means another
        // caller is already stopping it.
        let slot = if thread::current().id() == self.flush_thread {
            self.timer.try_lock()
        } else {
            Some(self.timer.lock())
        };

        if let Some(mut slot) = slot {
            if let Some(timer) = slot.take() {
                timer.stop();
            }
        }

        self.batcher.close();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

/// A StatsD client.
///
/// All emission methods are fire-and-forget: metrics are encoded, appended to the current packet, and sent when the
/// packet fills up or the flush period elapses. Failures never surface to the caller, and are instead handed to the
/// error handler configured on [`ClientBuilder`].
///
/// Clients are cheap to clone, and all clones share the same packet buffer and connection. The client is closed when
/// [`Client::close`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a new `Client` with the default options.
    ///
    /// `network` must be one of `udp`, `udp4`, `udp6`, `tcp`, `tcp4`, `tcp6`, or on Unix platforms, `unix` or
    /// `unixgram`. For IP networks, `address` is in the form `<host>:<port>`, and for Unix domain sockets, it is the
    /// path to the socket.
    ///
    /// # Errors
    ///
    /// If the network is not supported, the address cannot be resolved, the remote server cannot be reached, or the
    /// background flush thread cannot be spawned, an error is returned.
    pub fn new<N, A>(network: N, address: A) -> Result<Self, BuildError>
    where
        N: AsRef<str>,
        A: AsRef<str>,
    {
        ClientBuilder::default().build(network, address)
    }

    pub(crate) fn from_parts(
        batcher: Arc<Batcher>,
        timer: FlushTimer,
        pool: Arc<BufferPool>,
        prefix: String,
        stats: Arc<Stats>,
    ) -> Self {
        let flush_thread = timer.thread_id();
        Self {
            inner: Arc::new(Inner { batcher, timer: Mutex::new(Some(timer)), flush_thread, pool, prefix, stats }),
        }
    }

    /// Increments a counter by one.
    pub fn increment(&self, bucket: &str, tags: &[Label]) {
        self.send(MetricKind::Count, MetricValue::Integer(1), bucket, tags);
    }

    /// Increments a counter by `n`.
    pub fn count<N: Into<i64>>(&self, bucket: &str, n: N, tags: &[Label]) {
        self.send(MetricKind::Count, MetricValue::Integer(n.into()), bucket, tags);
    }

    /// Sets a gauge to `n`.
    ///
    /// The value is sent as-is. StatsD servers treat a value with a leading `-` as a decrement, so a negative `n`
    /// lowers the gauge by that amount rather than setting it.
    pub fn gauge<N: Into<i64>>(&self, bucket: &str, n: N, tags: &[Label]) {
        self.send(MetricKind::Gauge, MetricValue::Integer(n.into()), bucket, tags);
    }

    /// Sets a gauge to the floating-point value `value`.
    ///
    /// As with [`Client::gauge`], a negative value is read by the server as a decrement.
    pub fn gauge_f64(&self, bucket: &str, value: f64, tags: &[Label]) {
        self.send(MetricKind::Gauge, MetricValue::Float(value), bucket, tags);
    }

    /// Records the time elapsed since `start`, in fractional milliseconds.
    pub fn timing(&self, bucket: &str, start: Instant, tags: &[Label]) {
        self.timing_duration(bucket, start.elapsed(), tags);
    }

    /// Records `duration`, in fractional milliseconds.
    pub fn timing_duration(&self, bucket: &str, duration: Duration, tags: &[Label]) {
        self.send(MetricKind::Timing, MetricValue::Float(duration_as_millis(duration)), bucket, tags);
    }

    /// Increments a counter by one, formatting the bucket from `bucket`.
    ///
    /// ```no_run
    /// # use metrics_client_statsd::Client;
    /// # let client = Client::new("udp", "127.0.0.1:8125").unwrap();
    /// let shard = 3;
    /// client.increment_fmt(format_args!("cache.shard{shard}.miss"), &[]);
    /// ```
    pub fn increment_fmt(&self, bucket: fmt::Arguments<'_>, tags: &[Label]) {
        self.send_fmt(MetricKind::Count, MetricValue::Integer(1), bucket, tags);
    }

    /// Increments a counter by `n`, formatting the bucket from `bucket`.
    pub fn count_fmt<N: Into<i64>>(&self, n: N, bucket: fmt::Arguments<'_>, tags: &[Label]) {
        self.send_fmt(MetricKind::Count, MetricValue::Integer(n.into()), bucket, tags);
    }

    /// Sets a gauge to `n`, formatting the bucket from `bucket`.
    ///
    /// As with [`Client::gauge`], a negative `n` is read by the server as a decrement.
    pub fn gauge_fmt<N: Into<i64>>(&self, n: N, bucket: fmt::Arguments<'_>, tags: &[Label]) {
        self.send_fmt(MetricKind::Gauge, MetricValue::Integer(n.into()), bucket, tags);
    }

    /// Records the time elapsed since `start`, formatting the bucket from `bucket`.
    pub fn timing_fmt(&self, start: Instant, bucket: fmt::Arguments<'_>, tags: &[Label]) {
        let value = MetricValue::Float(duration_as_millis(start.elapsed()));
        self.send_fmt(MetricKind::Timing, value, bucket, tags);
    }

    /// Flushes any pending metrics immediately.
    pub fn flush(&self) {
        self.inner.batcher.flush();
    }

    /// Closes the client.
    ///
    /// The background flush thread is stopped, any pending metrics are flushed, and the connection is closed. Metrics
    /// emitted after closing are dropped. Calling this more than once is a no-op.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Returns a snapshot of the client's statistics.
    pub fn stats(&self) -> ClientStats {
        self.inner.stats.snapshot()
    }

    pub(crate) fn send<'a, I>(&self, kind: MetricKind, value: MetricValue, bucket: &str, tags: I)
    where
        I: IntoIterator<Item = &'a Label>,
    {
        let mut buf = self.inner.pool.acquire(SCRATCH_CAPACITY);
        encode(&mut buf, kind, value, &self.inner.prefix, bucket, tags);
        self.inner.batcher.enqueue(&buf);
    }

    fn send_fmt(&self, kind: MetricKind, value: MetricValue, bucket: fmt::Arguments<'_>, tags: &[Label]) {
        let mut buf = self.inner.pool.acquire(SCRATCH_CAPACITY);
        match encode_fmt(&mut buf, kind, value, &self.inner.prefix, bucket, tags) {
            Ok(()) => self.inner.batcher.enqueue(&buf),
            Err(e) => self.inner.batcher.drop_fragment(Error::Format(e)),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("prefix", &self.inner.prefix).finish_non_exhaustive()
    }
}

fn duration_as_millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
