use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use tracing::trace;

use crate::{
    client::Client,
    encoder::{MetricKind, MetricValue},
};

/// A [`metrics`]-compatible recorder that forwards every update through a [`Client`].
///
/// No aggregation is performed: each update is encoded and sent as its own metric. Counters are sent as counts, gauges
/// as gauges (with increments and decrements sent as signed adjustments), and histograms as timings.
///
/// The metric name is used as the bucket, and the metric labels as tags.
pub struct StatsdRecorder {
    client: Client,
}

impl StatsdRecorder {
    /// Creates a new `StatsdRecorder` backed by `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Returns the client backing this recorder.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl From<Client> for StatsdRecorder {
    fn from(client: Client) -> Self {
        Self::new(client)
    }
}

impl Recorder for StatsdRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(Handle::new(&self.client, key)))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(Handle::new(&self.client, key)))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(Handle::new(&self.client, key)))
    }
}

struct Handle {
    client: Client,
    key: Key,
}

impl Handle {
    fn new(client: &Client, key: &Key) -> Self {
        Self { client: client.clone(), key: key.clone() }
    }

    fn send(&self, kind: MetricKind, value: MetricValue) {
        self.client.send(kind, value, self.key.name(), self.key.labels());
    }
}

impl CounterFn for Handle {
    fn increment(&self, value: u64) {
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        self.send(MetricKind::Count, MetricValue::Integer(value));
    }

    fn absolute(&self, value: u64) {
        // Without local state there is no previous value to compute an increment from.
        trace!(key = %self.key.name(), value, "Ignoring absolute counter update.");
    }
}

impl GaugeFn for Handle {
    fn increment(&self, value: f64) {
        self.send(MetricKind::Gauge, MetricValue::Delta(value));
    }

    fn decrement(&self, value: f64) {
        self.send(MetricKind::Gauge, MetricValue::Delta(-value));
    }

    fn set(&self, value: f64) {
        self.send(MetricKind::Gauge, MetricValue::Float(value));
    }
}

impl HistogramFn for Handle {
    fn record(&self, value: f64) {
        self.send(MetricKind::Timing, MetricValue::Float(value));
    }
}
