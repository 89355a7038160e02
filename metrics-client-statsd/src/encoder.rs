use std::fmt;

use metrics::Label;

/// The kind of a metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricKind {
    /// A counter.
    Count,

    /// A gauge.
    Gauge,

    /// A timing, in milliseconds.
    Timing,
}

impl MetricKind {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricKind::Count => b"|c",
            MetricKind::Gauge => b"|g",
            MetricKind::Timing => b"|ms",
        }
    }
}

/// The value of a metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// An integer value.
    Integer(i64),

    /// A floating-point value.
    Float(f64),

    /// A signed adjustment to a gauge.
    ///
    /// Always written with an explicit sign, so that the server applies it relative to the current value of the gauge
    /// instead of replacing it.
    Delta(f64),
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::Integer(i64::from(value))
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn write(&mut self, buf: &mut Vec<u8>, value: MetricValue) {
        match value {
            MetricValue::Integer(v) => buf.extend_from_slice(self.int_writer.format(v).as_bytes()),
            MetricValue::Float(v) => buf.extend_from_slice(self.float_writer.format(v).as_bytes()),
            MetricValue::Delta(v) => {
                // Negative values already carry their sign.
                if v.is_sign_positive() {
                    buf.push(b'+');
                }
                buf.extend_from_slice(self.float_writer.format(v).as_bytes());
            }
        }
    }
}

/// Encodes a single metric, appending it to `buf`.
///
/// The metric is written as `<prefix><bucket>[,<tag>=<value>...]:<value>|<type>\n`. The prefix is prepended to the
/// bucket as-is, without adding any separator.
pub fn encode<'a, I>(buf: &mut Vec<u8>, kind: MetricKind, value: MetricValue, prefix: &str, bucket: &str, tags: I)
where
    I: IntoIterator<Item = &'a Label>,
{
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(bucket.as_bytes());
    write_trailer(buf, kind, value, tags);
}

/// Encodes a single metric whose bucket is built from format arguments, appending it to `buf`.
///
/// The bucket is formatted directly into `buf`. If formatting fails, `buf` is restored to its original length and the
/// error is returned.
///
/// # Errors
///
/// If the formatting implementation of any of the arguments returns an error, that error is returned.
pub fn encode_fmt<'a, I>(
    buf: &mut Vec<u8>,
    kind: MetricKind,
    value: MetricValue,
    prefix: &str,
    bucket: fmt::Arguments<'_>,
    tags: I,
) -> Result<(), fmt::Error>
where
    I: IntoIterator<Item = &'a Label>,
{
    let start = buf.len();

    buf.extend_from_slice(prefix.as_bytes());
    if fmt::write(&mut BucketWriter(buf), bucket).is_err() {
        buf.truncate(start);
        return Err(fmt::Error);
    }

    write_trailer(buf, kind, value, tags);
    Ok(())
}

// Formats straight into the packet bytes, a failing `Display` impl comes back as `fmt::Error`.
struct BucketWriter<'a>(&'a mut Vec<u8>);

impl fmt::Write for BucketWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

fn write_trailer<'a, I>(buf: &mut Vec<u8>, kind: MetricKind, value: MetricValue, tags: I)
where
    I: IntoIterator<Item = &'a Label>,
{
    for tag in tags {
        buf.push(b',');
        write_tag(buf, tag);
    }

    buf.push(b':');
    MetricValueFormatter::new().write(buf, value);
    buf.extend_from_slice(kind.as_bytes());

    buf.push(b'\n');
}

fn write_tag(buf: &mut Vec<u8>, label: &Label) {
    // If the label value is empty, we treat it as a bare tag and only write the key.
    buf.extend_from_slice(label.key().as_bytes());
    if label.value().is_empty() {
        return;
    }

    buf.push(b'=');
    buf.extend_from_slice(label.value().as_bytes());
}
