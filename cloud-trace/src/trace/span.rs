//! # Spans and traces
//!
//! A [`TraceSpan`] is one named, timed interval within a request. Spans form
//! a tree through their parent ids; the flat list of every span a request
//! opened is its [`Trace`], the unit handed to a
//! [`Reporter`](crate::Reporter).
use crate::trace::{SpanId, TraceId};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Options for starting a span.
///
/// # Examples
///
/// ```
/// use cloud_trace::trace::SpanOptions;
///
/// let options = SpanOptions::new("render")
///     .with_label("template", "orders.html")
///     .with_label("cache", "miss");
/// assert_eq!(options.name(), Some("render"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct SpanOptions {
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) parent_span_id: Option<SpanId>,
    pub(crate) start_time: Option<SystemTime>,
}

impl SpanOptions {
    /// Options for a span with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        SpanOptions {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Sets the span name.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a label, replacing any earlier value for the same key.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds several labels.
    pub fn with_labels<K, V, I>(mut self, labels: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Overrides the parent that would otherwise be taken from the innermost
    /// open span.
    pub fn with_parent_span_id(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    /// Overrides the start time, which defaults to when the span is started.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// The configured name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The configured labels.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

/// A single timed operation within a trace.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpan {
    name: String,
    span_id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<SpanId>,
    #[serde(serialize_with = "serialize_time")]
    start_time: SystemTime,
    #[serde(serialize_with = "serialize_optional_time")]
    end_time: Option<SystemTime>,
    labels: BTreeMap<String, String>,
}

impl TraceSpan {
    /// Starts a span with the given id.
    ///
    /// The name defaults to `"span"` when the options carry none.
    pub fn new(span_id: SpanId, options: SpanOptions) -> Self {
        TraceSpan {
            name: options
                .name
                .map(Cow::into_owned)
                .unwrap_or_else(|| "span".to_owned()),
            span_id,
            parent_span_id: options.parent_span_id,
            start_time: options.start_time.unwrap_or_else(crate::time::now),
            end_time: None,
            labels: options.labels,
        }
    }

    /// Rebuilds a span from records kept elsewhere, such as a host tracing
    /// facility.
    pub fn from_parts(
        name: String,
        span_id: SpanId,
        parent_span_id: Option<SpanId>,
        start_time: SystemTime,
        end_time: Option<SystemTime>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        TraceSpan {
            name,
            span_id,
            parent_span_id,
            start_time,
            end_time,
            labels,
        }
    }

    /// The span name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The span id.
    pub fn span_id(&self) -> &SpanId {
        &self.span_id
    }

    /// The enclosing span, if this is not a root span.
    pub fn parent_span_id(&self) -> Option<&SpanId> {
        self.parent_span_id.as_ref()
    }

    /// When the span started.
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// When the span ended; `None` while it is open.
    pub fn end_time(&self) -> Option<SystemTime> {
        self.end_time
    }

    /// The span labels.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Whether the span is still open.
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Adds or replaces a label. Returns `false`, leaving the span unchanged,
    /// once the span has ended.
    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        if !self.is_open() {
            ct_debug!(
                name: "TraceSpan.LabelAfterEnd",
                span_id = self.span_id.as_str(),
            );
            return false;
        }
        self.labels.insert(key.into(), value.into());
        true
    }

    /// Ends the span now. Ending an ended span has no effect.
    pub fn finish(&mut self) {
        self.finish_at(crate::time::now())
    }

    /// Ends the span at the given time. The end time never precedes the
    /// start time.
    pub fn finish_at(&mut self, end_time: SystemTime) {
        if self.is_open() {
            self.end_time = Some(end_time.max(self.start_time));
        }
    }
}

/// The spans recorded for one request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    trace_id: TraceId,
    spans: Vec<TraceSpan>,
}

impl Trace {
    /// Creates a trace.
    pub fn new(project_id: Option<String>, trace_id: TraceId, spans: Vec<TraceSpan>) -> Self {
        Trace {
            project_id,
            trace_id,
            spans,
        }
    }

    /// The project the trace belongs to, when known.
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// The trace id.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Every span opened during the request, in the order they were opened.
    pub fn spans(&self) -> &[TraceSpan] {
        &self.spans
    }

    /// Consumes the trace returning its spans.
    pub fn into_spans(self) -> Vec<TraceSpan> {
        self.spans
    }
}

#[derive(Serialize)]
struct Timestamp {
    seconds: u64,
    nanos: u32,
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp {
            seconds: since_epoch.as_secs(),
            nanos: since_epoch.subsec_nanos(),
        }
    }
}

fn serialize_time<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    Timestamp::from(*time).serialize(serializer)
}

fn serialize_optional_time<S: Serializer>(
    time: &Option<SystemTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    time.map(Timestamp::from).serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn options_populate_span() {
        let start = UNIX_EPOCH + Duration::from_secs(10);
        let span = TraceSpan::new(
            SpanId::from_u64(2),
            SpanOptions::new("db")
                .with_label("table", "orders")
                .with_parent_span_id(SpanId::from_u64(1))
                .with_start_time(start),
        );

        assert_eq!(span.name(), "db");
        assert_eq!(span.parent_span_id(), Some(&SpanId::from_u64(1)));
        assert_eq!(span.start_time(), start);
        assert_eq!(span.labels().get("table").map(String::as_str), Some("orders"));
        assert!(span.is_open());
    }

    #[test]
    fn unnamed_span_gets_default_name() {
        let span = TraceSpan::new(SpanId::from_u64(1), SpanOptions::default());
        assert_eq!(span.name(), "span");
    }

    #[test]
    fn labels_are_frozen_after_finish() {
        let mut span = TraceSpan::new(SpanId::from_u64(1), SpanOptions::new("s"));
        assert!(span.add_label("a", "1"));
        span.finish();

        assert!(!span.add_label("b", "2"));
        assert!(!span.add_label("a", "changed"));
        assert_eq!(span.labels().len(), 1);
        assert_eq!(span.labels()["a"], "1");
    }

    #[test]
    fn finish_is_idempotent_and_monotonic() {
        let start = UNIX_EPOCH + Duration::from_secs(100);
        let mut span = TraceSpan::new(
            SpanId::from_u64(1),
            SpanOptions::new("s").with_start_time(start),
        );

        span.finish_at(UNIX_EPOCH + Duration::from_secs(50));
        assert_eq!(span.end_time(), Some(start));

        span.finish_at(UNIX_EPOCH + Duration::from_secs(200));
        assert_eq!(span.end_time(), Some(start));
    }

    #[test]
    fn trace_serializes_to_json() {
        let start = UNIX_EPOCH + Duration::new(1_500_000_000, 250);
        let mut span = TraceSpan::new(
            SpanId::from_u64(7),
            SpanOptions::new("main").with_start_time(start),
        );
        span.add_label("/pid", "42");
        span.finish_at(start + Duration::from_secs(1));
        let trace = Trace::new(Some("proj".into()), TraceId::from(1), vec![span]);

        let value = serde_json::to_value(&trace).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "projectId": "proj",
                "traceId": "00000000000000000000000000000001",
                "spans": [{
                    "name": "main",
                    "spanId": "7",
                    "startTime": {"seconds": 1_500_000_000u64, "nanos": 250},
                    "endTime": {"seconds": 1_500_000_001u64, "nanos": 250},
                    "labels": {"/pid": "42"}
                }]
            })
        );
    }
}
