use crate::context::{keys, Context};
use crate::propagation::{self, Extractor, Injector, TRACE_CONTEXT_HEADER};
use crate::trace::{IdGenerator, RandomIdGenerator, SpanId, TraceId};
use regex::Regex;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

type Value = Arc<dyn Any + Send + Sync>;

const HEADER_FORMAT: &str = r"^([0-9a-f]{32})(/([0-9]+))?(;o=([0-9]+))?$";

fn header_format() -> Option<&'static Regex> {
    static FORMAT: OnceLock<Option<Regex>> = OnceLock::new();
    FORMAT.get_or_init(|| Regex::new(HEADER_FORMAT).ok()).as_ref()
}

/// The tracing state of a request: which trace it belongs to, the innermost
/// open span, and whether it is traced at all.
///
/// `TraceContext` is what travels in the `X-Cloud-Trace-Context` header. Its
/// [`Display`](fmt::Display) form is the header value,
/// `traceId[/spanId];o=0|1`.
///
/// # Examples
///
/// ```
/// use cloud_trace::TraceContext;
/// use std::collections::HashMap;
///
/// let headers = HashMap::from([(
///     "X-Cloud-Trace-Context".to_string(),
///     "12345678901234567890123456789012/0000;o=1".to_string(),
/// )]);
///
/// let cx = TraceContext::from_headers(&headers);
/// assert!(cx.from_header());
/// assert_eq!(cx.enabled(), Some(true));
/// assert_eq!(cx.to_string(), "12345678901234567890123456789012/0000;o=1");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: Option<SpanId>,
    enabled: Option<bool>,
    from_header: bool,
}

impl TraceContext {
    /// Creates a trace context from its parts.
    pub fn new(
        trace_id: TraceId,
        span_id: Option<SpanId>,
        enabled: Option<bool>,
        from_header: bool,
    ) -> Self {
        TraceContext {
            trace_id,
            span_id,
            enabled,
            from_header,
        }
    }

    /// A fresh context with a newly generated trace id and nothing else
    /// decided.
    pub fn generate(id_generator: &dyn IdGenerator) -> Self {
        TraceContext::new(id_generator.new_trace_id(), None, None, false)
    }

    /// Derives the tracing state from request headers.
    ///
    /// Looks for `X-Cloud-Trace-Context` (case-insensitively, or as the
    /// `HTTP_X_CLOUD_TRACE_CONTEXT` server variable). A missing or malformed
    /// header yields a fresh context with a random trace id.
    pub fn from_headers(extractor: &dyn Extractor) -> Self {
        Self::from_headers_with(extractor, &RandomIdGenerator::default())
    }

    /// Like [`TraceContext::from_headers`], generating the fallback trace id
    /// with `id_generator`.
    pub fn from_headers_with(extractor: &dyn Extractor, id_generator: &dyn IdGenerator) -> Self {
        propagation::trace_context_header(extractor)
            .and_then(|value| Self::parse(&value))
            .unwrap_or_else(|| Self::generate(id_generator))
    }

    /// Parses a header value, returning `None` unless it is well formed.
    ///
    /// An `o=` option other than `1` disables tracing. Without the option the
    /// decision is left open.
    pub fn parse(value: &str) -> Option<Self> {
        let captures = header_format()?.captures(value)?;
        let trace_id = TraceId::from_hex(captures.get(1)?.as_str()).ok()?;
        let span_id = match captures.get(3) {
            Some(m) => Some(SpanId::parse(m.as_str()).ok()?),
            None => None,
        };
        let enabled = captures.get(5).map(|m| m.as_str() == "1");

        Some(TraceContext::new(trace_id, span_id, enabled, true))
    }

    /// Reads the tracing state stored in a [`Context`], if there is any.
    pub fn from_context(cx: &Context) -> Option<Self> {
        let trace_id = *cx.get::<TraceId>(keys::TRACE_ID)?;
        Some(TraceContext {
            trace_id,
            span_id: cx.get::<SpanId>(keys::SPAN_ID).cloned(),
            enabled: cx.get::<bool>(keys::TRACE_ENABLED).copied(),
            from_header: cx
                .get::<bool>(keys::TRACE_SAMPLED_FROM_HEADER)
                .copied()
                .unwrap_or(false),
        })
    }

    /// Returns a child of `parent` carrying this tracing state.
    pub fn to_context(&self, parent: &Context) -> Context {
        let mut values: Vec<(&'static str, Value)> = vec![
            (keys::TRACE_ID, Arc::new(self.trace_id) as Value),
            (
                keys::TRACE_SAMPLED_FROM_HEADER,
                Arc::new(self.from_header) as Value,
            ),
        ];
        if let Some(span_id) = &self.span_id {
            values.push((keys::SPAN_ID, Arc::new(span_id.clone()) as Value));
        }
        if let Some(enabled) = self.enabled {
            values.push((keys::TRACE_ENABLED, Arc::new(enabled) as Value));
        }
        parent.with_values(values)
    }

    /// Writes the propagation header.
    pub fn inject(&self, injector: &mut dyn Injector) {
        injector.set(TRACE_CONTEXT_HEADER, self.to_string());
    }

    /// The trace this request belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The innermost open span, if known.
    pub fn span_id(&self) -> Option<&SpanId> {
        self.span_id.as_ref()
    }

    /// Whether the request is traced; `None` when nobody has decided yet.
    pub fn enabled(&self) -> Option<bool> {
        self.enabled
    }

    /// Whether this state arrived in a propagation header.
    pub fn from_header(&self) -> bool {
        self.from_header
    }

    /// Returns a copy with a different innermost span.
    pub fn with_span_id(mut self, span_id: Option<SpanId>) -> Self {
        self.span_id = span_id;
        self
    }

    /// Returns a copy with the tracing decision set.
    pub fn with_enabled(mut self, enabled: Option<bool>) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trace_id)?;
        if let Some(span_id) = &self.span_id {
            write!(f, "/{span_id}")?;
        }
        let enabled = if self.enabled == Some(true) { 1 } else { 0 };
        write!(f, ";o={enabled}")
    }
}
