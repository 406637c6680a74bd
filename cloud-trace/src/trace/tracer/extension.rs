use crate::trace::{SpanId, SpanOptions, TraceContext, TraceId, TraceSpan};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// A span as recorded by a host tracing facility.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionSpan {
    /// The span name.
    pub name: String,
    /// The host's numeric span id.
    pub span_id: u64,
    /// The enclosing span, if any.
    pub parent_span_id: Option<u64>,
    /// When the span started.
    pub start_time: SystemTime,
    /// When the span ended, if it has.
    pub end_time: Option<SystemTime>,
    /// Labels attached by the host.
    pub labels: BTreeMap<String, String>,
}

impl From<ExtensionSpan> for TraceSpan {
    fn from(span: ExtensionSpan) -> Self {
        TraceSpan::from_parts(
            span.name,
            SpanId::from_u64(span.span_id),
            span.parent_span_id.map(SpanId::from_u64),
            span.start_time,
            span.end_time,
            span.labels,
        )
    }
}

/// A tracing facility provided by the host runtime.
///
/// Hosts that instrument code themselves keep the span stack on their side;
/// [`ExtensionTracer`] only forwards to it.
pub trait TracingExtension: Send + Sync + fmt::Debug {
    /// Seeds the host with the request's trace id and parent span.
    fn set_context(&self, trace_id: TraceId, span_id: Option<u64>);

    /// Begins a span.
    fn begin(&self, name: &str, options: &SpanOptions);

    /// Ends the innermost span. Returns `false` if none was open.
    fn finish(&self) -> bool;

    /// The trace id and innermost open span.
    fn context(&self) -> (TraceId, Option<u64>);

    /// Every span recorded so far.
    fn list(&self) -> Vec<ExtensionSpan>;
}

/// Delegates span bookkeeping to a [`TracingExtension`].
#[derive(Clone, Debug)]
pub struct ExtensionTracer {
    extension: Arc<dyn TracingExtension>,
    context: TraceContext,
}

impl ExtensionTracer {
    /// Hands the request's tracing state to the host.
    pub fn new(extension: Arc<dyn TracingExtension>, context: TraceContext) -> Self {
        extension.set_context(
            context.trace_id(),
            context.span_id().and_then(SpanId::to_u64),
        );
        ExtensionTracer { extension, context }
    }

    /// Begins a span on the host.
    ///
    /// Unnamed spans are named after the calling source location, as
    /// `app/<file>/<line>`.
    #[track_caller]
    pub fn start_span(&mut self, options: SpanOptions) -> Option<SpanId> {
        let name = match options.name() {
            Some(name) => name.to_owned(),
            None => caller_span_name(Location::caller()),
        };
        self.extension.begin(&name, &options);
        self.extension.context().1.map(SpanId::from_u64)
    }

    /// Ends the innermost span on the host.
    pub fn end_span(&mut self) -> bool {
        self.extension.finish()
    }

    /// The host's view of the tracing state.
    pub fn context(&self) -> TraceContext {
        let (trace_id, span_id) = self.extension.context();
        TraceContext::new(
            trace_id,
            span_id.map(SpanId::from_u64),
            self.context.enabled(),
            self.context.from_header(),
        )
    }

    /// The host's spans.
    pub fn spans(&self) -> Vec<TraceSpan> {
        self.extension
            .list()
            .into_iter()
            .map(TraceSpan::from)
            .collect()
    }

    /// Always `true`.
    pub fn enabled(&self) -> bool {
        true
    }
}

fn caller_span_name(location: &Location<'_>) -> String {
    let file = Path::new(location.file())
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_else(|| location.file());
    format!("app/{}/{}", file, location.line())
}
