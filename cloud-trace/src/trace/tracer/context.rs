use crate::context::{keys, Context, ContextGuard};
use crate::trace::{
    IdGenerator, RandomIdGenerator, SpanId, SpanOptions, TraceContext, TraceId, TraceSpan,
};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Records spans in process, tracking the innermost open span through the
/// thread's [`Context`].
///
/// Every started span is appended to a flat list that becomes the reported
/// trace, and pushed on a stack of open spans. While a span is open the
/// current context's `spanId` names it, so code that only sees
/// [`Context::current`] still knows where it is in the trace.
///
/// The tracer holds [`ContextGuard`]s and so must stay on the thread that
/// created it.
pub struct ContextTracer {
    context: TraceContext,
    spans: Vec<TraceSpan>,
    stack: Vec<OpenSpan>,
    last_end: Option<SystemTime>,
    id_generator: Arc<dyn IdGenerator>,
}

struct OpenSpan {
    index: usize,
    _guard: ContextGuard,
}

impl ContextTracer {
    /// Creates a tracer for the request described by `context`.
    ///
    /// A span id in `context` becomes the parent of the first span.
    pub fn new(context: TraceContext) -> Self {
        ContextTracer {
            context,
            spans: Vec::new(),
            stack: Vec::new(),
            last_end: None,
            id_generator: Arc::new(RandomIdGenerator::default()),
        }
    }

    /// Uses `id_generator` for span ids.
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Starts a span as a child of the innermost open span.
    pub fn start_span(&mut self, mut options: SpanOptions) -> SpanId {
        if options.parent_span_id.is_none() {
            options.parent_span_id = self.current_span_id().cloned();
        }
        let span_id = self.id_generator.new_span_id();
        self.spans.push(TraceSpan::new(span_id.clone(), options));

        let guard = Context::current_with_value(keys::SPAN_ID, span_id.clone()).attach();
        self.stack.push(OpenSpan {
            index: self.spans.len() - 1,
            _guard: guard,
        });

        ct_debug!(
            name: "ContextTracer.SpanStarted",
            span_id = span_id.as_str(),
            depth = self.stack.len(),
        );
        span_id
    }

    /// Ends the innermost open span. Returns `false` if no span was open.
    pub fn end_span(&mut self) -> bool {
        let Some(open) = self.stack.pop() else {
            return false;
        };
        let now = crate::time::now();
        let end_time = self.last_end.map_or(now, |last| now.max(last));
        if let Some(span) = self.spans.get_mut(open.index) {
            span.finish_at(end_time);
            self.last_end = span.end_time();
            ct_debug!(
                name: "ContextTracer.SpanEnded",
                span_id = span.span_id().as_str(),
            );
        }
        true
    }

    /// The request's tracing state, naming the innermost open span.
    pub fn context(&self) -> TraceContext {
        self.context
            .clone()
            .with_span_id(self.current_span_id().cloned())
    }

    /// The trace id spans are recorded under.
    pub fn trace_id(&self) -> TraceId {
        self.context.trace_id()
    }

    /// Every span started so far, in start order.
    pub fn spans(&self) -> Vec<TraceSpan> {
        self.spans.clone()
    }

    /// Labels the innermost open span.
    pub fn add_label(&mut self, key: String, value: String) {
        if let Some(open) = self.stack.last() {
            if let Some(span) = self.spans.get_mut(open.index) {
                span.add_label(key, value);
            }
        }
    }

    /// Labels the first span of the request.
    pub fn add_root_label(&mut self, key: String, value: String) {
        if let Some(span) = self.spans.first_mut() {
            span.add_label(key, value);
        }
    }

    /// Always `true`.
    pub fn enabled(&self) -> bool {
        true
    }

    fn current_span_id(&self) -> Option<&SpanId> {
        match self.stack.last() {
            Some(open) => self.spans.get(open.index).map(TraceSpan::span_id),
            None => self.context.span_id(),
        }
    }
}

impl fmt::Debug for ContextTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTracer")
            .field("context", &self.context)
            .field("spans", &self.spans.len())
            .field("open", &self.stack.len())
            .finish()
    }
}

impl Drop for ContextTracer {
    fn drop(&mut self) {
        // Guards must be released innermost first.
        while self.stack.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::IncrementIdGenerator;

    fn tracer(header: &str) -> ContextTracer {
        ContextTracer::new(TraceContext::parse(header).unwrap())
            .with_id_generator(Arc::new(IncrementIdGenerator::new()))
    }

    fn ambient_span_id() -> Option<SpanId> {
        Context::current().get::<SpanId>(keys::SPAN_ID).cloned()
    }

    #[test]
    fn spans_nest_and_restore_ambient_span_id() {
        let mut tracer = tracer("12345678901234567890123456789012;o=1");
        let before = ambient_span_id();

        let root = tracer.start_span(SpanOptions::new("root"));
        assert_eq!(ambient_span_id(), Some(root.clone()));

        let child = tracer.start_span(SpanOptions::new("child"));
        assert_eq!(ambient_span_id(), Some(child.clone()));
        assert_eq!(tracer.context().span_id(), Some(&child));

        assert!(tracer.end_span());
        assert_eq!(ambient_span_id(), Some(root.clone()));

        assert!(tracer.end_span());
        assert_eq!(ambient_span_id(), before);
        assert!(!tracer.end_span());

        let spans = tracer.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].parent_span_id(), None);
        assert_eq!(spans[1].parent_span_id(), Some(&root));
        assert!(spans.iter().all(|s| s.end_time().is_some()));
        assert!(spans[1].end_time() <= spans[0].end_time());
    }

    #[test]
    fn first_span_is_child_of_header_span() {
        let mut tracer = tracer("12345678901234567890123456789012/0000;o=1");
        tracer.start_span(SpanOptions::new("main"));

        assert_eq!(tracer.spans()[0].parent_span_id().map(SpanId::as_str), Some("0000"));
    }

    #[test]
    fn explicit_parent_wins() {
        let mut tracer = tracer("12345678901234567890123456789012;o=1");
        tracer.start_span(SpanOptions::new("root"));
        tracer.start_span(SpanOptions::new("detached").with_parent_span_id(SpanId::from_u64(99)));

        assert_eq!(tracer.spans()[1].parent_span_id(), Some(&SpanId::from_u64(99)));
    }

    #[test]
    fn labels_target_innermost_and_root() {
        let mut tracer = tracer("12345678901234567890123456789012;o=1");
        tracer.start_span(SpanOptions::new("root"));
        tracer.start_span(SpanOptions::new("child"));
        tracer.add_label("inner".into(), "1".into());
        tracer.add_root_label("outer".into(), "2".into());

        let spans = tracer.spans();
        assert!(spans[1].labels().contains_key("inner"));
        assert!(spans[0].labels().contains_key("outer"));
        assert!(!spans[0].labels().contains_key("inner"));
    }

    #[test]
    fn dropping_open_tracer_restores_context() {
        let before = Context::current();
        {
            let mut tracer = tracer("12345678901234567890123456789012;o=1");
            tracer.start_span(SpanOptions::new("a"));
            tracer.start_span(SpanOptions::new("b"));
            tracer.start_span(SpanOptions::new("c"));
        }
        assert!(Context::current().ptr_eq(&before));
    }
}
