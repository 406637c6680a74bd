//! # Tracers
//!
//! A [`Tracer`] owns the span bookkeeping of one request. Which variant a
//! request gets is decided once, when the request starts:
//!
//! - [`ContextTracer`] records spans in process.
//! - [`ExtensionTracer`] forwards to a tracing facility of the host runtime.
//! - [`NullTracer`] records nothing, for requests that are not traced.
//!
//! Instrumented code talks to the enum and never needs to know which one it
//! got.
mod context;
mod extension;
mod noop;

pub use context::ContextTracer;
pub use extension::{ExtensionSpan, ExtensionTracer, TracingExtension};
pub use noop::NullTracer;

#[cfg(test)]
pub(crate) use extension::tests::FakeExtension;

use crate::trace::{SpanId, SpanOptions, TraceContext, TraceSpan};

/// The span bookkeeping of one request.
#[derive(Debug)]
pub enum Tracer {
    /// Records spans in process.
    Context(ContextTracer),
    /// Delegates to the host runtime.
    Extension(ExtensionTracer),
    /// Records nothing.
    Null(NullTracer),
}

impl Tracer {
    /// Starts a span nested in the innermost open span, returning its id.
    ///
    /// Returns `None` when the tracer does not record spans.
    #[track_caller]
    pub fn start_span(&mut self, options: SpanOptions) -> Option<SpanId> {
        match self {
            Tracer::Context(tracer) => Some(tracer.start_span(options)),
            Tracer::Extension(tracer) => tracer.start_span(options),
            Tracer::Null(tracer) => tracer.start_span(options),
        }
    }

    /// Ends the innermost open span. Returns `false` if there was none.
    pub fn end_span(&mut self) -> bool {
        match self {
            Tracer::Context(tracer) => tracer.end_span(),
            Tracer::Extension(tracer) => tracer.end_span(),
            Tracer::Null(tracer) => tracer.end_span(),
        }
    }

    /// Runs `f` inside a new span.
    ///
    /// The span is ended however `f` exits, including by returning an error
    /// or panicking, and `f`'s outcome is passed through untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use cloud_trace::trace::{ContextTracer, SpanOptions, Tracer};
    /// use cloud_trace::TraceContext;
    /// use std::collections::HashMap;
    ///
    /// let context = TraceContext::from_headers(&HashMap::<String, String>::new());
    /// let mut tracer = Tracer::Context(ContextTracer::new(context));
    ///
    /// let result: Result<u32, &str> = tracer.in_span(SpanOptions::new("parse"), |tracer| {
    ///     tracer.add_label("input", "42");
    ///     "42".parse().map_err(|_| "not a number")
    /// });
    ///
    /// assert_eq!(result, Ok(42));
    /// assert!(tracer.spans()[0].end_time().is_some());
    /// ```
    #[track_caller]
    pub fn in_span<T>(&mut self, options: SpanOptions, f: impl FnOnce(&mut Tracer) -> T) -> T {
        self.start_span(options);
        let mut scope = EndSpanOnDrop(self);
        f(&mut *scope.0)
    }

    /// The current tracing state, or `None` for a tracer that records
    /// nothing.
    pub fn context(&self) -> Option<TraceContext> {
        match self {
            Tracer::Context(tracer) => Some(tracer.context()),
            Tracer::Extension(tracer) => Some(tracer.context()),
            Tracer::Null(_) => None,
        }
    }

    /// Every span recorded so far, in start order.
    pub fn spans(&self) -> Vec<TraceSpan> {
        match self {
            Tracer::Context(tracer) => tracer.spans(),
            Tracer::Extension(tracer) => tracer.spans(),
            Tracer::Null(tracer) => tracer.spans(),
        }
    }

    /// Labels the innermost open span.
    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        match self {
            Tracer::Context(tracer) => tracer.add_label(key.into(), value.into()),
            Tracer::Null(tracer) => tracer.add_label(key.into(), value.into()),
            // host facilities attach their own labels
            Tracer::Extension(_) => {}
        }
    }

    /// Labels the request's root span.
    pub fn add_root_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        match self {
            Tracer::Context(tracer) => tracer.add_root_label(key.into(), value.into()),
            Tracer::Null(tracer) => tracer.add_root_label(key.into(), value.into()),
            Tracer::Extension(_) => {}
        }
    }

    /// Whether this tracer records spans.
    pub fn enabled(&self) -> bool {
        match self {
            Tracer::Context(tracer) => tracer.enabled(),
            Tracer::Extension(tracer) => tracer.enabled(),
            Tracer::Null(tracer) => tracer.enabled(),
        }
    }
}

impl From<ContextTracer> for Tracer {
    fn from(tracer: ContextTracer) -> Self {
        Tracer::Context(tracer)
    }
}

impl From<ExtensionTracer> for Tracer {
    fn from(tracer: ExtensionTracer) -> Self {
        Tracer::Extension(tracer)
    }
}

impl From<NullTracer> for Tracer {
    fn from(tracer: NullTracer) -> Self {
        Tracer::Null(tracer)
    }
}

struct EndSpanOnDrop<'a>(&'a mut Tracer);

impl Drop for EndSpanOnDrop<'_> {
    fn drop(&mut self) {
        self.0.end_span();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::sync::Arc;

    fn context_tracer() -> Tracer {
        let context = TraceContext::parse("12345678901234567890123456789012;o=1").unwrap();
        Tracer::Context(ContextTracer::new(context))
    }

    #[test]
    fn in_span_nests() {
        let mut tracer = context_tracer();
        tracer.in_span(SpanOptions::new("outer"), |tracer| {
            tracer.in_span(SpanOptions::new("inner"), |_| {});
        });

        let spans = tracer.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].parent_span_id(), Some(spans[0].span_id()));
        assert!(spans.iter().all(|s| s.end_time().is_some()));
        assert!(!tracer.end_span());
    }

    #[test]
    fn in_span_ends_span_on_error() {
        let mut tracer = context_tracer();
        let result: Result<(), String> =
            tracer.in_span(SpanOptions::new("fails"), |_| Err("boom".to_string()));

        assert_eq!(result, Err("boom".to_string()));
        let spans = tracer.spans();
        assert!(spans[0].end_time().is_some());
        assert!(spans[0].labels().is_empty());
    }

    #[test]
    fn in_span_ends_span_on_panic() {
        let mut tracer = context_tracer();
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            tracer.in_span(SpanOptions::new("panics"), |_| panic!("boom"));
        }));

        assert!(result.is_err());
        assert!(tracer.spans()[0].end_time().is_some());
        assert!(!tracer.end_span());
    }

    #[test]
    fn null_tracer_runs_closure_without_spans() {
        let mut tracer = Tracer::Null(NullTracer::new());
        let value = tracer.in_span(SpanOptions::new("ignored"), |tracer| {
            tracer.add_label("a", "b");
            7
        });

        assert_eq!(value, 7);
        assert!(tracer.spans().is_empty());
        assert!(tracer.context().is_none());
        assert!(!tracer.enabled());
    }

    #[test]
    fn extension_tracer_names_spans_from_in_span_caller() {
        let context = TraceContext::parse("12345678901234567890123456789012;o=1").unwrap();
        let mut tracer = Tracer::Extension(ExtensionTracer::new(
            Arc::new(FakeExtension::default()),
            context,
        ));

        let line = line!() + 1;
        tracer.in_span(SpanOptions::default(), |_| {});

        let spans = tracer.spans();
        assert_eq!(spans[0].name(), format!("app/mod.rs/{line}"));
        assert!(spans[0].end_time().is_some());
    }
}
