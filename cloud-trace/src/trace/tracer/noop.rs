//! No-op tracer
//!
//! Used for requests that are not traced, so instrumented code can call the
//! same span operations whatever the sampling decision was.
use crate::trace::{SpanId, SpanOptions, TraceSpan};

/// A tracer that records nothing.
#[derive(Clone, Debug, Default)]
pub struct NullTracer {
    _private: (),
}

impl NullTracer {
    /// Create a new no-op tracer
    pub fn new() -> Self {
        NullTracer { _private: () }
    }

    /// Ignores the span.
    pub fn start_span(&mut self, _options: SpanOptions) -> Option<SpanId> {
        None
    }

    /// There is never an open span to end.
    pub fn end_span(&mut self) -> bool {
        false
    }

    /// Always empty.
    pub fn spans(&self) -> Vec<TraceSpan> {
        Vec::new()
    }

    /// Ignores the label.
    pub fn add_label(&mut self, _key: String, _value: String) {}

    /// Ignores the label.
    pub fn add_root_label(&mut self, _key: String, _value: String) {}

    /// Always `false`.
    pub fn enabled(&self) -> bool {
        false
    }
}
