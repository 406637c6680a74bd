use crate::export::{ReportError, ReportResult, Reporter};
use crate::trace::Trace;
use std::sync::{Arc, Mutex};

/// An in-memory reporter that stores traces in memory.
///
/// This reporter is useful for testing and debugging purposes. It stores
/// every reported trace, including traces without spans, in a `Vec<Trace>`.
/// Clones share the same storage, so a test can keep one handle while the
/// request tracer owns another.
///
/// # Example
///
/// ```
/// use cloud_trace::export::InMemoryReporter;
/// use cloud_trace::trace::{RequestTracer, SamplerConfig};
/// use std::collections::HashMap;
///
/// let reporter = InMemoryReporter::default();
/// let request = RequestTracer::builder(reporter.clone())
///     .with_headers(HashMap::<String, String>::new())
///     .with_sampler_config(SamplerConfig::Enabled)
///     .start();
/// drop(request);
///
/// let traces = reporter.get_finished_traces().unwrap();
/// assert_eq!(traces.len(), 1);
/// assert_eq!(traces[0].spans()[0].name(), "main");
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryReporter {
    traces: Arc<Mutex<Vec<Trace>>>,
}

impl InMemoryReporter {
    /// Returns the finished traces as a vector of `Trace`.
    ///
    /// # Errors
    ///
    /// Returns a `ReportError` if the internal lock cannot be acquired.
    pub fn get_finished_traces(&self) -> Result<Vec<Trace>, ReportError> {
        self.traces
            .lock()
            .map(|traces| traces.iter().cloned().collect())
            .map_err(ReportError::from)
    }

    /// Clears the internal storage of finished traces.
    pub fn reset(&self) {
        let _ = self.traces.lock().map(|mut traces| traces.clear());
    }
}

impl Reporter for InMemoryReporter {
    fn report(&self, trace: &Trace) -> ReportResult {
        self.traces
            .lock()
            .map(|mut traces| traces.push(trace.clone()))
            .map_err(ReportError::from)
    }
}
