//! # Reporting finished traces
//!
//! When a request finishes, its [`Trace`] is handed to a [`Reporter`] exactly
//! once. Reporters deliver traces somewhere: a log, a file, a collector. A
//! failed delivery is reported back but never retried.
//!
//! Reporters shipped here:
//!
//! - [`NullReporter`] discards everything.
//! - [`InMemoryReporter`] keeps traces for inspection in tests.
//! - [`LoggerReporter`] emits each trace as JSON in a `tracing` event.
//! - [`FileReporter`] appends one JSON line per trace to a file.
//! - [`SyncReporter`] hands traces to a [`TraceSink`] transport.
use crate::trace::Trace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

mod in_memory;

pub use in_memory::InMemoryReporter;

/// Result of reporting a trace.
pub type ReportResult = Result<(), ReportError>;

/// Errors returned by reporters.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReportError {
    /// Writing the trace failed.
    #[error("failed to write trace: {0}")]
    Io(#[from] io::Error),

    /// The trace could not be serialized.
    #[error("failed to serialize trace: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The transport rejected the trace.
    #[error("transport failed: {0}")]
    Transport(String),

    /// A lock guarding reporter state was poisoned.
    #[error("reporter state poisoned: {0}")]
    Poisoned(String),
}

impl<T> From<PoisonError<T>> for ReportError {
    fn from(err: PoisonError<T>) -> Self {
        ReportError::Poisoned(err.to_string())
    }
}

/// Delivers finished traces.
pub trait Reporter: Send + Sync + fmt::Debug {
    /// Delivers one trace.
    fn report(&self, trace: &Trace) -> ReportResult;
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, trace: &Trace) -> ReportResult {
        (**self).report(trace)
    }
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn report(&self, trace: &Trace) -> ReportResult {
        (**self).report(trace)
    }
}

/// Discards every trace.
#[derive(Clone, Debug, Default)]
pub struct NullReporter {
    _private: (),
}

impl NullReporter {
    /// Create a new reporter.
    pub fn new() -> Self {
        NullReporter { _private: () }
    }
}

impl Reporter for NullReporter {
    fn report(&self, _trace: &Trace) -> ReportResult {
        Ok(())
    }
}

/// Severity of the events emitted by [`LoggerReporter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `TRACE`
    Trace,
    /// `DEBUG`
    Debug,
    /// `INFO`
    #[default]
    Info,
    /// `WARN`
    Warn,
    /// `ERROR`
    Error,
}

/// Emits every trace with spans as a JSON-encoded `tracing` event.
///
/// Events use the `cloud_trace::report` target, so a subscriber can route
/// them separately from application logs.
#[derive(Clone, Debug, Default)]
pub struct LoggerReporter {
    level: LogLevel,
}

impl LoggerReporter {
    /// Emits at `level`.
    pub fn new(level: LogLevel) -> Self {
        LoggerReporter { level }
    }
}

impl Reporter for LoggerReporter {
    fn report(&self, trace: &Trace) -> ReportResult {
        if trace.spans().is_empty() {
            return Ok(());
        }
        let json = serde_json::to_string(trace)?;
        let trace_id = trace.trace_id();
        match self.level {
            LogLevel::Trace => {
                tracing::trace!(target: "cloud_trace::report", trace_id = %trace_id, trace = %json)
            }
            LogLevel::Debug => {
                tracing::debug!(target: "cloud_trace::report", trace_id = %trace_id, trace = %json)
            }
            LogLevel::Info => {
                tracing::info!(target: "cloud_trace::report", trace_id = %trace_id, trace = %json)
            }
            LogLevel::Warn => {
                tracing::warn!(target: "cloud_trace::report", trace_id = %trace_id, trace = %json)
            }
            LogLevel::Error => {
                tracing::error!(target: "cloud_trace::report", trace_id = %trace_id, trace = %json)
            }
        }
        Ok(())
    }
}

/// Appends every trace with spans to a file, one JSON document per line.
#[derive(Debug)]
pub struct FileReporter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileReporter {
    /// Appends to `path`, creating it on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileReporter {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The file traces are appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reporter for FileReporter {
    fn report(&self, trace: &Trace) -> ReportResult {
        if trace.spans().is_empty() {
            return Ok(());
        }
        let mut line = serde_json::to_vec(trace)?;
        line.push(b'\n');

        let _guard = self.lock.lock()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// A transport that sends traces to a collector.
pub trait TraceSink: Send + Sync + fmt::Debug {
    /// Sends one trace, blocking until the collector has answered.
    fn send(&self, trace: &Trace) -> ReportResult;
}

impl<S: TraceSink + ?Sized> TraceSink for Arc<S> {
    fn send(&self, trace: &Trace) -> ReportResult {
        (**self).send(trace)
    }
}

/// Sends every trace with spans through a [`TraceSink`] on the calling
/// thread.
#[derive(Debug)]
pub struct SyncReporter<S> {
    sink: S,
}

impl<S: TraceSink> SyncReporter<S> {
    /// Reports through `sink`.
    pub fn new(sink: S) -> Self {
        SyncReporter { sink }
    }

    /// The underlying transport.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: TraceSink> Reporter for SyncReporter<S> {
    fn report(&self, trace: &Trace) -> ReportResult {
        if trace.spans().is_empty() {
            return Ok(());
        }
        self.sink.send(trace)
    }
}

/// Declarative reporter selection, as found in configuration files.
///
/// # Examples
///
/// ```
/// use cloud_trace::export::{build_reporter, ReporterConfig};
///
/// let config: ReporterConfig =
///     serde_json::from_str(r#"{"type": "logger", "level": "debug"}"#).unwrap();
/// let reporter = build_reporter(&config);
/// # let _ = reporter;
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReporterConfig {
    /// See [`NullReporter`].
    #[default]
    Null,
    /// See [`LoggerReporter`].
    Logger {
        /// Event severity.
        #[serde(default)]
        level: LogLevel,
    },
    /// See [`FileReporter`].
    File {
        /// The file to append to.
        path: PathBuf,
    },
    /// See [`SyncReporter`]. The transport cannot be described in a file, it
    /// is passed to [`build_reporter_with_sink`].
    Sync,
}

/// Builds the reporter described by `config`.
///
/// [`ReporterConfig::Sync`] has no transport here and reports nothing.
pub fn build_reporter(config: &ReporterConfig) -> Box<dyn Reporter> {
    build(config, None)
}

/// Builds the reporter described by `config`, sending through `sink` when the
/// config selects [`ReporterConfig::Sync`].
pub fn build_reporter_with_sink(
    config: &ReporterConfig,
    sink: Arc<dyn TraceSink>,
) -> Box<dyn Reporter> {
    build(config, Some(sink))
}

fn build(config: &ReporterConfig, sink: Option<Arc<dyn TraceSink>>) -> Box<dyn Reporter> {
    match config {
        ReporterConfig::Null => Box::new(NullReporter::new()),
        ReporterConfig::Logger { level } => Box::new(LoggerReporter::new(*level)),
        ReporterConfig::File { path } => Box::new(FileReporter::new(path.clone())),
        ReporterConfig::Sync => match sink {
            Some(sink) => Box::new(SyncReporter::new(sink)),
            None => {
                ct_warn!(name: "ReporterConfig.MissingSink");
                Box::new(NullReporter::new())
            }
        },
    }
}
