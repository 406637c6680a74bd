//! Per-request distributed tracing for services behind Google Cloud's
//! `X-Cloud-Trace-Context` propagation header.
//!
//! # Overview
//!
//! A traced request flows through a handful of small pieces:
//!
//! - **[`Context`]**: an immutable, execution-scoped collection of values kept
//!   on a thread-confined stack. Tracing state (the trace id, the innermost
//!   open span id, whether the request is traced) lives here so nested code
//!   can observe it without parameter threading.
//! - **[`TraceContext`]**: the trace id, span id and sampling flag, parsed
//!   from and written back to the propagation header.
//! - **[`Sampler`]**: decides whether a request without a forced decision
//!   should be traced.
//! - **[`Tracer`]**: a closed set of tracer variants managing the stack of
//!   open [`TraceSpan`]s.
//! - **[`RequestTracer`]**: the per-request coordinator tying these together
//!   and handing the finished [`Trace`] to a [`Reporter`].
//!
//! # Getting Started
//!
//! ```
//! use cloud_trace::{
//!     export::InMemoryReporter,
//!     trace::{HttpResponse, RequestTracer, SamplerConfig, SpanOptions},
//! };
//! use std::collections::HashMap;
//!
//! let reporter = InMemoryReporter::default();
//! let headers = HashMap::from([("REQUEST_URI".to_string(), "/orders".to_string())]);
//!
//! let mut request = RequestTracer::builder(reporter.clone())
//!     .with_headers(headers)
//!     .with_sampler_config(SamplerConfig::Enabled)
//!     .start();
//!
//! request.in_span(SpanOptions::new("load-orders"), |_tracer| {
//!     // traced application logic
//! });
//!
//! let mut response = HttpResponse::new();
//! response.set_status(200);
//! assert!(request.finish(&response));
//!
//! let traces = reporter.get_finished_traces().unwrap();
//! assert_eq!(traces[0].spans().len(), 2);
//! ```
//!
//! ## Supported Rust Versions
//!
//! This crate is built against the latest stable release. The minimum
//! supported version is 1.75. The current version is not guaranteed to build
//! on Rust versions earlier than the minimum supported version.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![allow(clippy::needless_doctest_main)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

#[macro_use]
mod internal_logging;

mod context;

pub use context::{keys, Context, ContextGuard};

pub mod export;

pub mod propagation;

pub mod trace;

pub use export::{Reporter, ReportError, ReportResult};
pub use trace::{
    RequestTracer, Sampler, Trace, TraceContext, TraceError, TraceSpan, Tracer,
};

#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}

#[doc(hidden)]
pub mod time {
    use std::time::SystemTime;

    #[doc(hidden)]
    pub fn now() -> SystemTime {
        SystemTime::now()
    }
}
