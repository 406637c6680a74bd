//! # Request tracing
//!
//! The types needed to trace a request end to end:
//!
//! * [`TraceContext`] carries the trace id, parent span id and sampling
//!   decision across process boundaries.
//! * [`Sampler`] decides whether a request without an upstream decision is
//!   traced.
//! * [`Tracer`] keeps the stack of open [`TraceSpan`]s.
//! * [`RequestTracer`] ties them together for one request and hands the
//!   finished [`Trace`] to a [`Reporter`](crate::Reporter).
//!
//! ## Span nesting
//!
//! Spans form a tree: each span started while another is open becomes its
//! child. The first span of a request is the root span; its parent is the
//! span id received in the propagation header, if any. Closing a request
//! closes every span still open, innermost first.
mod config;
mod error;
pub(crate) mod id_generator;
mod ids;
pub mod labels;
mod request;
mod response;
pub(crate) mod sampler;
mod span;
mod trace_context;
mod tracer;

pub use config::{Config, AGENT_NAME, PROJECT_ID_ENV};
pub use error::{TraceError, TraceResult};
#[cfg(any(test, feature = "testing"))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use ids::{SpanId, TraceId};
pub use request::{RequestTracer, RequestTracerBuilder, DEFAULT_ROOT_SPAN_NAME};
pub use response::{HttpResponse, ResponseHeaders};
pub use sampler::{
    InMemorySamplerCache, QpsSampler, Sampler, SamplerCache, SamplerConfig, ShouldSample,
    SAMPLER_ARG_ENV, SAMPLER_ENV,
};
pub use span::{SpanOptions, Trace, TraceSpan};
pub use trace_context::TraceContext;
pub use tracer::{
    ContextTracer, ExtensionSpan, ExtensionTracer, NullTracer, Tracer, TracingExtension,
};
