use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// A specialized `Result` type for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors returned while configuring or parsing tracing state.
///
/// None of these ever fail a traced request: the request path logs them and
/// falls back to a working default.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// A trace id was not 32 hex digits.
    #[error("invalid trace id {0:?}")]
    InvalidTraceId(String, #[source] ParseIntError),

    /// A span id was empty or contained something other than decimal digits.
    #[error("invalid span id {0:?}, expected decimal digits")]
    InvalidSpanId(String),

    /// A sampler argument could not be used.
    #[error("invalid argument {arg:?} for sampler {sampler}")]
    InvalidSamplerArg {
        /// The sampler the argument was meant for.
        sampler: &'static str,
        /// The rejected argument.
        arg: String,
        /// Why the argument was rejected.
        #[source]
        source: ParseFloatError,
    },

    /// A sampler name was not recognised.
    #[error("unknown sampler {0:?}")]
    UnknownSampler(String),

    /// A configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
