//! # Propagation carriers
//!
//! Tracing state crosses process boundaries in the `X-Cloud-Trace-Context`
//! header. [`Extractor`] and [`Injector`] abstract over whatever carries the
//! header: a `HashMap` of request headers, CGI-style server variables in the
//! process environment, or a response under construction.
//!
//! The header value has the form `<trace-id>[/<span-id>][;o=<0|1>]` where the
//! trace id is 32 lowercase hex digits and the span id is decimal.
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;

/// The propagation header name, as sent over the wire.
pub const TRACE_CONTEXT_HEADER: &str = "X-Cloud-Trace-Context";

/// The propagation header as exposed through CGI-style server variables.
pub const TRACE_CONTEXT_SERVER_VAR: &str = "HTTP_X_CLOUD_TRACE_CONTEXT";

/// Injector provides an interface for adding fields from an underlying struct like `HashMap`
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for removing fields from an underlying struct like `HashMap`
pub trait Extractor {
    /// Get a value from a key from the underlying data.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap, replacing any entry whose key
    /// differs only in ASCII case.
    fn set(&mut self, key: &str, value: String) {
        self.retain(|k, _| !(k.eq_ignore_ascii_case(key) && k != key));
        self.insert(key.to_owned(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    ///
    /// An exact match is preferred, otherwise keys are compared ignoring
    /// ASCII case.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        HashMap::get(self, key)
            .or_else(|| {
                self.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        HashMap::keys(self)
            .map(|k| Cow::Borrowed(k.as_str()))
            .collect::<Vec<_>>()
    }
}

/// Extractor for environment variables.
///
/// This is how CGI-style hosts expose the request: headers appear as
/// `HTTP_*` variables next to `REQUEST_URI`, `REQUEST_METHOD` and friends.
/// Keys are looked up as given and then upper-cased.
#[derive(Debug, Default)]
pub struct EnvExtractor {
    _private: (),
}

impl EnvExtractor {
    /// Create a new extractor that reads from environment variables.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Extractor for EnvExtractor {
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        env::var(key)
            .or_else(|_| env::var(key.to_uppercase()))
            .ok()
            .map(Cow::Owned)
    }

    fn keys(&self) -> Vec<Cow<'_, str>> {
        env::vars().map(|(k, _)| Cow::Owned(k)).collect()
    }
}

/// Looks up the propagation header, first by its wire name and then as a
/// server variable.
pub(crate) fn trace_context_header(extractor: &dyn Extractor) -> Option<Cow<'_, str>> {
    extractor
        .get(TRACE_CONTEXT_HEADER)
        .or_else(|| extractor.get(TRACE_CONTEXT_SERVER_VAR))
}
