use crate::propagation::Injector;
use std::borrow::Cow;
use std::collections::HashMap;

/// Access to the response of the request being traced.
///
/// The tracer writes the propagation header before the response is sent and
/// reads the status and redirect target once the request has finished.
pub trait ResponseHeaders {
    /// Whether the headers have already gone out; nothing can be added then.
    fn headers_sent(&self) -> bool;

    /// Sets a header, replacing any earlier value.
    fn set_header(&mut self, name: &str, value: String);

    /// The status code, once known.
    fn status(&self) -> Option<u16>;

    /// A header value, looked up ignoring ASCII case.
    fn header(&self, name: &str) -> Option<Cow<'_, str>>;
}

/// A response kept in memory.
///
/// # Examples
///
/// ```
/// use cloud_trace::trace::{HttpResponse, ResponseHeaders};
///
/// let mut response = HttpResponse::new();
/// response.set_status(302);
/// response.set_header("Location", "https://example.com/next".to_string());
///
/// assert_eq!(response.status(), Some(302));
/// assert_eq!(response.header("location").as_deref(), Some("https://example.com/next"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponse {
    status: Option<u16>,
    headers: HashMap<String, String>,
    sent: bool,
}

impl HttpResponse {
    /// An empty response with no status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status code.
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Marks the headers as sent.
    pub fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// All headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

impl ResponseHeaders for HttpResponse {
    fn headers_sent(&self) -> bool {
        self.sent
    }

    fn set_header(&mut self, name: &str, value: String) {
        Injector::set(&mut self.headers, name, value);
    }

    fn status(&self) -> Option<u16> {
        self.status
    }

    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        crate::propagation::Extractor::get(&self.headers, name)
    }
}

impl Injector for HttpResponse {
    fn set(&mut self, key: &str, value: String) {
        self.set_header(key, value);
    }
}
