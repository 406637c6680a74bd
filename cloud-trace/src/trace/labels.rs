//! Well-known span label keys.
//!
//! These are the keys Cloud Trace recognises for request metadata. The root
//! span of every traced request carries the ones that can be derived from the
//! request and the runtime environment.

/// The request URI.
pub const HTTP_URL: &str = "/http/url";
/// The request method.
pub const HTTP_METHOD: &str = "/http/method";
/// The protocol the client spoke, e.g. `HTTP/1.1`.
pub const HTTP_CLIENT_PROTOCOL: &str = "/http/client_protocol";
/// The client's user agent.
pub const HTTP_USER_AGENT: &str = "/http/user_agent";
/// The host the request was addressed to.
pub const HTTP_HOST: &str = "/http/host";
/// The response status code.
pub const HTTP_STATUS_CODE: &str = "/http/status_code";
/// The `Location` of a redirect response.
pub const HTTP_REDIRECTED_URL: &str = "/http/redirected_url";
/// The App Engine service.
pub const GAE_APP_MODULE: &str = "g.co/gae/app/module";
/// The App Engine version.
pub const GAE_APP_VERSION: &str = "g.co/gae/app/version";
/// The id of the process that served the request.
pub const PID: &str = "/pid";
/// The name of the tracing agent.
pub const AGENT: &str = "/agent";
/// The name and version of the tracing agent.
pub const GCO_AGENT: &str = "g.co/agent";
