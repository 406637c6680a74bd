//! # Per-request tracing
//!
//! A [`RequestTracer`] follows one request from arrival to response. Starting
//! it reads the propagation header, makes the sampling decision, picks a
//! [`Tracer`] variant and opens the root span. Finishing it closes whatever
//! is still open and hands the [`Trace`] to the [`Reporter`].
use crate::context::{keys, Context, ContextGuard};
use crate::export::Reporter;
use crate::propagation::{EnvExtractor, Extractor, TRACE_CONTEXT_HEADER};
use crate::trace::{
    labels, Config, ContextTracer, ExtensionTracer, IdGenerator, NullTracer, ResponseHeaders,
    Sampler, SamplerCache, SamplerConfig, ShouldSample, SpanId, SpanOptions, Trace, TraceContext,
    Tracer, TracingExtension, PROJECT_ID_ENV,
};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::process;
use std::sync::Arc;

/// The root span name used when the request URI is unknown.
pub const DEFAULT_ROOT_SPAN_NAME: &str = "main";

/// Traces a single request.
///
/// The tracer is tied to the thread that started it: it keeps the request's
/// tracing state attached to the thread's [`Context`] until it finishes.
/// Dropping it without calling [`RequestTracer::finish`] still closes and
/// reports the trace, just without response details.
#[derive(Debug)]
pub struct RequestTracer {
    tracer: Tracer,
    context: TraceContext,
    project_id: Option<String>,
    reporter: Box<dyn Reporter>,
    context_guard: Option<ContextGuard>,
    finished: bool,
}

impl RequestTracer {
    /// Starts configuring a request tracer reporting to `reporter`.
    pub fn builder(reporter: impl Reporter + 'static) -> RequestTracerBuilder {
        RequestTracerBuilder::new(Box::new(reporter))
    }

    /// The tracer managing this request's spans.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Mutable access to the tracer managing this request's spans.
    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    /// Runs `f` inside a new span, see [`Tracer::in_span`].
    #[track_caller]
    pub fn in_span<T>(&mut self, options: SpanOptions, f: impl FnOnce(&mut Tracer) -> T) -> T {
        self.tracer.in_span(options, f)
    }

    /// Starts a span, see [`Tracer::start_span`].
    #[track_caller]
    pub fn start_span(&mut self, options: SpanOptions) -> Option<SpanId> {
        self.tracer.start_span(options)
    }

    /// Ends the innermost open span.
    pub fn end_span(&mut self) -> bool {
        self.tracer.end_span()
    }

    /// The request's current tracing state.
    pub fn context(&self) -> TraceContext {
        self.tracer
            .context()
            .unwrap_or_else(|| self.context.clone())
    }

    /// Whether the request is traced.
    pub fn enabled(&self) -> bool {
        self.tracer.enabled()
    }

    /// Labels the innermost open span.
    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tracer.add_label(key, value)
    }

    /// Labels the root span.
    pub fn add_root_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tracer.add_root_label(key, value)
    }

    /// Closes every open span and reports the trace.
    ///
    /// The response status becomes the `/http/status_code` label, and the
    /// `Location` of a 301 or 302 response the `/http/redirected_url` label.
    /// Returns whether the reporter accepted the trace.
    pub fn finish(mut self, response: &dyn ResponseHeaders) -> bool {
        self.finalize(Some(response))
    }

    fn finalize(&mut self, response: Option<&dyn ResponseHeaders>) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;

        if let Some(response) = response {
            let status = response.status();
            if matches!(status, Some(301 | 302)) {
                if let Some(location) = response.header("Location") {
                    self.tracer
                        .add_root_label(labels::HTTP_REDIRECTED_URL, location.into_owned());
                }
            }
            if let Some(status) = status {
                self.tracer
                    .add_root_label(labels::HTTP_STATUS_CODE, status.to_string());
            }
        }

        while self.tracer.end_span() {}

        let trace = Trace::new(
            self.project_id.clone(),
            self.context.trace_id(),
            self.tracer.spans(),
        );
        let result = self.reporter.report(&trace);
        self.context_guard.take();

        match result {
            Ok(()) => {
                ct_debug!(
                    name: "RequestTracer.Reported",
                    trace_id = format!("{}", trace.trace_id()),
                    spans = trace.spans().len(),
                );
                true
            }
            Err(err) => {
                ct_error!(
                    name: "RequestTracer.ReportFailed",
                    trace_id = format!("{}", trace.trace_id()),
                    error = format!("{err}"),
                );
                false
            }
        }
    }
}

impl Drop for RequestTracer {
    fn drop(&mut self) {
        if !self.finished {
            self.finalize(None);
        }
    }
}

/// Configures and starts a [`RequestTracer`].
pub struct RequestTracerBuilder {
    reporter: Box<dyn Reporter>,
    headers: Option<Box<dyn Extractor>>,
    sampler: Option<Box<dyn ShouldSample>>,
    sampler_cache: Option<Arc<dyn SamplerCache>>,
    config: Config,
    root_span: SpanOptions,
    extension: Option<Arc<dyn TracingExtension>>,
}

impl fmt::Debug for RequestTracerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracerBuilder")
            .field("reporter", &self.reporter)
            .field("headers", &self.headers.is_some())
            .field("sampler", &self.sampler)
            .field("config", &self.config)
            .field("root_span", &self.root_span)
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}

impl RequestTracerBuilder {
    fn new(reporter: Box<dyn Reporter>) -> Self {
        RequestTracerBuilder {
            reporter,
            headers: None,
            sampler: None,
            sampler_cache: None,
            config: Config::default(),
            root_span: SpanOptions::default(),
            extension: None,
        }
    }

    /// Reads request data from `headers` instead of the process environment.
    ///
    /// Server variables such as `REQUEST_URI` are looked up here too.
    pub fn with_headers<E: Extractor + 'static>(mut self, headers: E) -> Self {
        self.headers = Some(Box::new(headers));
        self
    }

    /// Samples with `sampler`, taking precedence over any sampler
    /// configuration.
    pub fn with_sampler<S: ShouldSample + 'static>(mut self, sampler: S) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    /// Samples as described by `config`.
    pub fn with_sampler_config(mut self, config: SamplerConfig) -> Self {
        self.config.sampler = config;
        self
    }

    /// Backs a configured QPS sampler with `cache`.
    pub fn with_sampler_cache(mut self, cache: Arc<dyn SamplerCache>) -> Self {
        self.sampler_cache = Some(cache);
        self
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Customises the root span. Its name replaces the default and its
    /// labels win over the derived ones.
    pub fn with_root_span(mut self, options: SpanOptions) -> Self {
        self.root_span = options;
        self
    }

    /// Reports under `project_id`.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.config.project_id = Some(project_id.into());
        self
    }

    /// Delegates span bookkeeping of traced requests to the host facility.
    pub fn with_extension(mut self, extension: Arc<dyn TracingExtension>) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Generates ids with `id_generator`.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.config.id_generator = Arc::new(id_generator);
        self
    }

    /// Starts tracing the request.
    pub fn start(self) -> RequestTracer {
        self.start_inner(None)
    }

    /// Starts tracing the request, echoing an inbound propagation header on
    /// `response` unless its headers were already sent.
    pub fn start_with_response(self, response: &mut dyn ResponseHeaders) -> RequestTracer {
        self.start_inner(Some(response))
    }

    fn start_inner(self, response: Option<&mut dyn ResponseHeaders>) -> RequestTracer {
        let RequestTracerBuilder {
            reporter,
            headers,
            sampler,
            sampler_cache,
            config,
            root_span,
            extension,
        } = self;
        let extractor: Box<dyn Extractor> =
            headers.unwrap_or_else(|| Box::new(EnvExtractor::new()));

        let context =
            TraceContext::from_headers_with(extractor.as_ref(), config.id_generator.as_ref());
        let enabled = match context.enabled() {
            Some(forced) => forced,
            None => match sampler {
                Some(sampler) => sampler.should_sample(),
                None => Sampler::from_config(&config.sampler, sampler_cache).should_sample(),
            },
        };
        let context = context.with_enabled(Some(enabled));

        if let Some(response) = response {
            if context.from_header() && !response.headers_sent() {
                response.set_header(TRACE_CONTEXT_HEADER, context.to_string());
            }
        }

        let project_id = config.project_id.clone().or_else(|| {
            extractor
                .get(PROJECT_ID_ENV)
                .map(Cow::into_owned)
                .filter(|p| !p.is_empty())
        });

        ct_debug!(
            name: "RequestTracer.Started",
            trace_id = format!("{}", context.trace_id()),
            enabled = enabled,
            from_header = context.from_header(),
        );

        let mut ambient = context.to_context(&Context::current());
        if let Some(project_id) = &project_id {
            ambient = ambient.with_value(keys::PROJECT_ID, project_id.clone());
        }
        let context_guard = ambient.attach();

        let mut tracer: Tracer = match (enabled, extension) {
            (false, _) => NullTracer::new().into(),
            (true, Some(extension)) => ExtensionTracer::new(extension, context.clone()).into(),
            (true, None) => ContextTracer::new(context.clone())
                .with_id_generator(config.id_generator.clone())
                .into(),
        };
        tracer.start_span(root_span_options(extractor.as_ref(), &config, root_span));

        RequestTracer {
            tracer,
            context,
            project_id,
            reporter,
            context_guard: Some(context_guard),
            finished: false,
        }
    }
}

fn root_span_options(
    extractor: &dyn Extractor,
    config: &Config,
    overrides: SpanOptions,
) -> SpanOptions {
    let var = |name: &str| {
        extractor
            .get(name)
            .map(Cow::into_owned)
            .filter(|value| !value.is_empty())
    };
    let runtime_var =
        |name: &str| var(name).or_else(|| env::var(name).ok().filter(|v| !v.is_empty()));

    let mut root_labels = BTreeMap::new();
    let request_labels: [(&str, &[&str]); 5] = [
        (labels::HTTP_URL, &["REQUEST_URI"]),
        (labels::HTTP_METHOD, &["REQUEST_METHOD"]),
        (labels::HTTP_CLIENT_PROTOCOL, &["SERVER_PROTOCOL"]),
        (labels::HTTP_USER_AGENT, &["HTTP_USER_AGENT"]),
        (labels::HTTP_HOST, &["HTTP_HOST", "SERVER_NAME"]),
    ];
    for (label, sources) in request_labels {
        if let Some(value) = sources.iter().find_map(|&source| var(source)) {
            root_labels.insert(label.to_owned(), value);
        }
    }
    for (label, source) in [
        (labels::GAE_APP_MODULE, "GAE_SERVICE"),
        (labels::GAE_APP_VERSION, "GAE_VERSION"),
    ] {
        if let Some(value) = runtime_var(source) {
            root_labels.insert(label.to_owned(), value);
        }
    }
    root_labels.insert(labels::PID.to_owned(), process::id().to_string());
    root_labels.insert(labels::AGENT.to_owned(), config.agent.to_string());
    root_labels.insert(labels::GCO_AGENT.to_owned(), config.agent_with_version());
    root_labels.extend(overrides.labels);

    let name = overrides
        .name
        .or_else(|| var("REQUEST_URI").map(Cow::Owned))
        .unwrap_or(Cow::Borrowed(DEFAULT_ROOT_SPAN_NAME));

    SpanOptions {
        name: Some(name),
        labels: root_labels,
        parent_span_id: overrides.parent_span_id,
        start_time: overrides.start_time,
    }
}
