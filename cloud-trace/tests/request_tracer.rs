use cloud_trace::export::InMemoryReporter;
use cloud_trace::trace::{
    labels, HttpResponse, InMemorySamplerCache, QpsSampler, RequestTracer, ResponseHeaders,
    SamplerConfig, ShouldSample, SpanOptions, Tracer,
};
use cloud_trace::{Context, TraceContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const TRACE_ID: &str = "12345678901234567890123456789012";

fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Default, Clone)]
struct CountingSampler {
    calls: Arc<AtomicUsize>,
}

impl ShouldSample for CountingSampler {
    fn should_sample(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[test]
fn forced_off_request_reports_empty_trace() {
    let reporter = InMemoryReporter::default();
    let sampler = CountingSampler::default();
    let mut request = RequestTracer::builder(reporter.clone())
        .with_headers(headers(&[(
            "X-Cloud-Trace-Context",
            &format!("{TRACE_ID};o=0"),
        )]))
        .with_sampler(sampler.clone())
        .start();

    assert!(matches!(request.tracer(), Tracer::Null(_)));
    assert_eq!(request.start_span(SpanOptions::new("ignored")), None);
    assert!(request.finish(&HttpResponse::new()));

    assert_eq!(sampler.calls.load(Ordering::SeqCst), 0);
    let traces = reporter.get_finished_traces().unwrap();
    assert_eq!(traces.len(), 1);
    assert!(traces[0].spans().is_empty());
}

#[test]
fn child_span_nests_under_root() {
    let reporter = InMemoryReporter::default();
    let mut request = RequestTracer::builder(reporter.clone())
        .with_headers(headers(&[("REQUEST_URI", "/checkout")]))
        .with_sampler_config(SamplerConfig::Enabled)
        .start();

    request.in_span(SpanOptions::new("charge-card"), |tracer| {
        tracer.add_label("amount", "12.50");
    });
    let mut response = HttpResponse::new();
    response.set_status(200);
    assert!(request.finish(&response));

    let traces = reporter.get_finished_traces().unwrap();
    let spans = traces[0].spans();
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0].name(), "/checkout");
    assert_eq!(spans[0].parent_span_id(), None);
    assert_eq!(spans[1].name(), "charge-card");
    assert_eq!(spans[1].parent_span_id(), Some(spans[0].span_id()));
    assert_eq!(spans[1].labels()["amount"], "12.50");
    assert_eq!(spans[0].labels()[labels::HTTP_STATUS_CODE], "200");
    assert!(spans.iter().all(|span| span.end_time().is_some()));
}

#[test]
fn finish_closes_open_spans_innermost_first() {
    let reporter = InMemoryReporter::default();
    let mut request = RequestTracer::builder(reporter.clone())
        .with_headers(headers(&[]))
        .with_sampler_config(SamplerConfig::Enabled)
        .start();

    request.start_span(SpanOptions::new("child"));
    request.start_span(SpanOptions::new("grandchild"));
    assert!(request.finish(&HttpResponse::new()));

    let spans = reporter.get_finished_traces().unwrap()[0].spans().to_vec();
    assert_eq!(spans.len(), 3);
    assert_eq!(spans[0].name(), "main");
    assert_eq!(spans[1].parent_span_id(), Some(spans[0].span_id()));
    assert_eq!(spans[2].parent_span_id(), Some(spans[1].span_id()));

    let ends: Vec<SystemTime> = spans.iter().map(|s| s.end_time().unwrap()).collect();
    assert!(ends[2] <= ends[1]);
    assert!(ends[1] <= ends[0]);
    for span in &spans {
        assert!(span.start_time() <= span.end_time().unwrap());
    }
}

#[test]
fn qps_sampler_limits_rate() {
    let sampler = QpsSampler::new(0.1).with_cache(Arc::new(InMemorySamplerCache::new()));
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    assert!(sampler.should_sample_at(start));
    assert!(!sampler.should_sample_at(start + Duration::from_secs(1)));
    assert!(sampler.should_sample_at(start + Duration::from_secs(11)));
}

#[test]
fn redirect_location_is_recorded() {
    let reporter = InMemoryReporter::default();
    let request = RequestTracer::builder(reporter.clone())
        .with_headers(headers(&[]))
        .with_sampler_config(SamplerConfig::Enabled)
        .start();

    let mut response = HttpResponse::new();
    response.set_status(302);
    response.set_header("Location", "https://example.com/login".to_string());
    assert!(request.finish(&response));

    let traces = reporter.get_finished_traces().unwrap();
    let root = &traces[0].spans()[0];
    assert_eq!(
        root.labels()[labels::HTTP_REDIRECTED_URL],
        "https://example.com/login"
    );
    assert_eq!(root.labels()[labels::HTTP_STATUS_CODE], "302");
}

#[test]
fn inbound_header_is_echoed_on_response() {
    let mut response = HttpResponse::new();
    let request = RequestTracer::builder(InMemoryReporter::default())
        .with_headers(headers(&[(
            "X-Cloud-Trace-Context",
            &format!("{TRACE_ID}/5555;o=1"),
        )]))
        .start_with_response(&mut response);

    assert_eq!(
        response.header("x-cloud-trace-context").as_deref(),
        Some(format!("{TRACE_ID}/5555;o=1").as_str())
    );
    assert!(request.enabled());
}

#[test]
fn sent_response_is_left_alone() {
    let mut response = HttpResponse::new();
    response.mark_sent();
    let _request = RequestTracer::builder(InMemoryReporter::default())
        .with_headers(headers(&[(
            "X-Cloud-Trace-Context",
            &format!("{TRACE_ID};o=1"),
        )]))
        .start_with_response(&mut response);

    assert!(response.headers().is_empty());
}

#[test]
fn generated_context_is_not_echoed() {
    let mut response = HttpResponse::new();
    let _request = RequestTracer::builder(InMemoryReporter::default())
        .with_headers(headers(&[]))
        .with_sampler_config(SamplerConfig::Enabled)
        .start_with_response(&mut response);

    assert!(response.headers().is_empty());
}

#[test]
fn zero_padded_parent_span_id_is_kept() {
    let reporter = InMemoryReporter::default();
    let request = RequestTracer::builder(reporter.clone())
        .with_headers(headers(&[(
            "X-Cloud-Trace-Context",
            &format!("{TRACE_ID}/0000;o=1"),
        )]))
        .start();
    request.finish(&HttpResponse::new());

    let traces = reporter.get_finished_traces().unwrap();
    let trace = &traces[0];
    assert_eq!(trace.trace_id().to_string(), TRACE_ID);
    let root = &trace.spans()[0];
    assert_eq!(root.parent_span_id().map(|id| id.as_str()), Some("0000"));
}

#[test]
fn root_span_carries_agent_labels() {
    let reporter = InMemoryReporter::default();
    let request = RequestTracer::builder(reporter.clone())
        .with_headers(headers(&[
            ("REQUEST_URI", "/health"),
            ("REQUEST_METHOD", "GET"),
            ("HTTP_HOST", "api.example.com"),
        ]))
        .with_sampler_config(SamplerConfig::Enabled)
        .with_project_id("my-project")
        .start();
    request.finish(&HttpResponse::new());

    let traces = reporter.get_finished_traces().unwrap();
    let trace = &traces[0];
    assert_eq!(trace.project_id(), Some("my-project"));
    let root_labels = trace.spans()[0].labels();
    for key in [
        labels::HTTP_URL,
        labels::HTTP_METHOD,
        labels::HTTP_HOST,
        labels::PID,
        labels::AGENT,
        labels::GCO_AGENT,
    ] {
        assert!(root_labels.contains_key(key), "missing {key}");
    }
    assert_eq!(root_labels[labels::AGENT], "cloud-trace-rs");
}

#[test]
fn context_is_restored_after_request() {
    let before = Context::current();
    let request = RequestTracer::builder(InMemoryReporter::default())
        .with_headers(headers(&[(
            "X-Cloud-Trace-Context",
            &format!("{TRACE_ID};o=1"),
        )]))
        .start();

    let during = TraceContext::from_context(&Context::current()).unwrap();
    assert_eq!(during.trace_id().to_string(), TRACE_ID);
    assert_eq!(during.span_id(), request.context().span_id());

    request.finish(&HttpResponse::new());
    assert!(Context::current().ptr_eq(&before));
}
