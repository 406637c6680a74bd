use cloud_trace::export::NullReporter;
use cloud_trace::trace::{
    ContextTracer, HttpResponse, InMemorySamplerCache, QpsSampler, RequestTracer, Sampler,
    SamplerConfig, ShouldSample, SpanOptions, Tracer,
};
use cloud_trace::TraceContext;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use std::sync::Arc;

// Run this benchmark with:
// cargo bench --bench tracer

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracer");

    group.bench_function("nested_spans", |b| {
        b.iter(|| {
            let context = TraceContext::parse("105445aa7843bc8bf206b12000100000;o=1")
                .unwrap_or_else(|| TraceContext::from_headers(&HashMap::<String, String>::new()));
            let mut tracer = Tracer::Context(ContextTracer::new(context));
            tracer.in_span(SpanOptions::new("outer"), |tracer| {
                tracer.add_label("k", "v");
                tracer.in_span(SpanOptions::new("inner"), |_| black_box(1 + 1))
            })
        })
    });

    for (name, config) in [
        ("request_enabled", SamplerConfig::Enabled),
        ("request_disabled", SamplerConfig::Disabled),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut request = RequestTracer::builder(NullReporter::new())
                    .with_headers(HashMap::from([(
                        "REQUEST_URI".to_string(),
                        "/bench".to_string(),
                    )]))
                    .with_sampler_config(config.clone())
                    .start();
                request.in_span(SpanOptions::new("work"), |_| black_box(1 + 1));
                request.finish(&HttpResponse::new())
            })
        });
    }
    group.finish();

    let mut group = c.benchmark_group("sampler");
    let qps = QpsSampler::new(1000.0).with_cache(Arc::new(InMemorySamplerCache::new()));
    group.bench_function("qps", |b| b.iter(|| black_box(&qps).should_sample()));
    let random = Sampler::Random(0.5);
    group.bench_function("random", |b| b.iter(|| black_box(&random).should_sample()));
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(1))
        .measurement_time(std::time::Duration::from_secs(2));
    targets = criterion_benchmark
}
criterion_main!(benches);
