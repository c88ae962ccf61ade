//! Request path benchmarks
//!
//! Fingerprinting, response cache lookups and the full orchestrator path for
//! a cache hit and for a scripted network call.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use http::Method;
use std::sync::Arc;
use std::time::Duration;

use kawaraban::cache::ResponseCache;
use kawaraban::config::Config;
use kawaraban::request::{RequestFingerprint, Response};
use kawaraban::transport::ScriptedTransport;
use kawaraban::{RequestDescriptor, RequestOrchestrator};

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    group.bench_function("get_without_body", |b| {
        b.iter(|| {
            RequestFingerprint::compute(
                black_box(&Method::GET),
                black_box("https://api.example.com/v1/feeds?page=2"),
                None,
            )
        })
    });

    // Typical mark-as-read payload
    let body = br#"{"article_ids":[101,102,103,104,105],"read":true}"#;
    group.bench_function("post_with_body", |b| {
        b.iter(|| {
            RequestFingerprint::compute(
                black_box(&Method::POST),
                black_box("https://api.example.com/v1/articles/read"),
                Some(black_box(body.as_slice())),
            )
        })
    });

    group.finish();
}

fn bench_cache_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_cache");

    let cache = ResponseCache::new(Duration::from_secs(300), 1000);
    let keys: Vec<RequestFingerprint> = (0..1000)
        .map(|i| {
            RequestFingerprint::compute(&Method::GET, &format!("https://api/feeds/{}", i), None)
        })
        .collect();
    for key in &keys {
        cache.set(key.clone(), Response::new(200, "[]"));
    }
    let missing = RequestFingerprint::compute(&Method::GET, "https://api/missing", None);

    group.bench_function("hit", |b| b.iter(|| cache.get(black_box(&keys[500]))));
    group.bench_function("miss", |b| b.iter(|| cache.get(black_box(&missing))));

    group.finish();
}

fn bench_orchestrator(c: &mut Criterion) {
    let mut group = c.benchmark_group("orchestrator");
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");

    let mut config = Config::default();
    config.api.base_url = "https://api.example.com".into();
    let transport = ScriptedTransport::new();
    transport.set_fallback(kawaraban::transport::Scripted::Respond(Response::new(
        200,
        r#"{"feeds":[]}"#,
    )));
    let orchestrator =
        RequestOrchestrator::new(&config, Arc::new(transport)).expect("orchestrator");

    rt.block_on(async {
        orchestrator
            .execute(RequestDescriptor::get("/feeds"))
            .await
            .expect("warm cache")
    });

    group.bench_function("cache_hit", |b| {
        b.iter(|| rt.block_on(orchestrator.execute(RequestDescriptor::get("/feeds"))))
    });

    group.bench_function("network_call", |b| {
        b.iter(|| rt.block_on(orchestrator.execute(RequestDescriptor::post("/articles/read"))))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_cache_lookup,
    bench_orchestrator
);
criterion_main!(benches);
