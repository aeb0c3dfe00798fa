use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::runtime::Runtime;
use tower_integrations::{
    patch_integration, Backoff, BreakerConfig, CallContext, CircuitBreakerLayer, Endpoint,
    EndpointDescriptor, Integration, MockRules, RetryLayer, ThrottleLayer, TimeoutLayer,
};

fn api() -> Integration {
    Integration::builder("Bench")
        .base_url("https://bench.example.com")
        .build()
        .unwrap()
}

fn echo(api: &Integration, name: &str) -> tower_integrations::EndpointBuilder<u64> {
    api.endpoint(name, EndpointDescriptor::get("/echo").unwrap())
        .handler(|_ctx: CallContext, n: u64| async move { Ok(json!({ "n": n })) })
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let api = api();

    let bare: Endpoint<u64, Value> = echo(&api, "bare").build().unwrap();
    let layered: Endpoint<u64, Value> = echo(&api, "layered")
        .layer(TimeoutLayer::new(Duration::from_secs(5)))
        .layer(CircuitBreakerLayer::new(BreakerConfig::default()))
        .layer(RetryLayer::attempts(3, Backoff::none()))
        .layer(ThrottleLayer::new(u32::MAX, Duration::from_secs(60)))
        .build()
        .unwrap();
    let rules = MockRules::new().respond_with(&bare, json!({ "n": 0 }));

    // Handler only
    c.bench_function("dispatch_bare", |b| {
        b.to_async(&rt).iter(|| async { bare.invoke(1).await.unwrap() })
    });

    // Full stability chain around the same handler
    c.bench_function("dispatch_four_layers", |b| {
        b.to_async(&rt).iter(|| async { layered.invoke(1).await.unwrap() })
    });

    // Mock lookup and replacement
    c.bench_function("dispatch_mocked", |b| {
        b.to_async(&rt)
            .iter(|| patch_integration(rules.clone(), async { bare.invoke(1).await.unwrap() }))
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
