//! Stability patterns applied to declared endpoints.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{advance, Instant};
use tower_integrations::{
    Backoff, BreakerConfig, Call, CallContext, CircuitBreakerLayer, CircuitState,
    EndpointDescriptor, FallbackLayer, HttpResponse, Integration, IntegrationError, RetryLayer,
    StabilityConfig, ThrottleLayer, TimeoutLayer,
};

fn api() -> Integration {
    Integration::builder("Stable")
        .base_url("https://stable.example.com/v1")
        .build()
        .unwrap()
}

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let c = Arc::new(AtomicUsize::new(0));
    (c.clone(), c)
}

#[tokio::test(start_paused = true)]
async fn retry_success_is_returned_after_one_call() {
    let (calls, calls_cl) = counter();
    let endpoint = api()
        .endpoint("ok", EndpointDescriptor::get("/ok").unwrap())
        .handler(move |_ctx: CallContext, _args: ()| {
            calls_cl.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!({"v": 1})) }
        })
        .layer(RetryLayer::attempts(5, Backoff::fixed(Duration::from_secs(1))))
        .build::<Value>()
        .unwrap();

    assert_eq!(endpoint.invoke(()).await.unwrap(), json!({"v": 1}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_reraises_last_error() {
    let (calls, calls_cl) = counter();
    let endpoint = api()
        .endpoint("down", EndpointDescriptor::get("/down").unwrap())
        .handler(move |_ctx: CallContext, _args: ()| {
            let n = calls_cl.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err::<Value, _>(IntegrationError::transport(format!("attempt {n} refused"))) }
        })
        .layer(RetryLayer::attempts(3, Backoff::fixed(Duration::from_millis(50))))
        .build::<Value>()
        .unwrap();

    let err = endpoint.invoke(()).await.unwrap_err();
    match err {
        IntegrationError::Transport { message, .. } => assert_eq!(message, "attempt 3 refused"),
        e => panic!("unexpected error: {e:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_and_recovers() {
    let (calls, calls_cl) = counter();
    let failing = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let failing_cl = failing.clone();
    let breaker = CircuitBreakerLayer::new(BreakerConfig::new(3, Duration::from_secs(30)));
    let monitor = breaker.monitor();

    let endpoint = api()
        .endpoint("flaky", EndpointDescriptor::get("/flaky").unwrap())
        .handler(move |_ctx: CallContext, _args: ()| {
            calls_cl.fetch_add(1, Ordering::SeqCst);
            let fail = failing_cl.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(IntegrationError::transport("reset by peer"))
                } else {
                    Ok(json!("up"))
                }
            }
        })
        .layer(breaker)
        .build::<Value>()
        .unwrap();

    for _ in 0..3 {
        assert!(endpoint.invoke(()).await.is_err());
    }
    assert_eq!(monitor.state(), CircuitState::Open);

    let err = endpoint.invoke(()).await.unwrap_err();
    assert!(matches!(err, IntegrationError::CircuitOpen { .. }));
    assert_eq!(err.http_status(), Some(503));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    advance(Duration::from_secs(30)).await;
    failing.store(false, Ordering::SeqCst);
    assert_eq!(endpoint.invoke(()).await.unwrap(), json!("up"));
    assert_eq!(monitor.state(), CircuitState::Closed);
    assert_eq!(monitor.failures(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn fallback_substitutes_a_success() {
    let endpoint = api()
        .endpoint("translate", EndpointDescriptor::post("/translate").unwrap())
        .handler(|_ctx: CallContext, _text: String| async move {
            Err::<Value, _>(IntegrationError::transport("unreachable"))
        })
        .layer(FallbackLayer::new(|_call: Call<String>| async move {
            Ok::<_, IntegrationError>(json!({"text": "ok"}))
        }))
        .build::<Value>()
        .unwrap();

    let out = endpoint.invoke("Hello".to_string()).await.unwrap();
    assert_eq!(out, json!({"text": "ok"}));
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_at_the_deadline() {
    let endpoint = api()
        .endpoint("hang", EndpointDescriptor::get("/hang").unwrap())
        .handler(|_ctx: CallContext, _args: ()| async move {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        })
        .layer(TimeoutLayer::new(Duration::from_millis(250)))
        .build::<Value>()
        .unwrap();

    let started = Instant::now();
    let err = endpoint.invoke(()).await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, IntegrationError::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(260));
}

#[tokio::test(start_paused = true)]
async fn error_shaped_response_is_not_retried() {
    let (calls, calls_cl) = counter();
    let endpoint = api()
        .endpoint("soft_fail", EndpointDescriptor::get("/soft").unwrap())
        .handler(move |_ctx: CallContext, _args: ()| {
            calls_cl.fetch_add(1, Ordering::SeqCst);
            // A 500 that is returned rather than raised.
            let resp = HttpResponse {
                status: 500,
                body: json!({"error": "internal"}),
            };
            async move { Ok(resp.into_body()) }
        })
        .layer(RetryLayer::attempts(3, Backoff::none()))
        .build::<Value>()
        .unwrap();

    let out = endpoint.invoke(()).await.unwrap();
    assert_eq!(out, json!({"error": "internal"}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn raised_status_is_retried() {
    let (calls, calls_cl) = counter();
    let endpoint = api()
        .endpoint("hard_fail", EndpointDescriptor::get("/hard").unwrap())
        .handler(move |_ctx: CallContext, _args: ()| {
            calls_cl.fetch_add(1, Ordering::SeqCst);
            let resp = HttpResponse {
                status: 500,
                body: json!({"error": "internal"}),
            };
            async move { Ok::<_, IntegrationError>(resp.error_for_status()?.into_body()) }
        })
        .layer(RetryLayer::attempts(3, Backoff::none()))
        .build::<Value>()
        .unwrap();

    let err = endpoint.invoke(()).await.unwrap_err();
    assert!(matches!(err, IntegrationError::Status { status: 500, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn throttle_budget_resets_per_window() {
    let (calls, calls_cl) = counter();
    let endpoint = api()
        .endpoint("limited", EndpointDescriptor::get("/limited").unwrap())
        .handler(move |_ctx: CallContext, _args: ()| {
            calls_cl.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Value::Null) }
        })
        .layer(ThrottleLayer::new(2, Duration::from_secs(10)))
        .build::<Value>()
        .unwrap();

    endpoint.invoke(()).await.unwrap();
    endpoint.invoke(()).await.unwrap();
    let err = endpoint.invoke(()).await.unwrap_err();
    assert!(matches!(err, IntegrationError::Throttled { limit: 2, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    advance(Duration::from_secs(10)).await;
    endpoint.invoke(()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn stability_config_builds_a_working_chain() {
    let (calls, calls_cl) = counter();
    let config: StabilityConfig = serde_json::from_value(json!({
        "timeout_ms": 1000,
        "retry": { "max_attempts": 3, "initial_delay_ms": 10, "backoff_multiplier": 1.0, "jitter": false },
        "circuit_breaker": { "failure_threshold": 10 },
        "throttle": { "limit": 1, "window_ms": 60000 }
    }))
    .unwrap();

    let endpoint = api()
        .endpoint("configured", EndpointDescriptor::get("/configured").unwrap())
        .handler(move |_ctx: CallContext, _args: ()| {
            let n = calls_cl.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(IntegrationError::transport("flaky"))
                } else {
                    Ok(json!("done"))
                }
            }
        })
        .stability(&config)
        .build::<Value>()
        .unwrap();

    // Throttle is outermost, so three attempts consume a single unit.
    assert_eq!(endpoint.invoke(()).await.unwrap(), json!("done"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(
        endpoint.invoke(()).await.unwrap_err(),
        IntegrationError::Throttled { .. }
    ));
}

#[tokio::test]
async fn invalid_stability_config_fails_the_declaration() {
    let config: StabilityConfig = serde_json::from_value(json!({
        "retry": { "max_attempts": 3, "backoff_multiplier": -2.0 }
    }))
    .unwrap();

    let api = api();
    let result = api
        .endpoint("misconfigured", EndpointDescriptor::get("/misconfigured").unwrap())
        .handler(|_ctx: CallContext, _args: ()| async move {
            Err::<Value, _>(IntegrationError::transport("down"))
        })
        .stability(&config)
        .build::<Value>();

    assert!(matches!(result, Err(IntegrationError::Configuration(_))));
    assert!(api.methods().is_empty());
}
