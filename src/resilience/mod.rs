//! Stability patterns: timeout, retry, circuit breaker, fallback, throttling
//!
//! What this module provides
//! - Tower middleware that wraps an endpoint's call and keeps its
//!   `Result<Value, IntegrationError>` contract
//!
//! Exports
//! - Layers
//!   - `TimeoutLayer(Duration)`
//!   - `RetryLayer<Classifier>` with `RetryPolicy { max_attempts, backoff }`
//!   - `CircuitBreakerLayer` (stateful gate) with `BreakerConfig { failure_threshold, recovery_timeout }`
//!   - `FallbackLayer<F>` (substitute callable)
//!   - `ThrottleLayer` (fixed window budget)
//! - Utils
//!   - Backoff builders (fixed, exponential, jitter), `AlwaysRetry` and `TransientOnly` classifiers
//!   - `BreakerMonitor` for read-only inspection of a circuit
//!
//! Implementation strategy
//! - Timeout: race the inner future against `tokio::time::timeout`; losing drops it
//! - Retry: clone the inner service per attempt and `oneshot` it; attempts are sequential
//! - Circuit breaker: failure counter and state behind a `std::sync::Mutex` shared by
//!   every service built from the layer; half-open admits exactly one trial call
//! - Fallback: on error, call the substitute with a clone of the request
//! - Throttle: fixed window counter behind a `std::sync::Mutex`; over budget fails fast
//!
//! Only a raised error counts as failure. A handler that returns an error-shaped
//! payload (a 500 body, `{"error": ..}`) succeeds as far as these layers are
//! concerned; use `HttpResponse::error_for_status` to raise instead.
//!
//! Composition
//! - Layers nest in declaration order: `EndpointBuilder::layer` wraps everything
//!   added before it, so the last layer added is the outermost
//! - Example: `.layer(TimeoutLayer::from_secs(5)).layer(RetryLayer::attempts(3, backoff))`
//!   gives every attempt its own 5s deadline
//!
//! Testing strategy
//! - Fake services that error in a scripted pattern (e.g., E E S) assert retry counts
//! - Paused tokio time drives breaker recovery, throttle windows and timeouts

mod breaker;
mod fallback;
mod retry;
mod throttle;
mod timeout;

pub use breaker::{BreakerConfig, BreakerMonitor, CircuitBreaker, CircuitBreakerLayer, CircuitState};
pub use fallback::{Fallback, FallbackLayer};
pub use retry::{
    AlwaysRetry, Backoff, BackoffKind, ErrorClassifier, Retry, RetryLayer, RetryPolicy,
    TransientOnly,
};
pub use throttle::{Throttle, ThrottleLayer};
pub use timeout::{Timeout, TimeoutLayer};
