use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tower::{Layer, Service, ServiceExt};

use crate::error::{IntegrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Delay between retry attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub initial: Duration,
    pub factor: f32,
    pub max: Duration,
    /// Add up to 30% random extra delay to spread out synchronized retries
    pub jitter: bool,
}

impl Backoff {
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            initial: delay,
            factor: 1.0,
            max: delay,
            jitter: false,
        }
    }

    pub fn exponential(initial: Duration, factor: f32, max: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            initial,
            factor,
            max,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt + 1` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = match self.kind {
            BackoffKind::Fixed => self.initial,
            BackoffKind::Exponential => {
                let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = self.initial.as_secs_f64() * f64::from(self.factor).powi(exp);
                if !secs.is_finite() || secs >= self.max.as_secs_f64() {
                    self.max
                } else if secs <= 0.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        };
        if self.jitter && !base.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..0.3);
            base + base.mul_f64(extra)
        } else {
            base
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

/// `max_attempts` counts the first call; 0 behaves like 1.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Backoff::default())
    }
}

/// Decides whether a raised error may be retried.
pub trait ErrorClassifier: Send + Sync + 'static {
    fn retryable(&self, error: &IntegrationError) -> bool;
}

/// Retry every raised error.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;
impl ErrorClassifier for AlwaysRetry {
    fn retryable(&self, _error: &IntegrationError) -> bool {
        true
    }
}

/// Retry only errors for which [`IntegrationError::is_transient`] holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientOnly;
impl ErrorClassifier for TransientOnly {
    fn retryable(&self, error: &IntegrationError) -> bool {
        error.is_transient()
    }
}

/// Re-invokes the wrapped service when it raises.
///
/// Attempts of one call run strictly one after another. When every attempt
/// fails the last error is returned unchanged. A returned value is never
/// retried, whatever it contains.
#[derive(Debug, Clone)]
pub struct RetryLayer<C = AlwaysRetry> {
    policy: RetryPolicy,
    classifier: C,
}

impl RetryLayer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: AlwaysRetry,
        }
    }

    pub fn attempts(max_attempts: u32, backoff: Backoff) -> Self {
        Self::new(RetryPolicy::new(max_attempts, backoff))
    }
}

impl<C> RetryLayer<C> {
    pub fn with_classifier<C2: ErrorClassifier>(self, classifier: C2) -> RetryLayer<C2> {
        RetryLayer {
            policy: self.policy,
            classifier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retry<S, C> {
    inner: S,
    policy: RetryPolicy,
    classifier: C,
}

impl<S, C> Layer<S> for RetryLayer<C>
where
    C: Clone,
{
    type Service = Retry<S, C>;
    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            policy: self.policy,
            classifier: self.classifier.clone(),
        }
    }
}

impl<S, C, Req> Service<Req> for Retry<S, C>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Error = IntegrationError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    C: ErrorClassifier + Clone,
{
    type Response = S::Response;
    type Error = IntegrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let policy = self.policy;
        let classifier = self.classifier.clone();
        let inner = self.inner.clone();
        let max_attempts = policy.max_attempts.max(1);
        Box::pin(async move {
            let mut attempt: u32 = 1;
            loop {
                match inner.clone().oneshot(req.clone()).await {
                    Ok(resp) => {
                        if attempt > 1 {
                            tracing::debug!(attempt, "call succeeded after retry");
                        }
                        return Ok(resp);
                    }
                    Err(e) => {
                        if attempt >= max_attempts {
                            if max_attempts > 1 {
                                tracing::warn!(attempts = attempt, error = %e, "retries exhausted");
                            }
                            return Err(e);
                        }
                        if !classifier.retryable(&e) {
                            tracing::debug!(error = %e, "error is not retryable");
                            return Err(e);
                        }
                        let delay = policy.backoff.delay_for_attempt(attempt - 1);
                        tracing::warn!(attempt, max_attempts, ?delay, error = %e, "retrying call");
                        sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        })
    }
}
