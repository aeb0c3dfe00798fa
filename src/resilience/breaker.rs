use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tower::{Layer, Service};

use crate::error::{IntegrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit; 0 behaves like 1
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            circuit: CircuitState::Closed,
            failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn open(&mut self, now: Instant) {
        self.circuit = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }

    fn admit(&mut self, cfg: &BreakerConfig, now: Instant) -> Result<Admission> {
        match self.circuit {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                // An unrepresentable deadline means the circuit never half-opens.
                match opened_at.checked_add(cfg.recovery_timeout) {
                    Some(reopens_at) if now >= reopens_at => {}
                    Some(reopens_at) => {
                        return Err(IntegrationError::CircuitOpen {
                            retry_in: reopens_at - now,
                        })
                    }
                    None => {
                        return Err(IntegrationError::CircuitOpen {
                            retry_in: cfg
                                .recovery_timeout
                                .saturating_sub(now.saturating_duration_since(opened_at)),
                        })
                    }
                }
                tracing::info!("circuit half-open, admitting trial call");
                self.circuit = CircuitState::HalfOpen;
                self.trial_in_flight = true;
                Ok(Admission::Trial)
            }
            CircuitState::HalfOpen if self.trial_in_flight => Err(IntegrationError::CircuitOpen {
                retry_in: Duration::ZERO,
            }),
            CircuitState::HalfOpen => {
                self.trial_in_flight = true;
                Ok(Admission::Trial)
            }
        }
    }

    fn record(&mut self, cfg: &BreakerConfig, admission: Admission, ok: bool, now: Instant) {
        match (admission, ok) {
            (Admission::Trial, true) => {
                tracing::info!("trial call succeeded, circuit closed");
                self.circuit = CircuitState::Closed;
                self.failures = 0;
                self.opened_at = None;
                self.trial_in_flight = false;
            }
            (Admission::Trial, false) => {
                self.failures = self.failures.saturating_add(1);
                tracing::warn!(failures = self.failures, "trial call failed, circuit reopened");
                self.open(now);
            }
            // Outcomes of calls admitted before the circuit left Closed are ignored.
            (Admission::Normal, _) if self.circuit != CircuitState::Closed => {}
            (Admission::Normal, true) => self.failures = 0,
            (Admission::Normal, false) => {
                self.failures = self.failures.saturating_add(1);
                if self.failures >= cfg.failure_threshold.max(1) {
                    tracing::warn!(
                        failures = self.failures,
                        recovery_timeout = ?cfg.recovery_timeout,
                        "failure threshold reached, circuit opened"
                    );
                    self.open(now);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

type SharedState = Arc<Mutex<BreakerState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, BreakerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the half-open trial slot if the trial call is dropped before it
/// reports an outcome.
struct TrialGuard {
    state: SharedState,
    armed: bool,
}

impl TrialGuard {
    fn new(state: SharedState, admission: Admission) -> Self {
        Self {
            state,
            armed: admission == Admission::Trial,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("trial call cancelled, releasing trial slot");
            lock(&self.state).trial_in_flight = false;
        }
    }
}

/// Read-only view of a breaker's state.
#[derive(Debug, Clone)]
pub struct BreakerMonitor {
    state: SharedState,
}

impl BreakerMonitor {
    /// Stored state. An `Open` circuit whose recovery timeout has passed
    /// reports `Open` until the next call moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        lock(&self.state).circuit
    }

    /// Consecutive failures counted so far.
    pub fn failures(&self) -> u32 {
        lock(&self.state).failures
    }
}

/// Stops calling a failing upstream for a while.
///
/// All services produced by one layer (and its clones) share a single
/// circuit, so one `CircuitBreakerLayer` should guard one method.
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    cfg: BreakerConfig,
    state: SharedState,
}

impl CircuitBreakerLayer {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            state: Arc::new(Mutex::new(BreakerState::new())),
        }
    }

    pub fn monitor(&self) -> BreakerMonitor {
        BreakerMonitor {
            state: self.state.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker<S> {
    inner: S,
    cfg: BreakerConfig,
    state: SharedState,
}

impl<S> CircuitBreaker<S> {
    pub fn monitor(&self) -> BreakerMonitor {
        BreakerMonitor {
            state: self.state.clone(),
        }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreaker<S>;
    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreaker {
            inner,
            cfg: self.cfg,
            state: self.state.clone(),
        }
    }
}

impl<S, Req> Service<Req> for CircuitBreaker<S>
where
    Req: Send + 'static,
    S: Service<Req, Error = IntegrationError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = IntegrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Keep the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let cfg = self.cfg;
        let state = self.state.clone();
        Box::pin(async move {
            let admission = {
                let mut s = lock(&state);
                match s.admit(&cfg, Instant::now()) {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "call rejected by circuit breaker");
                        return Err(e);
                    }
                }
            };
            let mut guard = TrialGuard::new(state.clone(), admission);
            let result = inner.call(req).await;
            guard.disarm();
            lock(&state).record(&cfg, admission, result.is_ok(), Instant::now());
            result
        })
    }
}
