use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tower::{Layer, Service};

use crate::error::{IntegrationError, Result};

#[derive(Debug)]
struct Window {
    started: Option<Instant>,
    used: u32,
}

impl Window {
    /// Consume one unit of the current window's budget.
    fn try_acquire(&mut self, limit: u32, len: Duration, now: Instant) -> bool {
        match self.started {
            Some(start) if now.duration_since(start) < len => {}
            _ => {
                self.started = Some(now);
                self.used = 0;
            }
        }
        if self.used >= limit {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Caps the number of calls admitted per fixed time window.
///
/// The window opens with the first call after the previous one expired.
/// Calls over budget fail with [`IntegrationError::Throttled`] without
/// reaching the wrapped service. Services built from one layer share the
/// budget.
#[derive(Debug, Clone)]
pub struct ThrottleLayer {
    limit: u32,
    window: Duration,
    state: Arc<Mutex<Window>>,
}

impl ThrottleLayer {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Arc::new(Mutex::new(Window {
                started: None,
                used: 0,
            })),
        }
    }

    pub fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }
}

#[derive(Debug, Clone)]
pub struct Throttle<S> {
    inner: S,
    limit: u32,
    window: Duration,
    state: Arc<Mutex<Window>>,
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = Throttle<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Throttle {
            inner,
            limit: self.limit,
            window: self.window,
            state: self.state.clone(),
        }
    }
}

impl<S, Req> Service<Req> for Throttle<S>
where
    S: Service<Req, Error = IntegrationError> + Send + 'static,
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
        let admitted = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(self.limit, self.window, Instant::now());
        if !admitted {
            tracing::warn!(limit = self.limit, window = ?self.window, "call throttled");
            let err = IntegrationError::Throttled {
                limit: self.limit,
                window: self.window,
            };
            return Box::pin(async move { Err(err) });
        }
        Box::pin(self.inner.call(req))
    }
}
