use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::timeout;
use tower::{Layer, Service};

use crate::error::{IntegrationError, Result};

/// Races the wrapped call against a deadline.
///
/// When the deadline wins the in-flight future is dropped, which cancels
/// the underlying request on a best-effort basis; the caller gets
/// [`IntegrationError::Timeout`] right away either way.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    dur: Duration,
}

impl TimeoutLayer {
    pub fn new(dur: Duration) -> Self {
        Self { dur }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }
}

#[derive(Debug, Clone)]
pub struct Timeout<S> {
    inner: S,
    dur: Duration,
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            dur: self.dur,
        }
    }
}

impl<S, Req> Service<Req> for Timeout<S>
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
        let fut = self.inner.call(req);
        let dur = self.dur;
        Box::pin(async move {
            match timeout(dur, fut).await {
                Ok(r) => r,
                Err(_) => {
                    tracing::warn!(after = ?dur, "integration call timed out");
                    Err(IntegrationError::Timeout { after: dur })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};
    use tower::{service_fn, ServiceExt};

    #[tokio::test(start_paused = true)]
    async fn timeout_triggers_error() {
        let svc = service_fn(|()| async move {
            std::future::pending::<()>().await;
            Ok::<(), IntegrationError>(())
        });
        let started = Instant::now();
        let err = TimeoutLayer::new(Duration::from_millis(50))
            .layer(svc)
            .oneshot(())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Timeout { after } if after == Duration::from_millis(50)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_passes_through() {
        let svc = service_fn(|x: u32| async move {
            sleep(Duration::from_millis(5)).await;
            Ok::<u32, IntegrationError>(x + 1)
        });
        let out = TimeoutLayer::from_secs(1).layer(svc).oneshot(1).await.unwrap();
        assert_eq!(out, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inner_errors_are_not_converted() {
        let svc = service_fn(|()| async move {
            Err::<(), IntegrationError>(IntegrationError::transport("refused"))
        });
        let err = TimeoutLayer::from_secs(1).layer(svc).oneshot(()).await.unwrap_err();
        assert!(matches!(err, IntegrationError::Transport { .. }));
    }
}
