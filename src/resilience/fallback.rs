use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::error::{IntegrationError, Result};

/// Turns a raised error into the result of a substitute callable.
///
/// The callable receives the same request the wrapped service got. Whatever
/// it returns is final: an error raised by the fallback propagates as is.
pub struct FallbackLayer<F> {
    f: Arc<F>,
}

impl<F> FallbackLayer<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<F> Clone for FallbackLayer<F> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<F> std::fmt::Debug for FallbackLayer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackLayer").finish_non_exhaustive()
    }
}

pub struct Fallback<S, F> {
    inner: S,
    f: Arc<F>,
}

impl<S: Clone, F> Clone for Fallback<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            f: self.f.clone(),
        }
    }
}

impl<S, F> Layer<S> for FallbackLayer<F> {
    type Service = Fallback<S, F>;
    fn layer(&self, inner: S) -> Self::Service {
        Fallback {
            inner,
            f: self.f.clone(),
        }
    }
}

impl<S, F, Fut, Req> Service<Req> for Fallback<S, F>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Error = IntegrationError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S::Response>> + Send + 'static,
{
    type Response = S::Response;
    type Error = IntegrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let fut = self.inner.call(req.clone());
        let f = self.f.clone();
        Box::pin(async move {
            match fut.await {
                Ok(resp) => Ok(resp),
                Err(e) => {
                    tracing::warn!(error = %e, "call failed, using fallback");
                    f(req).await
                }
            }
        })
    }
}
