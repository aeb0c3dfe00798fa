//! Endpoint declaration and dispatch
//!
//! Declaring an endpoint produces a tower service stack:
//!
//! ```text
//! Endpoint::invoke
//!   ├─ mock scope active, replacement found → replacement(ctx without client, args)
//!   ├─ mock scope active, no replacement    → IntegrationError::MissingMock
//!   └─ no mock scope → outermost layer → … → innermost layer → HandlerService → handler(ctx, args)
//! ```
//!
//! Layers added with [`EndpointBuilder::layer`] wrap everything added before
//! them, so the last layer is the outermost one. The declared order is never
//! changed. Whatever path is taken, the raw JSON result is converted into the
//! declared response type afterwards.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};
use tracing::Instrument;

use crate::config::StabilityConfig;
use crate::context::CallContext;
use crate::endpoint::{EndpointDescriptor, MethodId, PathArgs};
use crate::error::{IntegrationError, Result};
use crate::integration::{Integration, MethodDoc};
use crate::mock::{self, Lookup};
use crate::schema::convert_response;

/// Type-erased integration method body: `(context, args) -> raw JSON`.
pub type Handler<Req> =
    Arc<dyn Fn(CallContext, Req) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// The service type every stability layer wraps and produces.
pub type EndpointStack<Req> = BoxCloneSyncService<Call<Req>, Value, IntegrationError>;

pub(crate) fn boxed_handler<Req, F, Fut>(f: F) -> Handler<Req>
where
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx, args| f(ctx, args).boxed())
}

/// Caller input for one invocation: typed arguments plus path placeholder values.
#[derive(Debug, Clone, PartialEq)]
pub struct Call<Req> {
    pub args: Req,
    pub path: PathArgs,
}

impl<Req> Call<Req> {
    pub fn new(args: Req) -> Self {
        Self {
            args,
            path: PathArgs::new(),
        }
    }

    pub fn with_path(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path.insert(name, value);
        self
    }

    pub fn with_path_args(mut self, path: PathArgs) -> Self {
        self.path = path;
        self
    }
}

impl<Req> From<Req> for Call<Req> {
    fn from(args: Req) -> Self {
        Call::new(args)
    }
}

/// Innermost service: builds a fresh [`CallContext`] and runs the handler.
pub struct HandlerService<Req> {
    integration: Integration,
    id: MethodId,
    descriptor: Arc<EndpointDescriptor>,
    handler: Handler<Req>,
}

impl<Req> Clone for HandlerService<Req> {
    fn clone(&self) -> Self {
        Self {
            integration: self.integration.clone(),
            id: self.id.clone(),
            descriptor: self.descriptor.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<Req> Service<Call<Req>> for HandlerService<Req>
where
    Req: Send + 'static,
{
    type Response = Value;
    type Error = IntegrationError;
    type Future = BoxFuture<'static, Result<Value>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        match self
            .integration
            .call_context(&self.id, &self.descriptor, &call.path)
        {
            Ok(ctx) => (self.handler)(ctx, call.args),
            Err(e) => futures::future::ready(Err(e)).boxed(),
        }
    }
}

/// First step of a declaration: name, descriptor and documentation.
pub struct Declaration {
    integration: Integration,
    name: String,
    descriptor: EndpointDescriptor,
    doc: String,
}

impl Declaration {
    pub(crate) fn new(integration: Integration, name: String, descriptor: EndpointDescriptor) -> Self {
        Self {
            integration,
            name,
            descriptor,
            doc: String::new(),
        }
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// Attach the method body. It receives the call context first, then the
    /// caller's arguments, and returns the raw payload or raises an error.
    pub fn handler<Req, F, Fut>(self, f: F) -> EndpointBuilder<Req>
    where
        Req: Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let id = self.integration.method_id(&self.name);
        let descriptor = Arc::new(self.descriptor);
        let handler = boxed_handler(f);
        let base = HandlerService {
            integration: self.integration.clone(),
            id: id.clone(),
            descriptor: descriptor.clone(),
            handler,
        };
        EndpointBuilder {
            integration: self.integration,
            id,
            name: self.name,
            doc: self.doc,
            descriptor,
            stack: BoxCloneSyncService::new(base),
            config_error: None,
        }
    }
}

/// Second step of a declaration: the stability layers, in order.
pub struct EndpointBuilder<Req> {
    integration: Integration,
    id: MethodId,
    name: String,
    doc: String,
    descriptor: Arc<EndpointDescriptor>,
    stack: EndpointStack<Req>,
    config_error: Option<IntegrationError>,
}

impl<Req> EndpointBuilder<Req>
where
    Req: Send + 'static,
{
    /// Wrap everything declared so far in `layer`.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<EndpointStack<Req>>,
        L::Service: Service<Call<Req>, Response = Value, Error = IntegrationError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Call<Req>>>::Future: Send + 'static,
    {
        self.stack = BoxCloneSyncService::new(layer.layer(self.stack));
        self
    }

    /// Apply the layers described by a [`StabilityConfig`].
    ///
    /// An invalid configuration adds no layers and makes [`build`](Self::build)
    /// fail with [`IntegrationError::Configuration`].
    pub fn stability(mut self, config: &StabilityConfig) -> Self
    where
        Req: Clone,
    {
        match config.validate() {
            Ok(()) => config.layer_onto(self),
            Err(e) => {
                self.config_error.get_or_insert(e);
                self
            }
        }
    }

    /// Register the endpoint with its integration and finish the declaration.
    ///
    /// Fails if the integration already has a method with the same name, or
    /// if an invalid [`StabilityConfig`] was applied.
    pub fn build<Resp>(self) -> Result<Endpoint<Req, Resp>>
    where
        Resp: DeserializeOwned + Send + 'static,
    {
        if let Some(e) = self.config_error {
            return Err(e);
        }
        let doc = MethodDoc {
            name: self.name,
            doc: self.doc,
            http_method: self.descriptor.method(),
            path: self.descriptor.path().to_string(),
            version: self.descriptor.version().to_string(),
            doc_url: self.descriptor.doc_url().map(str::to_string),
            request_type: std::any::type_name::<Req>().to_string(),
            response_type: std::any::type_name::<Resp>().to_string(),
        };
        self.integration.register(doc, self.descriptor.clone())?;

        Ok(Endpoint {
            integration: self.integration,
            id: self.id,
            descriptor: self.descriptor,
            stack: self.stack,
            _resp: PhantomData,
        })
    }
}

enum Route<Req> {
    Real(EndpointStack<Req>),
    Mock(Arc<mock::MockEntry>),
    Missing,
}

/// A declared integration method, ready to be called.
///
/// Cloning is cheap; clones share the layer state (circuit breaker counters,
/// throttle budgets) of the original declaration.
pub struct Endpoint<Req, Resp = Value> {
    integration: Integration,
    id: MethodId,
    descriptor: Arc<EndpointDescriptor>,
    stack: EndpointStack<Req>,
    _resp: PhantomData<fn() -> Resp>,
}

impl<Req, Resp> Clone for Endpoint<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            integration: self.integration.clone(),
            id: self.id.clone(),
            descriptor: self.descriptor.clone(),
            stack: self.stack.clone(),
            _resp: PhantomData,
        }
    }
}

impl<Req, Resp> fmt::Debug for Endpoint<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<Req, Resp> Endpoint<Req, Resp>
where
    Req: Send + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    pub fn id(&self) -> &MethodId {
        &self.id
    }

    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    pub fn integration(&self) -> &Integration {
        &self.integration
    }

    /// Invoke the method.
    ///
    /// The mock scope is inspected when this is called, not when the future
    /// is first polled, so a future moved to another task keeps the caller's
    /// scope.
    pub fn invoke(&self, call: impl Into<Call<Req>>) -> impl Future<Output = Result<Resp>> + Send + 'static {
        let call = call.into();
        let route = match mock::lookup(&self.id) {
            Lookup::Inactive => Route::Real(self.stack.clone()),
            Lookup::Found(entry) => Route::Mock(entry),
            Lookup::Missing => Route::Missing,
        };
        let integration = self.integration.clone();
        let descriptor = self.descriptor.clone();
        let id = self.id.clone();
        let span = tracing::debug_span!(
            "integration_call",
            integration = %id.integration(),
            method = %id.method()
        );

        async move {
            let raw = match route {
                Route::Real(stack) => stack.oneshot(call).await?,
                Route::Mock(entry) => {
                    let handler = entry.handler::<Req>().cloned().ok_or_else(|| {
                        IntegrationError::configuration(format!(
                            "mock for {id} was registered with a different argument type"
                        ))
                    })?;
                    let ctx = integration.mock_context(&id, &descriptor, &call.path);
                    entry.record_hit();
                    tracing::debug!("serving mock replacement");
                    handler(ctx, call.args).await?
                }
                Route::Missing => {
                    tracing::error!("no mock replacement in the active scope");
                    return Err(IntegrationError::MissingMock { method: id });
                }
            };
            convert_response::<Resp>(raw)
        }
        .instrument(span)
    }
}

impl<Req, Resp> Service<Call<Req>> for Endpoint<Req, Resp>
where
    Req: Send + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    type Response = Resp;
    type Error = IntegrationError;
    type Future = BoxFuture<'static, Result<Resp>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        self.invoke(call).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    fn api() -> Integration {
        Integration::builder("Users")
            .base_url("https://users.example.com/api")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn handler_receives_resolved_context() {
        let api = api();
        let get_user = api
            .endpoint("get_user", EndpointDescriptor::get("/users/{id}").unwrap())
            .handler(|ctx: CallContext, _args: ()| async move {
                Ok(json!({ "id": 7, "name": ctx.url().map(|u| u.path()) }))
            })
            .build::<User>()
            .unwrap();

        let user = get_user.invoke(Call::new(()).with_path("id", 7)).await.unwrap();
        assert_eq!(
            user,
            User {
                id: 7,
                name: "/api/users/7".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_path_arg_never_reaches_handler() {
        static CALLED: AtomicUsize = AtomicUsize::new(0);
        let get_user = api()
            .endpoint("get_user", EndpointDescriptor::get("/users/{id}").unwrap())
            .handler(|_ctx: CallContext, _args: ()| async move {
                CALLED.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
            .build::<Value>()
            .unwrap();

        let err = get_user.invoke(()).await.unwrap_err();
        assert!(matches!(err, IntegrationError::Configuration(_)));
        assert_eq!(CALLED.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schema_mismatch_is_decode_error() {
        let ep = api()
            .endpoint("list", EndpointDescriptor::get("/users").unwrap())
            .handler(|_ctx: CallContext, _args: ()| async move { Ok(json!({"unexpected": true})) })
            .build::<Vec<User>>()
            .unwrap();
        assert!(matches!(ep.invoke(()).await, Err(IntegrationError::Decode(_))));
    }

    #[test]
    fn duplicate_method_name_is_rejected() {
        let api = api();
        let declare = |api: &Integration| {
            api.endpoint("list", EndpointDescriptor::get("/users").unwrap())
                .handler(|_ctx: CallContext, _args: ()| async move { Ok(Value::Null) })
                .build::<Value>()
        };
        declare(&api).unwrap();
        assert!(matches!(declare(&api), Err(IntegrationError::Configuration(_))));
        assert_eq!(api.methods().len(), 1);
    }

    #[test]
    fn duplicate_route_is_allowed() {
        let api = api();
        for name in ["list", "list_again"] {
            api.endpoint(name, EndpointDescriptor::get("/users").unwrap())
                .handler(|_ctx: CallContext, _args: ()| async move { Ok(Value::Null) })
                .build::<Value>()
                .unwrap();
        }
        let docs = api.docs();
        assert_eq!(docs.methods.len(), 2);
        assert_eq!(docs.methods[0].path, docs.methods[1].path);
    }

    #[tokio::test]
    async fn endpoint_is_a_tower_service() {
        let mut ep = api()
            .endpoint("echo", EndpointDescriptor::post("/echo").unwrap())
            .handler(|_ctx: CallContext, args: String| async move { Ok(json!(args)) })
            .build::<String>()
            .unwrap();
        let out = ServiceExt::ready(&mut ep)
            .await
            .unwrap()
            .call(Call::new("hi".to_string()))
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }
}
