//! Mock substitution for tests
//!
//! [`patch_integration`] installs a set of [`MockRules`] for the duration of
//! one future (typically one test body). While the scope is active:
//!
//! - calling a method that has a replacement runs the replacement instead of
//!   the stability layers and the network; it gets a [`CallContext`] without
//!   an HTTP client and the caller's arguments;
//! - calling any other integration method fails with
//!   [`IntegrationError::MissingMock`], so a forgotten mock can never turn
//!   into real traffic.
//!
//! Outside a scope every call takes the real path. Scopes are task-local:
//! tests running concurrently on the same runtime each see only their own
//! rules, and a scope is torn down however its future finishes (success,
//! error, panic or cancellation).
//!
//! ```rust,no_run
//! use tower_integrations::{patch_integration, MockRules};
//! # use tower_integrations::Endpoint;
//! # async fn t(translate: Endpoint<String>) {
//! let rules = MockRules::new()
//!     .mock(&translate, |_ctx, text: String| async move {
//!         Ok(serde_json::json!({ "text": text.to_uppercase() }))
//!     });
//!
//! patch_integration(rules, async {
//!     let out = translate.invoke("hello".to_string()).await.unwrap();
//!     assert_eq!(out["text"], "HELLO");
//! })
//! .await;
//! # }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::CallContext;
use crate::endpoint::MethodId;
use crate::error::Result;
use crate::service::{boxed_handler, Endpoint, Handler};

tokio::task_local! {
    static ACTIVE_RULES: MockRules;
}

pub(crate) struct MockEntry {
    // Holds a `Handler<Req>` for the endpoint's argument type.
    handler: Box<dyn Any + Send + Sync>,
    hits: AtomicUsize,
}

impl MockEntry {
    pub(crate) fn handler<Req: 'static>(&self) -> Option<&Handler<Req>> {
        self.handler.downcast_ref::<Handler<Req>>()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) enum Lookup {
    Inactive,
    Missing,
    Found(Arc<MockEntry>),
}

pub(crate) fn lookup(id: &MethodId) -> Lookup {
    ACTIVE_RULES
        .try_with(|rules| match rules.entries.get(id) {
            Some(entry) => Lookup::Found(entry.clone()),
            None => Lookup::Missing,
        })
        .unwrap_or(Lookup::Inactive)
}

/// Replacement callables keyed by method identity.
///
/// Clones share hit counters, so a test can keep a clone to inspect
/// [`MockRules::hits`] after the scope ends.
#[derive(Clone, Default)]
pub struct MockRules {
    entries: HashMap<MethodId, Arc<MockEntry>>,
}

impl MockRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `endpoint` with `f` inside the scope.
    pub fn mock<Req, Resp, F, Fut>(mut self, endpoint: &Endpoint<Req, Resp>, f: F) -> Self
    where
        Req: Send + 'static,
        Resp: DeserializeOwned + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Handler<Req> = boxed_handler(f);
        self.entries.insert(
            endpoint.id().clone(),
            Arc::new(MockEntry {
                handler: Box::new(handler),
                hits: AtomicUsize::new(0),
            }),
        );
        self
    }

    /// Replace `endpoint` with a fixed payload.
    pub fn respond_with<Req, Resp>(self, endpoint: &Endpoint<Req, Resp>, payload: Value) -> Self
    where
        Req: Send + 'static,
        Resp: DeserializeOwned + Send + 'static,
    {
        self.mock(endpoint, move |_ctx, _args: Req| {
            let payload = payload.clone();
            async move { Ok(payload) }
        })
    }

    pub fn contains<Req, Resp>(&self, endpoint: &Endpoint<Req, Resp>) -> bool
    where
        Req: Send + 'static,
        Resp: DeserializeOwned + Send + 'static,
    {
        self.entries.contains_key(endpoint.id())
    }

    /// How many times the replacement for `endpoint` has run.
    pub fn hits<Req, Resp>(&self, endpoint: &Endpoint<Req, Resp>) -> usize
    where
        Req: Send + 'static,
        Resp: DeserializeOwned + Send + 'static,
    {
        self.entries
            .get(endpoint.id())
            .map(|e| e.hits.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rules of the scope the current task is running in.
    ///
    /// Tasks spawned inside a scope do not inherit it; pass these rules to
    /// [`patch_integration`] inside the spawned task.
    pub fn current() -> Option<MockRules> {
        ACTIVE_RULES.try_with(MockRules::clone).ok()
    }
}

impl fmt::Debug for MockRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<String> = self.entries.keys().map(ToString::to_string).collect();
        methods.sort();
        f.debug_struct("MockRules").field("methods", &methods).finish()
    }
}

/// Run `fut` with `rules` installed as the active mock scope.
pub async fn patch_integration<F>(rules: MockRules, fut: F) -> F::Output
where
    F: Future,
{
    tracing::debug!(mocks = rules.len(), "entering integration mock scope");
    let out = ACTIVE_RULES.scope(rules, fut).await;
    tracing::debug!("left integration mock scope");
    out
}

/// Synchronous variant of [`patch_integration`].
pub fn patch_integration_sync<R>(rules: MockRules, f: impl FnOnce() -> R) -> R {
    ACTIVE_RULES.sync_scope(rules, f)
}

/// True inside a [`patch_integration`] scope.
pub fn mock_scope_active() -> bool {
    ACTIVE_RULES.try_with(|_| ()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EndpointDescriptor, Integration, IntegrationError};
    use serde_json::json;

    fn echo(api: &Integration, name: &str) -> Endpoint<String> {
        api.endpoint(name, EndpointDescriptor::post(format!("/{name}")).unwrap())
            .handler(|_ctx: CallContext, s: String| async move { Ok(json!({ "real": s })) })
            .build()
            .unwrap()
    }

    fn api() -> Integration {
        Integration::builder("Echo")
            .base_url("https://echo.example.com")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn scope_is_released_after_future_completes() {
        let api = api();
        let ep = echo(&api, "shout");
        let rules = MockRules::new().respond_with(&ep, json!({ "mocked": true }));

        assert!(!mock_scope_active());
        let inside = patch_integration(rules.clone(), async {
            assert!(mock_scope_active());
            ep.invoke("x".to_string()).await.unwrap()
        })
        .await;
        assert_eq!(inside, json!({ "mocked": true }));
        assert!(!mock_scope_active());
        assert_eq!(rules.hits(&ep), 1);

        let outside = ep.invoke("x".to_string()).await.unwrap();
        assert_eq!(outside, json!({ "real": "x" }));
    }

    #[tokio::test]
    async fn unmocked_method_fails_loudly() {
        let api = api();
        let mocked = echo(&api, "a");
        let other = echo(&api, "b");
        let rules = MockRules::new().respond_with(&mocked, json!(1));

        let err = patch_integration(rules, other.invoke("x".to_string()))
            .await
            .unwrap_err();
        match err {
            IntegrationError::MissingMock { method } => assert_eq!(method.to_string(), "Echo.b"),
            e => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn sync_scope_is_visible_to_invoke() {
        let api = api();
        let ep = echo(&api, "sync");
        let rules = MockRules::new().respond_with(&ep, json!("mocked"));
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

        // The lookup happens when `invoke` is called, inside the sync scope.
        let fut = patch_integration_sync(rules, || ep.invoke("x".to_string()));
        assert_eq!(rt.block_on(fut).unwrap(), json!("mocked"));
    }

    #[tokio::test]
    async fn current_rules_can_be_forwarded_to_spawned_tasks() {
        let api = api();
        let ep = echo(&api, "spawned");
        let rules = MockRules::new().respond_with(&ep, json!("from mock"));

        let out = patch_integration(rules, async {
            let forwarded = MockRules::current().unwrap();
            let ep = ep.clone();
            tokio::spawn(patch_integration(forwarded, async move {
                ep.invoke("x".to_string()).await
            }))
            .await
            .unwrap()
        })
        .await
        .unwrap();
        assert_eq!(out, json!("from mock"));
    }

    #[test]
    fn debug_lists_methods() {
        let api = api();
        let ep = echo(&api, "dbg");
        let rules = MockRules::new().respond_with(&ep, Value::Null);
        assert_eq!(format!("{rules:?}"), "MockRules { methods: [\"Echo.dbg\"] }");
    }
}
