//! Integration registry
//!
//! An [`Integration`] groups the endpoints of one external API together with
//! its base URL and credentials. It is constructed once (usually at startup)
//! and passed around explicitly; clones are cheap handles to the same
//! registry.
//!
//! ```rust,no_run
//! use tower_integrations::{EndpointDescriptor, Integration, IntegrationError};
//! use serde_json::json;
//!
//! # fn declare() -> tower_integrations::Result<()> {
//! let api = Integration::builder("Translator")
//!     .doc("Machine translation API")
//!     .base_url("https://translate.example.com")
//!     .credential("api_key", "secret")
//!     .build()?;
//!
//! let detect = api
//!     .endpoint("detect", EndpointDescriptor::post("/v2/detect")?.with_version("v2"))
//!     .doc("Detect the language of a text")
//!     .handler(|ctx, text: String| async move {
//!         let resp = ctx.send_json(&json!({ "text": text })).await?;
//!         Ok::<_, IntegrationError>(resp.error_for_status()?.into_body())
//!     })
//!     .build::<serde_json::Value>()?;
//! # let _ = detect;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::context::CallContext;
use crate::endpoint::{EndpointDescriptor, HttpMethod, MethodId, PathArgs};
use crate::error::{IntegrationError, Result};
use crate::service::Declaration;

/// An opaque secret value; never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Credential bag shared by all endpoints of one integration.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, Secret>);

impl Credentials {
    pub fn get(&self, key: &str) -> Option<&Secret> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: Secret) {
        self.0.insert(key.into(), value);
    }
}

impl<K, V> FromIterator<(K, V)> for Credentials
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), Secret::new(v)))
                .collect(),
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Documentation for one registered method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodDoc {
    pub name: String,
    pub doc: String,
    pub http_method: HttpMethod,
    pub path: String,
    pub version: String,
    pub doc_url: Option<String>,
    pub request_type: String,
    pub response_type: String,
}

/// Documentation for an integration and all of its methods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationDocs {
    pub name: String,
    pub doc: String,
    pub base_url: String,
    pub methods: Vec<MethodDoc>,
}

struct Registered {
    doc: MethodDoc,
    descriptor: Arc<EndpointDescriptor>,
}

struct IntegrationInner {
    name: Arc<str>,
    doc: String,
    base_url: String,
    credentials: Arc<Credentials>,
    client: reqwest::Client,
    registered: RwLock<Vec<Registered>>,
}

/// Handle to one declared external API.
#[derive(Clone)]
pub struct Integration {
    inner: Arc<IntegrationInner>,
}

impl Integration {
    pub fn builder(name: impl Into<String>) -> IntegrationBuilder {
        IntegrationBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn doc(&self) -> &str {
        &self.inner.doc
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    /// Start declaring an endpoint of this integration.
    ///
    /// The endpoint is registered when [`EndpointBuilder::build`](crate::EndpointBuilder::build)
    /// is called.
    pub fn endpoint(&self, name: impl Into<String>, descriptor: EndpointDescriptor) -> Declaration {
        Declaration::new(self.clone(), name.into(), descriptor)
    }

    pub fn method_id(&self, method: &str) -> MethodId {
        MethodId::new(self.inner.name.clone(), method)
    }

    /// Descriptor of a registered method.
    pub fn descriptor(&self, method: &str) -> Option<Arc<EndpointDescriptor>> {
        self.inner
            .registered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.doc.name == method)
            .map(|r| r.descriptor.clone())
    }

    /// Registered method identities in declaration order.
    pub fn methods(&self) -> Vec<MethodId> {
        self.inner
            .registered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| self.method_id(&r.doc.name))
            .collect()
    }

    pub fn docs(&self) -> IntegrationDocs {
        let methods = self
            .inner
            .registered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.doc.clone())
            .collect();
        IntegrationDocs {
            name: self.inner.name.to_string(),
            doc: self.inner.doc.clone(),
            base_url: self.inner.base_url.clone(),
            methods,
        }
    }

    pub(crate) fn register(&self, doc: MethodDoc, descriptor: Arc<EndpointDescriptor>) -> Result<()> {
        let mut registered = self
            .inner
            .registered
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if registered.iter().any(|r| r.doc.name == doc.name) {
            return Err(IntegrationError::configuration(format!(
                "method {} is already declared on {}",
                doc.name, self.inner.name
            )));
        }
        if let Some(existing) = registered
            .iter()
            .find(|r| r.descriptor.route_key() == descriptor.route_key())
        {
            tracing::warn!(
                integration = %self.inner.name,
                method = %doc.name,
                shadows = %existing.doc.name,
                route = %format!("{} {}", descriptor.method(), descriptor.path()),
                "duplicate endpoint route declared"
            );
        }
        registered.push(Registered { doc, descriptor });
        Ok(())
    }

    /// Base URL joined with the resolved path template.
    pub fn resolve_url(&self, descriptor: &EndpointDescriptor, args: &PathArgs) -> Result<Url> {
        let path = descriptor.path().resolve(args)?;
        let base = self.inner.base_url.trim_end_matches('/');
        let joined = if path.is_empty() || path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        };
        Url::parse(&joined).map_err(|e| {
            IntegrationError::configuration(format!("invalid endpoint URL {joined:?}: {e}"))
        })
    }

    /// Build a fresh context for the real path. URL resolution must succeed.
    pub(crate) fn call_context(
        &self,
        id: &MethodId,
        descriptor: &EndpointDescriptor,
        args: &PathArgs,
    ) -> Result<CallContext> {
        let url = self.resolve_url(descriptor, args)?;
        Ok(self.context_with(id, descriptor, Some(url), Some(self.inner.client.clone())))
    }

    /// Build a context for a mock replacement. Never fails: an unresolvable
    /// URL is left out and the replacement still runs.
    pub(crate) fn mock_context(
        &self,
        id: &MethodId,
        descriptor: &EndpointDescriptor,
        args: &PathArgs,
    ) -> CallContext {
        let url = match self.resolve_url(descriptor, args) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::debug!(method = %id, error = %e, "mock context without URL");
                None
            }
        };
        self.context_with(id, descriptor, url, None)
    }

    fn context_with(
        &self,
        id: &MethodId,
        descriptor: &EndpointDescriptor,
        url: Option<Url>,
        client: Option<reqwest::Client>,
    ) -> CallContext {
        CallContext::new(
            id.clone(),
            descriptor.method(),
            descriptor.version().to_string(),
            url,
            self.inner.credentials.clone(),
            client,
        )
    }
}

impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("name", &self.inner.name)
            .field("base_url", &self.inner.base_url)
            .field("credentials", &self.inner.credentials)
            .field("methods", &self.methods().len())
            .finish()
    }
}

/// Builder for [`Integration`]; base URL and credentials are fixed once built.
pub struct IntegrationBuilder {
    name: String,
    doc: String,
    base_url: String,
    credentials: Credentials,
    client: Option<reqwest::Client>,
    connect_timeout: Option<Duration>,
}

impl IntegrationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            base_url: String::new(),
            credentials: Credentials::default(),
            client: None,
            connect_timeout: None,
        }
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key, Secret::new(value));
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Use a preconfigured client instead of building one.
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Integration> {
        if self.name.trim().is_empty() {
            return Err(IntegrationError::configuration("integration name is empty"));
        }
        if !self.base_url.is_empty() {
            Url::parse(&self.base_url).map_err(|e| {
                IntegrationError::configuration(format!("invalid base URL {:?}: {e}", self.base_url))
            })?;
        }
        let client = match self.client {
            Some(client) => client,
            None => {
                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                builder.build().map_err(|e| {
                    IntegrationError::configuration(format!("cannot build HTTP client: {e}"))
                })?
            }
        };

        Ok(Integration {
            inner: Arc::new(IntegrationInner {
                name: self.name.into(),
                doc: self.doc,
                base_url: self.base_url,
                credentials: Arc::new(self.credentials),
                client,
                registered: RwLock::new(Vec::new()),
            }),
        })
    }
}
