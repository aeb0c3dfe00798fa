//! Per-invocation call context
//!
//! A [`CallContext`] is built fresh for every call, right before the handler
//! runs. It carries the resolved absolute URL, the owning integration's
//! credentials and the HTTP client handle. When a mock replacement runs the
//! client handle is absent, so a replacement cannot reach the network even by
//! accident. A mock context may also lack a URL when the integration has no
//! base URL or the call left a path placeholder unfilled.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::endpoint::{HttpMethod, MethodId};
use crate::error::{IntegrationError, Result};
use crate::integration::Credentials;

pub struct CallContext {
    method_id: MethodId,
    http_method: HttpMethod,
    version: String,
    url: Option<Url>,
    credentials: Arc<Credentials>,
    client: Option<reqwest::Client>,
}

impl CallContext {
    pub(crate) fn new(
        method_id: MethodId,
        http_method: HttpMethod,
        version: String,
        url: Option<Url>,
        credentials: Arc<Credentials>,
        client: Option<reqwest::Client>,
    ) -> Self {
        Self {
            method_id,
            http_method,
            version,
            url,
            credentials,
            client,
        }
    }

    pub fn method_id(&self) -> &MethodId {
        &self.method_id
    }

    pub fn http_method(&self) -> HttpMethod {
        self.http_method
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Absolute URL with every path placeholder filled in.
    ///
    /// Always present on the real path; `None` only for a mock context whose
    /// URL could not be resolved.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Shorthand for `credentials().get(key)` exposing the secret value.
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(|s| s.expose())
    }

    /// True when this context was built for a mock replacement.
    pub fn is_mocked(&self) -> bool {
        self.client.is_none()
    }

    pub fn client(&self) -> Result<&reqwest::Client> {
        self.client.as_ref().ok_or_else(|| {
            IntegrationError::configuration(format!(
                "{} has no HTTP client: mock replacements cannot perform network calls",
                self.method_id
            ))
        })
    }

    /// A request builder preset with the endpoint's verb and resolved URL.
    pub fn request(&self) -> Result<reqwest::RequestBuilder> {
        let client = self.client()?;
        let url = self.url.clone().ok_or_else(|| {
            IntegrationError::configuration(format!("{} has no resolved URL", self.method_id))
        })?;
        Ok(client.request(self.http_method.into(), url))
    }

    /// Send a prepared request.
    ///
    /// Transport failures become [`IntegrationError::Transport`]. Any HTTP
    /// status, including 4xx/5xx, is returned as a successful
    /// [`HttpResponse`]; call [`HttpResponse::error_for_status`] to raise it.
    pub async fn send(&self, request: reqwest::RequestBuilder) -> Result<HttpResponse> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        tracing::debug!(method = %self.method_id, status, "upstream responded");
        Ok(HttpResponse { status, body })
    }

    /// Send the endpoint's request without a body.
    pub async fn fetch(&self) -> Result<HttpResponse> {
        self.send(self.request()?).await
    }

    /// Send the endpoint's request with a JSON body.
    pub async fn send_json<B>(&self, body: &B) -> Result<HttpResponse>
    where
        B: Serialize + ?Sized,
    {
        self.send(self.request()?.json(body)).await
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("method_id", &self.method_id)
            .field("http_method", &self.http_method)
            .field("version", &self.version)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("credentials", &self.credentials)
            .field("mocked", &self.is_mocked())
            .finish()
    }
}

/// Status and decoded body of an upstream response.
///
/// Bodies that are not JSON are kept as a JSON string; empty bodies are `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Raise non-2xx responses so the stability layers can react to them.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(IntegrationError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }

    pub fn into_body(self) -> Value {
        self.body
    }
}
