//! # Tower Integrations
//!
//! Declare the methods of an external HTTP API as typed, callable endpoints,
//! wrap each one in stability patterns built as Tower layers, and swap real
//! calls for stand-ins while testing.
//!
//! ## Core Concepts
//!
//! - **Integration**: a named external service with a base URL, credentials and an HTTP client
//! - **Endpoint**: one declared method (HTTP method, path template, version) plus its handler
//! - **Layers**: Tower middleware for timeout, retry, circuit breaker, fallback and throttling
//! - **Mock scope**: a task-local set of replacements; unmocked methods fail instead of hitting the network
//!
//! Only a raised error counts as failure for the layers. A handler that wants
//! a 500 response to be retried must raise it, e.g. with
//! [`HttpResponse::error_for_status`].
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use serde::Deserialize;
//! use serde_json::json;
//! use tower_integrations::{
//!     Backoff, Call, CallContext, EndpointDescriptor, Integration, RetryLayer, TimeoutLayer,
//! };
//!
//! #[derive(Debug, Deserialize)]
//! struct Translation {
//!     text: String,
//! }
//!
//! # async fn example() -> tower_integrations::Result<()> {
//! let api = Integration::builder("Translator")
//!     .base_url("https://translate.example.com/api")
//!     .credential("api_key", "secret")
//!     .build()?;
//!
//! let translate = api
//!     .endpoint("translate", EndpointDescriptor::post("/translate/{to}")?)
//!     .doc("Translate text into the target language")
//!     .handler(|ctx: CallContext, text: String| async move {
//!         let key = ctx.credential("api_key").unwrap_or_default().to_string();
//!         let resp = ctx
//!             .send(ctx.request()?.bearer_auth(key).json(&json!({ "text": text })))
//!             .await?
//!             .error_for_status()?;
//!         Ok::<_, tower_integrations::IntegrationError>(resp.into_body())
//!     })
//!     .layer(TimeoutLayer::new(Duration::from_secs(5)))
//!     .layer(RetryLayer::attempts(3, Backoff::fixed(Duration::from_millis(200))))
//!     .build::<Translation>()?;
//!
//! let out = translate
//!     .invoke(Call::new("Hello".to_string()).with_path("to", "ru"))
//!     .await?;
//! println!("{}", out.text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod integration;
pub mod mock;
pub mod resilience;
pub mod schema;
pub mod service;

// Public re-exports for convenience
pub use config::{BreakerSettings, IntegrationConfig, RetryConfig, StabilityConfig, ThrottleConfig};
pub use context::{CallContext, HttpResponse};
pub use endpoint::{EndpointDescriptor, HttpMethod, MethodId, PathArgs, PathTemplate};
pub use error::{IntegrationError, Result};
pub use integration::{
    Credentials, Integration, IntegrationBuilder, IntegrationDocs, MethodDoc, Secret,
};
pub use mock::{mock_scope_active, patch_integration, patch_integration_sync, MockRules};
pub use resilience::{
    AlwaysRetry, Backoff, BreakerConfig, BreakerMonitor, CircuitBreakerLayer, CircuitState,
    ErrorClassifier, FallbackLayer, RetryLayer, RetryPolicy, ThrottleLayer, TimeoutLayer,
    TransientOnly,
};
pub use schema::{convert_response, OneOf};
pub use service::{Call, Declaration, Endpoint, EndpointBuilder, EndpointStack, Handler};

// Re-export Tower traits that users need
pub use tower::{Layer, Service, ServiceExt};
