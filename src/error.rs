//! Error types for integration calls

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tower::BoxError;

use crate::endpoint::MethodId;

/// Result type alias for integration calls
pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Main error type for integration calls.
///
/// Stability layers only react to errors of this type; a returned value is a
/// success no matter what it contains.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Network-level failure reported by the HTTP client
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The timeout layer's deadline elapsed before the call finished
    #[error("Call timed out after {after:?}")]
    Timeout { after: Duration },

    /// The circuit breaker rejected the call without invoking it
    #[error("Circuit open, next trial in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// The throttle budget for the current window is exhausted
    #[error("Throttled: {limit} calls per {window:?} exceeded")]
    Throttled { limit: u32, window: Duration },

    /// Missing path placeholders, malformed templates, bad base URLs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A mock scope is active but has no replacement for this method
    #[error("Integration method {method} is not mocked in the active scope")]
    MissingMock { method: MethodId },

    /// Non-success HTTP status raised through `HttpResponse::error_for_status`
    #[error("Upstream returned status {status}")]
    Status { status: u16, body: Value },

    /// Payload did not match the declared response schema
    #[error("Response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Other errors raised by integration handlers
    #[error("{0}")]
    Other(String),
}

impl IntegrationError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IntegrationError::Transport { .. } => true,
            IntegrationError::Timeout { .. } => true,
            IntegrationError::CircuitOpen { .. } => true,
            IntegrationError::Throttled { .. } => true,
            IntegrationError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            IntegrationError::Configuration(_) => false,
            IntegrationError::MissingMock { .. } => false,
            IntegrationError::Decode(_) => false,
            IntegrationError::Other(_) => false,
        }
    }

    /// Gateway-style HTTP status for errors produced by the stability layers.
    ///
    /// Web handlers that expose integration results can use this to answer
    /// their own clients; `None` means the error did not come from a layer.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            IntegrationError::Timeout { .. } => Some(504),
            IntegrationError::CircuitOpen { .. } => Some(503),
            IntegrationError::Throttled { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IntegrationError {
    fn from(err: reqwest::Error) -> Self {
        IntegrationError::Transport {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
