//! Configuration for integrations and their stability layers
//!
//! Everything here is plain serde data with defaults, so it can come from a
//! file, the environment or code. Durations are milliseconds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IntegrationError, Result};
use crate::integration::IntegrationBuilder;
use crate::resilience::{
    Backoff, BreakerConfig, CircuitBreakerLayer, RetryLayer, RetryPolicy, ThrottleLayer,
    TimeoutLayer, TransientOnly,
};
use crate::service::EndpointBuilder;

/// Connection settings for one integration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub base_url: String,
    pub credentials: BTreeMap<String, String>,
    pub connect_timeout_ms: Option<u64>,
}

impl IntegrationConfig {
    /// Load from `{PREFIX}_BASE_URL`, `{PREFIX}_CONNECT_TIMEOUT_MS` and
    /// `{PREFIX}_CREDENTIAL_<KEY>` (the key is lowercased).
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    pub(crate) fn from_vars<I>(prefix: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let base_key = format!("{prefix}_BASE_URL");
        let timeout_key = format!("{prefix}_CONNECT_TIMEOUT_MS");
        let credential_prefix = format!("{prefix}_CREDENTIAL_");

        let mut config = Self::default();
        for (key, value) in vars {
            if key == base_key {
                config.base_url = value;
            } else if key == timeout_key {
                let ms = value.trim().parse::<u64>().map_err(|e| {
                    IntegrationError::configuration(format!("{timeout_key}={value:?}: {e}"))
                })?;
                config.connect_timeout_ms = Some(ms);
            } else if let Some(name) = key.strip_prefix(&credential_prefix) {
                if !name.is_empty() {
                    config.credentials.insert(name.to_lowercase(), value);
                }
            }
        }
        Ok(config)
    }

    /// Start an [`IntegrationBuilder`] carrying these settings.
    pub fn builder(&self, name: impl Into<String>) -> IntegrationBuilder {
        let mut builder = IntegrationBuilder::new(name).base_url(self.base_url.clone());
        for (key, value) in &self.credentials {
            builder = builder.credential(key.clone(), value.clone());
        }
        if let Some(ms) = self.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        builder
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 1.0 gives a fixed delay
    pub backoff_multiplier: f32,
    pub jitter: bool,
    /// Retry only transport errors, timeouts and 5xx/429 statuses
    pub transient_only: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
            transient_only: false,
        }
    }
}

impl RetryConfig {
    /// Reject multipliers that are negative or not finite.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 0.0 {
            return Err(IntegrationError::configuration(format!(
                "retry backoff_multiplier must be a finite, non-negative number, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    pub fn policy(&self) -> Result<RetryPolicy> {
        self.validate()?;
        Ok(self.build_policy())
    }

    fn build_policy(&self) -> RetryPolicy {
        let initial = Duration::from_millis(self.initial_delay_ms);
        let backoff = if self.backoff_multiplier == 1.0 {
            Backoff::fixed(initial)
        } else {
            Backoff::exponential(
                initial,
                self.backoff_multiplier,
                Duration::from_millis(self.max_delay_ms),
            )
        };
        RetryPolicy::new(self.max_attempts, backoff.with_jitter(self.jitter))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        BreakerConfig::new(s.failure_threshold, Duration::from_millis(s.recovery_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub limit: u32,
    pub window_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window_ms: 60_000,
        }
    }
}

/// Stability layers described as data.
///
/// Applied innermost to outermost as timeout, circuit breaker, retry,
/// throttle: every attempt gets its own deadline, the breaker counts each
/// attempt, and the throttle budget is charged once per caller invocation.
/// Declare layers by hand when a different order is wanted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub timeout_ms: Option<u64>,
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<BreakerSettings>,
    pub throttle: Option<ThrottleConfig>,
}

impl StabilityConfig {
    pub fn is_empty(&self) -> bool {
        self.timeout_ms.is_none()
            && self.retry.is_none()
            && self.circuit_breaker.is_none()
            && self.throttle.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        match &self.retry {
            Some(retry) => retry.validate(),
            None => Ok(()),
        }
    }

    /// Validate, then wrap `builder` in the configured layers.
    pub fn apply<Req>(&self, builder: EndpointBuilder<Req>) -> Result<EndpointBuilder<Req>>
    where
        Req: Clone + Send + 'static,
    {
        self.validate()?;
        Ok(self.layer_onto(builder))
    }

    /// Callers must have validated the configuration.
    pub(crate) fn layer_onto<Req>(&self, mut builder: EndpointBuilder<Req>) -> EndpointBuilder<Req>
    where
        Req: Clone + Send + 'static,
    {
        if let Some(ms) = self.timeout_ms {
            builder = builder.layer(TimeoutLayer::new(Duration::from_millis(ms)));
        }
        if let Some(cb) = &self.circuit_breaker {
            builder = builder.layer(CircuitBreakerLayer::new(cb.into()));
        }
        if let Some(retry) = &self.retry {
            let layer = RetryLayer::new(retry.build_policy());
            builder = if retry.transient_only {
                builder.layer(layer.with_classifier(TransientOnly))
            } else {
                builder.layer(layer)
            };
        }
        if let Some(t) = &self.throttle {
            builder = builder.layer(ThrottleLayer::new(t.limit, Duration::from_millis(t.window_ms)));
        }
        builder
    }
}
