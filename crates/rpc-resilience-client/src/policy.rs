//! Retry, timeout and circuit-breaker parameters for a client.
//!
//! A [`PolicyConfig`] is built once and never changes. The defaults match the
//! reference dial options: unary calls retry `UNKNOWN` four times with
//! exponential backoff from 2s, streaming calls retry `UNKNOWN` four times
//! with linear backoff in 3s steps.
//!
//! Policies can be read from TOML. Durations are fractional seconds:
//!
//! ```toml
//! [unary_retry]
//! max_attempts = 4
//! retryable_codes = ["UNKNOWN"]
//! backoff = { kind = "exponential", base = 2.0 }
//!
//! [stream_retry]
//! backoff = { kind = "linear", step = 3.0 }
//! jitter = 0.2
//!
//! [circuit_breaker]
//! failure_ratio_threshold = 0.5
//! minimum_request_volume = 10
//! open_duration = 30.0
//!
//! [timeouts]
//! unary = 5.0
//! server_streaming = 3.0
//! ```

use crate::interceptor::CallShape;
use rpc_resilience_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use rpc_resilience_core::{CallError, OutcomeCode};
use rpc_resilience_retry::{BackoffPolicy, RetryConfig, RetryExecutor};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating a [`PolicyConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The policy file could not be read.
    #[error("failed to read policy file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The policy is not valid TOML or does not match the schema.
    #[error("failed to parse policy: {0}")]
    Parse(#[from] toml::de::Error),

    /// The policy parsed but its values are unusable.
    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Complete resiliency policy of a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Retry policy for unary calls.
    pub unary_retry: RetryPolicyConfig,
    /// Retry policy for the streaming shapes.
    pub stream_retry: RetryPolicyConfig,
    /// Breaker shared by every call of the client.
    pub circuit_breaker: BreakerPolicy,
    /// Default deadline per call shape.
    pub timeouts: Timeouts,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            unary_retry: RetryPolicyConfig::new(4, BackoffSpec::Exponential {
                base: Duration::from_secs(2),
            }),
            stream_retry: RetryPolicyConfig::new(4, BackoffSpec::Linear {
                step: Duration::from_secs(3),
            }),
            circuit_breaker: BreakerPolicy::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl PolicyConfig {
    /// Parses and validates a TOML policy. Missing tables keep their
    /// defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let policy: PolicyConfig = toml::from_str(source)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reads, parses and validates a TOML policy file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.unary_retry.validate("unary_retry")?;
        self.stream_retry.validate("stream_retry")?;
        self.circuit_breaker.validate()?;
        self.timeouts.validate()
    }
}

/// Retry parameters for one family of calls.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicyConfig {
    /// Total attempts, the first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Codes that are worth another attempt.
    #[serde(default = "default_retryable_codes")]
    pub retryable_codes: Vec<OutcomeCode>,
    /// Wait between attempts.
    pub backoff: BackoffSpec,
    /// Spread every wait uniformly by up to this fraction of it.
    #[serde(default)]
    pub jitter: Option<f64>,
}

fn default_max_attempts() -> usize {
    4
}

fn default_retryable_codes() -> Vec<OutcomeCode> {
    vec![OutcomeCode::Unknown]
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        PolicyConfig::default().unary_retry
    }
}

impl RetryPolicyConfig {
    /// Retries `UNKNOWN` up to `max_attempts` times with `backoff`.
    pub fn new(max_attempts: usize, backoff: BackoffSpec) -> Self {
        Self {
            max_attempts,
            retryable_codes: default_retryable_codes(),
            backoff,
            jitter: None,
        }
    }

    /// Replaces the retryable codes.
    pub fn with_codes(mut self, codes: impl IntoIterator<Item = OutcomeCode>) -> Self {
        self.retryable_codes = codes.into_iter().collect();
        self
    }

    /// Adds jitter to every wait.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = Some(fraction);
        self
    }

    /// Builds an executor applying this policy.
    ///
    /// # Panics
    ///
    /// Panics if `max_attempts` is zero. [`PolicyConfig::validate`] rejects
    /// such policies.
    pub fn executor(&self, name: impl Into<String>) -> RetryExecutor<CallError> {
        let builder = RetryConfig::<CallError>::builder()
            .name(name)
            .max_attempts(self.max_attempts)
            .retry_on_codes(self.retryable_codes.iter().copied());
        let policy = self.backoff.policy();
        let builder = match self.jitter {
            Some(fraction) if fraction > 0.0 => builder.backoff(policy.with_jitter(fraction)),
            _ => builder.backoff(policy),
        };
        builder.build()
    }

    fn validate(&self, table: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "{table}.max_attempts must be at least 1"
            )));
        }
        if let Some(fraction) = self.jitter {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(ConfigError::Invalid(format!(
                    "{table}.jitter must be within 0.0..=1.0, got {fraction}"
                )));
            }
        }
        Ok(())
    }
}

/// Serialized form of a [`BackoffPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffSpec {
    /// Constant wait.
    Fixed {
        #[serde(deserialize_with = "seconds::deserialize")]
        delay: Duration,
    },
    /// `step * n` before retry `n`.
    Linear {
        #[serde(deserialize_with = "seconds::deserialize")]
        step: Duration,
    },
    /// `base * 2^(n-1)` before retry `n`.
    Exponential {
        #[serde(deserialize_with = "seconds::deserialize")]
        base: Duration,
    },
}

impl BackoffSpec {
    /// The backoff policy this describes.
    pub fn policy(self) -> BackoffPolicy {
        match self {
            BackoffSpec::Fixed { delay } => BackoffPolicy::Fixed(delay),
            BackoffSpec::Linear { step } => BackoffPolicy::Linear(step),
            BackoffSpec::Exponential { base } => BackoffPolicy::Exponential(base),
        }
    }
}

/// Circuit breaker parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerPolicy {
    /// Name used in logs and metrics.
    pub name: String,
    /// Failure ratio above which the circuit opens.
    pub failure_ratio_threshold: f64,
    /// Calls needed in the window before the ratio is considered.
    pub minimum_request_volume: usize,
    /// How long the circuit stays open before probing.
    #[serde(deserialize_with = "seconds::deserialize")]
    pub open_duration: Duration,
    /// Probes admitted, and successes needed to close, per half-open episode.
    pub max_half_open_requests: usize,
    /// Rolling window after which closed-state counters are cleared.
    #[serde(deserialize_with = "seconds::option")]
    pub counting_interval: Option<Duration>,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            name: "resiliency".to_string(),
            failure_ratio_threshold: 0.5,
            minimum_request_volume: 10,
            open_duration: Duration::from_secs(30),
            max_half_open_requests: 1,
            counting_interval: None,
        }
    }
}

impl BreakerPolicy {
    /// Builds a breaker applying this policy.
    ///
    /// # Panics
    ///
    /// Panics on the values [`PolicyConfig::validate`] rejects.
    pub fn build(&self) -> CircuitBreaker {
        let mut builder = CircuitBreakerConfig::builder()
            .name(self.name.clone())
            .failure_ratio_threshold(self.failure_ratio_threshold)
            .minimum_request_volume(self.minimum_request_volume)
            .open_duration(self.open_duration)
            .max_half_open_requests(self.max_half_open_requests);
        if let Some(interval) = self.counting_interval {
            builder = builder.counting_interval(interval);
        }
        builder.build()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.failure_ratio_threshold > 0.0 && self.failure_ratio_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "circuit_breaker.failure_ratio_threshold must be within (0, 1], got {}",
                self.failure_ratio_threshold
            )));
        }
        if self.max_half_open_requests == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.max_half_open_requests must be at least 1".to_string(),
            ));
        }
        if self.counting_interval == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "circuit_breaker.counting_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default deadline of each call shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    #[serde(deserialize_with = "seconds::deserialize")]
    pub unary: Duration,
    #[serde(deserialize_with = "seconds::deserialize")]
    pub server_streaming: Duration,
    #[serde(deserialize_with = "seconds::deserialize")]
    pub client_streaming: Duration,
    #[serde(deserialize_with = "seconds::deserialize")]
    pub bidi_streaming: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            unary: Duration::from_secs(5),
            server_streaming: Duration::from_secs(3),
            client_streaming: Duration::from_secs(60),
            bidi_streaming: Duration::from_secs(60),
        }
    }
}

impl Timeouts {
    /// The deadline for calls of `shape`.
    pub fn for_shape(&self, shape: CallShape) -> Duration {
        match shape {
            CallShape::Unary => self.unary,
            CallShape::ServerStreaming => self.server_streaming,
            CallShape::ClientStreaming => self.client_streaming,
            CallShape::BidiStreaming => self.bidi_streaming,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for shape in CallShape::ALL {
            if self.for_shape(shape).is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "timeouts for {shape} calls must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Durations written as fractional seconds.
mod seconds {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }

    pub fn option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}
