//! Bounded retries with backoff for RPC calls.
//!
//! A [`RetryExecutor`] runs a single-attempt operation, retrying it while it
//! fails with a retryable error and attempts remain. Between attempts it waits
//! according to a [`BackoffPolicy`]:
//!
//! | Policy | Wait before retry *n* |
//! |---|---|
//! | `Fixed(d)` | `d` |
//! | `Linear(step)` | `step * n` |
//! | `Exponential(base)` | `base * 2^(n-1)` |
//!
//! The first attempt never waits. Non-retryable errors are returned at once
//! as [`RetryError::NotRetryable`]; running out of attempts returns the last
//! error as [`RetryError::Exhausted`].
//!
//! # Example
//!
//! ```rust
//! use rpc_resilience_core::OutcomeCode;
//! use rpc_resilience_retry::{RetryConfig, RetryError};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let executor = RetryConfig::<OutcomeCode>::builder()
//!     .name("unary")
//!     .max_attempts(4)
//!     .exponential_backoff(Duration::from_secs(2))
//!     .retry_on_codes([OutcomeCode::Unknown])
//!     .build();
//!
//! let result: Result<&str, RetryError<OutcomeCode>> = executor
//!     .run(|attempt| async move {
//!         if attempt < 3 { Err(OutcomeCode::Unknown) } else { Ok("done") }
//!     })
//!     .await;
//! assert_eq!(result.unwrap(), "done");
//! # }
//! ```
//!
//! Unary and streaming calls should each get their own executor; executors
//! share no state.

use rpc_resilience_core::{CallError, OutcomeCode, StatusCoded};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub use backoff::{BackoffPolicy, FnInterval, IntervalFunction, Jittered};
pub use config::{RetryConfig, RetryConfigBuilder};
pub use events::RetryEvent;

mod backoff;
mod config;
mod events;

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The attempt produced a value.
    Succeeded,
    /// The attempt failed.
    Failed {
        /// The failure's code, when it carries one.
        code: Option<OutcomeCode>,
        /// Whether the failure was eligible for a retry.
        retryable: bool,
    },
}

/// Record of one execution of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-indexed position of this attempt.
    pub sequence_number: usize,
    /// When the attempt started.
    pub started_at: Instant,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// How long the attempt ran.
    pub duration_observed: Duration,
}

/// The terminal error of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// Error of the last attempt.
        last: E,
    },

    /// The operation failed with an error that is not retried.
    #[error("{0}")]
    NotRetryable(E),
}

impl<E> RetryError<E> {
    /// Returns true if attempts ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// The operation's last error.
    pub fn last(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::NotRetryable(last) => last,
        }
    }

    /// Consumes the error, returning the operation's last error.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::NotRetryable(last) => last,
        }
    }
}

impl From<RetryError<CallError>> for CallError {
    fn from(err: RetryError<CallError>) -> Self {
        match err {
            RetryError::Exhausted {
                attempts,
                last: CallError::Transport(last),
            } => CallError::RetriesExhausted { attempts, last },
            RetryError::Exhausted { last, .. } | RetryError::NotRetryable(last) => last,
        }
    }
}

/// Runs operations with bounded retries.
///
/// Cloning is cheap; clones share configuration but no per-call state.
pub struct RetryExecutor<E> {
    config: Arc<RetryConfig<E>>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
        }
    }
}

impl<E> std::fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .finish()
    }
}

impl<E> RetryExecutor<E> {
    /// Creates an executor from a configuration.
    pub fn new(config: RetryConfig<E>) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The executor's configuration.
    pub fn config(&self) -> &RetryConfig<E> {
        &self.config
    }
}

impl<E: StatusCoded> RetryExecutor<E> {
    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` attempts have been made.
    ///
    /// `operation` receives the 1-indexed attempt number.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = &self.config;
        let mut attempt = 1;

        loop {
            let started_at = Instant::now();
            let result = operation(attempt).await;
            let duration_observed = started_at.elapsed();

            let error = match result {
                Ok(value) => {
                    self.emit_attempt(
                        attempt,
                        started_at,
                        AttemptOutcome::Succeeded,
                        duration_observed,
                    );
                    config.event_listeners.emit(&RetryEvent::Success {
                        pattern_name: config.name.clone(),
                        timestamp: std::time::Instant::now(),
                        attempts: attempt,
                    });

                    #[cfg(feature = "metrics")]
                    metrics::counter!("retry_calls_total", "retry" => config.name.clone(), "outcome" => "success").increment(1);

                    return Ok(value);
                }
                Err(error) => error,
            };

            let retryable = config.should_retry(&error);
            let outcome = AttemptOutcome::Failed {
                code: error.outcome_code(),
                retryable,
            };
            self.emit_attempt(attempt, started_at, outcome, duration_observed);

            if !retryable {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    retry = %config.name,
                    attempt,
                    code = ?error.outcome_code(),
                    "error is not retryable"
                );
                config.event_listeners.emit(&RetryEvent::IgnoredError {
                    pattern_name: config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    attempts: attempt,
                });
                return Err(RetryError::NotRetryable(error));
            }

            if attempt >= config.max_attempts {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    retry = %config.name,
                    attempts = attempt,
                    code = ?error.outcome_code(),
                    "retries exhausted"
                );
                config.event_listeners.emit(&RetryEvent::Exhausted {
                    pattern_name: config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    attempts: attempt,
                });

                #[cfg(feature = "metrics")]
                metrics::counter!("retry_exhausted_total", "retry" => config.name.clone()).increment(1);

                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = config.next_backoff(attempt);
            attempt += 1;

            #[cfg(feature = "tracing")]
            tracing::info!(
                retry = %config.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                code = ?error.outcome_code(),
                "retrying"
            );
            config.event_listeners.emit(&RetryEvent::Retry {
                pattern_name: config.name.clone(),
                timestamp: std::time::Instant::now(),
                attempt,
                delay,
            });

            #[cfg(feature = "metrics")]
            metrics::counter!("retry_attempts_total", "retry" => config.name.clone()).increment(1);

            tokio::time::sleep(delay).await;
        }
    }

    fn emit_attempt(
        &self,
        sequence_number: usize,
        started_at: Instant,
        outcome: AttemptOutcome,
        duration_observed: Duration,
    ) {
        if self.config.event_listeners.is_empty() {
            return;
        }
        self.config
            .event_listeners
            .emit(&RetryEvent::AttemptCompleted {
                pattern_name: self.config.name.clone(),
                timestamp: std::time::Instant::now(),
                attempt: Attempt {
                    sequence_number,
                    started_at,
                    outcome,
                    duration_observed,
                },
            });
    }
}

/// Runs `operation` with a one-off executor built from the arguments.
///
/// Retries only errors whose code is in `retryable_codes`.
///
/// # Panics
///
/// Panics if `max_attempts` is zero.
pub async fn run_with_retry<F, Fut, T, E>(
    operation: F,
    retryable_codes: &[OutcomeCode],
    max_attempts: usize,
    backoff: BackoffPolicy,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StatusCoded + 'static,
{
    RetryConfig::builder()
        .max_attempts(max_attempts)
        .backoff(backoff)
        .retry_on_codes(retryable_codes.iter().copied())
        .build()
        .run(operation)
        .await
}
