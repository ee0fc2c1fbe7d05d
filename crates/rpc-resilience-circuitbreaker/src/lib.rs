//! Circuit breaker gating RPC calls by their recent failure ratio.
//!
//! A circuit breaker stops sending calls to a peer that keeps failing, and
//! periodically lets a few probe calls through to find out whether it has
//! recovered.
//!
//! ## States
//! - **Closed**: calls pass through; outcomes are counted
//! - **Open**: calls are rejected immediately without being attempted
//! - **Half-Open**: a bounded number of probe calls decide whether to close
//!   again or re-open
//!
//! ## Tripping
//!
//! After every recorded outcome in `Closed`, the circuit opens when at least
//! `minimum_request_volume` outcomes have been recorded and
//! `failures / requests` is strictly greater than `failure_ratio_threshold`.
//!
//! ## Usage
//!
//! ```rust
//! use rpc_resilience_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerError};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreakerConfig::builder()
//!     .name("resiliency")
//!     .failure_ratio_threshold(0.5)
//!     .minimum_request_volume(10)
//!     .open_duration(Duration::from_secs(30))
//!     .build();
//!
//! let result: Result<u32, CircuitBreakerError<String>> =
//!     breaker.execute(|| async { Ok(42) }).await;
//! assert_eq!(result.unwrap(), 42);
//! # }
//! ```
//!
//! ## Explicit permits
//!
//! Call shapes that cannot be expressed as a single future (a stream that
//! is opened now and drained later) take a [`CallPermit`] and report the
//! outcome themselves. A permit dropped without an outcome counts as a
//! failure, so a cancelled call never holds on to a half-open probe slot.
//!
//! ```rust
//! use rpc_resilience_circuitbreaker::CircuitBreakerConfig;
//!
//! let breaker = CircuitBreakerConfig::builder().build();
//! if let Some(permit) = breaker.try_acquire() {
//!     // ... run the call ...
//!     permit.record_success();
//! }
//! ```
//!
//! ## Sharing
//!
//! `CircuitBreaker` is cheap to clone; clones share state. Construct one per
//! peer at the composition root and pass it to whoever needs it.
//!
//! ## Feature flags
//! - `tracing`: log transitions and admission decisions
//! - `metrics`: `circuitbreaker_calls_total`, `circuitbreaker_transitions_total`,
//!   `circuitbreaker_state`, `circuitbreaker_call_duration_seconds`

use crate::circuit::Circuit;
#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge, describe_histogram};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(feature = "metrics")]
use std::sync::Once;
use tokio::time::Instant;

pub use circuit::{BreakerCounters, CircuitMetrics, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::CircuitBreakerError;
pub use events::{CallOutcome, CircuitBreakerEvent};

mod circuit;
mod config;
mod error;
mod events;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Returns a new circuit breaker builder.
///
/// Same as [`CircuitBreakerConfig::builder`], but also registers metric
/// descriptions when the `metrics` feature is enabled.
pub fn circuit_breaker_builder() -> CircuitBreakerConfigBuilder {
    #[cfg(feature = "metrics")]
    {
        METRICS_INIT.call_once(|| {
            describe_counter!(
                "circuitbreaker_calls_total",
                "Total number of calls through the circuit breaker"
            );
            describe_counter!(
                "circuitbreaker_transitions_total",
                "Total number of circuit breaker state transitions"
            );
            describe_gauge!(
                "circuitbreaker_state",
                "Current state of the circuit breaker (0=closed, 1=open, 2=half-open)"
            );
            describe_histogram!(
                "circuitbreaker_call_duration_seconds",
                "Duration of calls admitted by the circuit breaker"
            );
        });
    }
    CircuitBreakerConfigBuilder::new()
}

/// A circuit breaker instance.
///
/// All counter updates and state transitions happen under one lock, which is
/// never held across the wrapped call. Events produced under the lock are
/// delivered to listeners after it is released.
#[derive(Clone)]
pub struct CircuitBreaker {
    circuit: Arc<Mutex<Circuit>>,
    state_atomic: Arc<AtomicU8>,
    config: Arc<CircuitBreakerConfig>,
}

impl CircuitBreaker {
    pub(crate) fn new(config: CircuitBreakerConfig) -> Self {
        let state_atomic = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        Self {
            circuit: Arc::new(Mutex::new(Circuit::new_with_atomic(Arc::clone(
                &state_atomic,
            )))),
            state_atomic,
            config: Arc::new(config),
        }
    }

    /// Runs `f` against the circuit under the lock, then emits whatever events
    /// it produced.
    fn with_circuit<R>(
        &self,
        f: impl FnOnce(&mut Circuit, &CircuitBreakerConfig, &mut Vec<CircuitBreakerEvent>) -> R,
    ) -> R {
        let mut events = Vec::new();
        let result = {
            let mut circuit = self.circuit.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut circuit, &self.config, &mut events)
        };
        self.config.event_listeners.emit_all(&events);
        result
    }

    /// Asks for permission to make one call.
    ///
    /// Returns `None` if the circuit is open, or half-open with every probe
    /// slot taken.
    pub fn try_acquire(&self) -> Option<CallPermit> {
        let generation = self.with_circuit(|circuit, config, events| {
            circuit.try_acquire(config, events)
        });

        #[cfg(feature = "tracing")]
        {
            if generation.is_some() {
                tracing::trace!(breaker = %self.config.name, "circuit breaker permitted call");
            } else {
                tracing::debug!(breaker = %self.config.name, "circuit breaker rejected call");
            }
        }

        generation.map(|generation| CallPermit {
            breaker: self.clone(),
            generation,
            started: Instant::now(),
            recorded: false,
        })
    }

    /// Runs `operation` if the circuit admits it. Any `Err` counts as a failure.
    ///
    /// When the circuit rejects the call, `operation` is never invoked.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(operation, |result: &Result<T, E>| result.is_err())
            .await
    }

    /// Runs `operation` if the circuit admits it, using `is_failure` to decide
    /// how the outcome is counted.
    pub async fn execute_classified<F, Fut, T, E, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> bool,
    {
        let permit = self
            .try_acquire()
            .ok_or_else(|| CircuitBreakerError::OpenCircuit {
                name: self.config.name.clone(),
            })?;

        let result = operation().await;
        if is_failure(&result) {
            permit.record_failure();
        } else {
            permit.record_success();
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Current state, read from the lock-free mirror.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(Ordering::Acquire))
    }

    /// Returns true if the circuit is currently open.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Takes a consistent snapshot of the breaker's counters and state.
    pub fn metrics(&self) -> CircuitMetrics {
        self.circuit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .metrics()
    }

    /// The breaker's configured name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Forces the circuit open, restarting the open timer.
    pub fn force_open(&self) {
        self.with_circuit(|circuit, config, events| circuit.force_open(config, events));
    }

    /// Closes the circuit and clears its counters.
    pub fn reset(&self) {
        self.with_circuit(|circuit, config, events| circuit.reset(config, events));
    }

    fn record(&self, generation: u64, success: bool, started: Instant) {
        let duration = started.elapsed();
        self.with_circuit(|circuit, config, events| {
            circuit.record(generation, success, duration, config, events)
        });
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping the permit without
/// reporting records a failure.
#[must_use = "dropping a permit without recording an outcome counts as a failure"]
pub struct CallPermit {
    breaker: CircuitBreaker,
    generation: u64,
    started: Instant,
    recorded: bool,
}

impl CallPermit {
    /// Records that the call succeeded.
    pub fn record_success(mut self) {
        self.recorded = true;
        self.breaker.record(self.generation, true, self.started);
    }

    /// Records that the call failed.
    pub fn record_failure(mut self) {
        self.recorded = true;
        self.breaker.record(self.generation, false, self.started);
    }

    /// Records the outcome of `result` and hands it back.
    pub fn record<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        if result.is_ok() {
            self.record_success();
        } else {
            self.record_failure();
        }
        result
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.recorded {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                breaker = %self.breaker.config.name,
                "call dropped before completing; counting as failure"
            );
            self.breaker.record(self.generation, false, self.started);
        }
    }
}

impl std::fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.config.name)
            .field("generation", &self.generation)
            .finish()
    }
}
