use crate::config::CircuitBreakerConfig;
use crate::events::{CallOutcome, CircuitBreakerEvent};
#[cfg(feature = "metrics")]
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CircuitState {
    /// The circuit is closed and calls are allowed.
    Closed = 0,
    /// The circuit is open and calls are rejected.
    Open = 1,
    /// The circuit is half-open and a limited number of probe calls are allowed.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Stable label used in logs and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counters for the current window.
///
/// Reset on every transition into `Closed` or `HalfOpen`, and, in `Closed`,
/// at each counting interval when one is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerCounters {
    /// Outcomes recorded in the window.
    pub requests: usize,
    /// Failed outcomes recorded in the window.
    pub total_failures: usize,
    /// Successful outcomes recorded in the window.
    pub total_successes: usize,
}

impl BreakerCounters {
    /// Failures divided by requests, or 0.0 for an empty window.
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.requests as f64
        }
    }
}

/// Point-in-time view of a breaker, taken under its lock.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitMetrics {
    /// Current state.
    pub state: CircuitState,
    /// Counters of the current window.
    pub counters: BreakerCounters,
    /// `counters.failure_ratio()`, precomputed.
    pub failure_ratio: f64,
    /// Probes admitted in the current half-open episode.
    pub half_open_admitted: usize,
    /// Time since the last state transition.
    pub time_since_state_change: Duration,
    /// Incremented on every transition.
    pub generation: u64,
}

pub(crate) struct Circuit {
    state: CircuitState,
    state_atomic: Arc<AtomicU8>,
    generation: u64,
    last_state_change: Instant,
    window_started: Instant,
    counters: BreakerCounters,
    half_open_admitted: usize,
    half_open_successes: usize,
}

impl Circuit {
    pub(crate) fn new_with_atomic(state_atomic: Arc<AtomicU8>) -> Self {
        let now = Instant::now();
        Self {
            state: CircuitState::Closed,
            state_atomic,
            generation: 0,
            last_state_change: now,
            window_started: now,
            counters: BreakerCounters::default(),
            half_open_admitted: 0,
            half_open_successes: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn metrics(&self) -> CircuitMetrics {
        CircuitMetrics {
            state: self.state,
            counters: self.counters,
            failure_ratio: self.counters.failure_ratio(),
            half_open_admitted: self.half_open_admitted,
            time_since_state_change: self.last_state_change.elapsed(),
            generation: self.generation,
        }
    }

    /// Decides whether a call may proceed. Returns the generation the call was
    /// admitted under.
    pub(crate) fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig,
        events: &mut Vec<CircuitBreakerEvent>,
    ) -> Option<u64> {
        let permitted = match self.state {
            CircuitState::Closed => {
                self.roll_window(config);
                true
            }
            CircuitState::Open => {
                if self.last_state_change.elapsed() >= config.open_duration {
                    self.transition_to(CircuitState::HalfOpen, config, events);
                    self.admit_probe(config)
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.admit_probe(config),
        };

        let timestamp = std::time::Instant::now();
        if permitted {
            events.push(CircuitBreakerEvent::CallPermitted {
                pattern_name: config.name.clone(),
                timestamp,
                state: self.state,
                generation: self.generation,
            });
            Some(self.generation)
        } else {
            events.push(CircuitBreakerEvent::CallRejected {
                pattern_name: config.name.clone(),
                timestamp,
                state: self.state,
            });

            #[cfg(feature = "metrics")]
            counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "rejected").increment(1);

            None
        }
    }

    fn admit_probe(&mut self, config: &CircuitBreakerConfig) -> bool {
        if self.half_open_admitted < config.max_half_open_requests {
            self.half_open_admitted += 1;
            true
        } else {
            false
        }
    }

    fn roll_window(&mut self, config: &CircuitBreakerConfig) {
        if let Some(interval) = config.counting_interval {
            if self.window_started.elapsed() >= interval {
                self.counters = BreakerCounters::default();
                self.window_started = Instant::now();
            }
        }
    }

    /// Records the outcome of a call admitted under `generation`.
    ///
    /// Outcomes from an earlier generation are reported to listeners but do not
    /// move the circuit.
    pub(crate) fn record(
        &mut self,
        generation: u64,
        success: bool,
        duration: Duration,
        config: &CircuitBreakerConfig,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        let outcome = CallOutcome::from(success);
        let stale = generation != self.generation;
        events.push(CircuitBreakerEvent::OutcomeRecorded {
            pattern_name: config.name.clone(),
            timestamp: std::time::Instant::now(),
            state: self.state,
            outcome,
            duration,
            stale,
        });

        #[cfg(feature = "metrics")]
        {
            counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => outcome.as_str()).increment(1);
            histogram!("circuitbreaker_call_duration_seconds", "circuitbreaker" => config.name.clone())
                .record(duration.as_secs_f64());
        }

        if stale {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                breaker = %config.name,
                admitted = generation,
                current = self.generation,
                "ignoring outcome from an earlier circuit generation"
            );
            return;
        }

        match self.state {
            CircuitState::Closed => {
                self.roll_window(config);
                self.count(success);
                self.evaluate_window(config, events);
            }
            CircuitState::HalfOpen => {
                self.count(success);
                if !success {
                    self.transition_to(CircuitState::Open, config, events);
                } else {
                    self.half_open_successes += 1;
                    if self.half_open_successes >= config.max_half_open_requests {
                        self.transition_to(CircuitState::Closed, config, events);
                    }
                }
            }
            // Any call admitted while open belongs to an earlier generation.
            CircuitState::Open => {}
        }
    }

    fn count(&mut self, success: bool) {
        self.counters.requests += 1;
        if success {
            self.counters.total_successes += 1;
        } else {
            self.counters.total_failures += 1;
        }
    }

    fn evaluate_window(
        &mut self,
        config: &CircuitBreakerConfig,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        if self.counters.requests < config.minimum_request_volume {
            return;
        }
        if self.counters.failure_ratio() > config.failure_ratio_threshold {
            self.transition_to(CircuitState::Open, config, events);
        }
    }

    pub(crate) fn force_open(
        &mut self,
        config: &CircuitBreakerConfig,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        self.transition_to(CircuitState::Open, config, events);
    }

    pub(crate) fn reset(
        &mut self,
        config: &CircuitBreakerConfig,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        self.transition_to(CircuitState::Closed, config, events);
        self.counters = BreakerCounters::default();
        self.window_started = Instant::now();
    }

    fn transition_to(
        &mut self,
        state: CircuitState,
        config: &CircuitBreakerConfig,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        if self.state == state {
            return;
        }

        let from_state = self.state;
        let generation = self.generation.wrapping_add(1);

        events.push(CircuitBreakerEvent::StateTransition {
            pattern_name: config.name.clone(),
            timestamp: std::time::Instant::now(),
            from_state,
            to_state: state,
            generation,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(
            breaker = %config.name,
            from = %from_state,
            to = %state,
            failures = self.counters.total_failures,
            requests = self.counters.requests,
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuitbreaker_transitions_total",
                "circuitbreaker" => config.name.clone(),
                "from" => from_state.as_str(),
                "to" => state.as_str()
            )
            .increment(1);
            gauge!("circuitbreaker_state", "circuitbreaker" => config.name.clone())
                .set(state as u8 as f64);
        }

        let now = Instant::now();
        self.state = state;
        self.state_atomic.store(state as u8, Ordering::Release);
        self.generation = generation;
        self.last_state_change = now;
        self.half_open_admitted = 0;
        self.half_open_successes = 0;
        if matches!(state, CircuitState::Closed | CircuitState::HalfOpen) {
            self.counters = BreakerCounters::default();
            self.window_started = now;
        }
    }
}
