use crate::CircuitState;
use rpc_resilience_core::ResilienceEvent;
use std::fmt;
use std::time::{Duration, Instant};

/// What a finished call reported to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call succeeded.
    Success,
    /// The call failed, or its permit was dropped without a result.
    Failure,
}

impl CallOutcome {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
        }
    }

    /// Returns true for [`CallOutcome::Success`].
    pub fn is_success(self) -> bool {
        self == CallOutcome::Success
    }
}

impl From<bool> for CallOutcome {
    fn from(success: bool) -> Self {
        if success {
            CallOutcome::Success
        } else {
            CallOutcome::Failure
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the circuit breaker.
///
/// Events are buffered while the breaker holds its lock and delivered after
/// the lock is released, so listeners never run inside the critical section.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// A call was admitted under `generation`.
    CallPermitted {
        pattern_name: String,
        timestamp: Instant,
        state: CircuitState,
        generation: u64,
    },
    /// A call was rejected without being attempted.
    CallRejected {
        pattern_name: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// The breaker moved to `to_state`, starting `generation`.
    StateTransition {
        pattern_name: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
        generation: u64,
    },
    /// An admitted call finished.
    ///
    /// `stale` outcomes belong to a call admitted before the last transition;
    /// they are reported here but never move the circuit.
    OutcomeRecorded {
        pattern_name: String,
        timestamp: Instant,
        state: CircuitState,
        outcome: CallOutcome,
        duration: Duration,
        stale: bool,
    },
}

impl CircuitBreakerEvent {
    /// The state the breaker was in once the event happened.
    pub fn state(&self) -> CircuitState {
        match *self {
            CircuitBreakerEvent::StateTransition { to_state, .. } => to_state,
            CircuitBreakerEvent::CallPermitted { state, .. }
            | CircuitBreakerEvent::CallRejected { state, .. }
            | CircuitBreakerEvent::OutcomeRecorded { state, .. } => state,
        }
    }
}

impl ResilienceEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::OutcomeRecorded { .. } => "outcome_recorded",
        }
    }

    fn timestamp(&self) -> Instant {
        match *self {
            CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::OutcomeRecorded { timestamp, .. } => timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::CallPermitted { pattern_name, .. }
            | CircuitBreakerEvent::CallRejected { pattern_name, .. }
            | CircuitBreakerEvent::StateTransition { pattern_name, .. }
            | CircuitBreakerEvent::OutcomeRecorded { pattern_name, .. } => pattern_name,
        }
    }
}
