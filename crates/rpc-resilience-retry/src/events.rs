use crate::Attempt;
use rpc_resilience_core::events::ResilienceEvent;
use std::time::{Duration, Instant};

/// Events emitted by a [`RetryExecutor`](crate::RetryExecutor).
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// An attempt finished, successfully or not.
    AttemptCompleted {
        pattern_name: String,
        timestamp: Instant,
        attempt: Attempt,
    },
    /// A retry is about to be made after `delay`.
    Retry {
        pattern_name: String,
        timestamp: Instant,
        /// The attempt that is about to run (2 for the first retry).
        attempt: usize,
        delay: Duration,
    },
    /// The operation succeeded, on the first attempt or after retries.
    Success {
        pattern_name: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// Every attempt failed with a retryable error.
    Exhausted {
        pattern_name: String,
        timestamp: Instant,
        attempts: usize,
    },
    /// An error was not retryable and was returned immediately.
    IgnoredError {
        pattern_name: String,
        timestamp: Instant,
        attempts: usize,
    },
}

impl ResilienceEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::AttemptCompleted { .. } => "attempt_completed",
            RetryEvent::Retry { .. } => "retry",
            RetryEvent::Success { .. } => "success",
            RetryEvent::Exhausted { .. } => "exhausted",
            RetryEvent::IgnoredError { .. } => "ignored_error",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::AttemptCompleted { timestamp, .. }
            | RetryEvent::Retry { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. }
            | RetryEvent::IgnoredError { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RetryEvent::AttemptCompleted { pattern_name, .. }
            | RetryEvent::Retry { pattern_name, .. }
            | RetryEvent::Success { pattern_name, .. }
            | RetryEvent::Exhausted { pattern_name, .. }
            | RetryEvent::IgnoredError { pattern_name, .. } => pattern_name,
        }
    }
}
