//! Error taxonomy for resilient calls.
//!
//! Two layers of error exist:
//!
//! - [`TransportError`] is produced by the remote peer or the transport. It
//!   carries an [`OutcomeCode`] and, optionally, structured detail records.
//! - [`CallError`] is what a caller finally sees. It wraps a transport error
//!   or reports a local decision: the circuit rejected the call, retries ran
//!   out, the deadline expired, or an interceptor refused the call.
//!
//! ```rust
//! use rpc_resilience_core::{CallError, OutcomeCode, TransportError};
//!
//! fn describe(error: &CallError) -> String {
//!     match error {
//!         CallError::CircuitOpen { name } => format!("breaker {name} is open"),
//!         CallError::RetriesExhausted { attempts, last } => {
//!             format!("gave up after {attempts} attempts: {}", last.code())
//!         }
//!         CallError::DeadlineExceeded { after } => format!("timed out after {after:?}"),
//!         other => other.to_string(),
//!     }
//! }
//!
//! let err = CallError::from(TransportError::new(OutcomeCode::NotFound, "no such account"));
//! assert_eq!(err.outcome_code(), Some(OutcomeCode::NotFound));
//! assert!(describe(&err).contains("no such account"));
//! ```

use crate::code::{OutcomeCode, StatusCoded};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One violated precondition reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreconditionViolation {
    /// The field or subject that failed the check.
    pub field: String,
    /// Human-readable description of the violation.
    pub description: String,
}

/// A structured detail record attached to a [`TransportError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    /// One or more preconditions were not met.
    PreconditionFailure(Vec<PreconditionViolation>),
    /// Machine-readable cause of the error.
    ErrorInfo {
        /// Logical grouping the reason belongs to (e.g. a service name).
        domain: String,
        /// Constant identifier for the cause, e.g. `QUOTA_EXCEEDED`.
        reason: String,
        /// Additional key/value context.
        metadata: BTreeMap<String, String>,
    },
}

/// An error produced by the transport or returned by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    code: OutcomeCode,
    message: String,
    details: Vec<ErrorDetail>,
}

impl TransportError {
    /// Creates an error with the given code and message and no details.
    pub fn new(code: OutcomeCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Attaches a structured detail record.
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// The outcome code.
    pub fn code(&self) -> OutcomeCode {
        self.code
    }

    /// The peer's message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// All detail records, in the order the peer sent them.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Every precondition violation across all `PreconditionFailure` records.
    pub fn precondition_violations(&self) -> impl Iterator<Item = &PreconditionViolation> {
        self.details.iter().flat_map(|detail| match detail {
            ErrorDetail::PreconditionFailure(violations) => violations.as_slice(),
            ErrorDetail::ErrorInfo { .. } => &[],
        })
    }

    /// The first `ErrorInfo` record as `(domain, reason, metadata)`.
    pub fn error_info(&self) -> Option<(&str, &str, &BTreeMap<String, String>)> {
        self.details.iter().find_map(|detail| match detail {
            ErrorDetail::ErrorInfo {
                domain,
                reason,
                metadata,
            } => Some((domain.as_str(), reason.as_str(), metadata)),
            ErrorDetail::PreconditionFailure(_) => None,
        })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for TransportError {}

impl StatusCoded for TransportError {
    fn outcome_code(&self) -> Option<OutcomeCode> {
        Some(self.code)
    }
}

/// The terminal error of a resilient call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The transport or the peer failed the call.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The circuit breaker rejected the call without attempting it.
    #[error("circuit breaker '{name}' is open; call not permitted")]
    CircuitOpen {
        /// Name of the breaker that rejected the call.
        name: String,
    },

    /// Every permitted attempt failed with a retryable code.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: usize,
        /// The failure observed on the last attempt.
        last: TransportError,
    },

    /// The call's deadline expired before it completed.
    #[error("deadline exceeded after {after:?}")]
    DeadlineExceeded {
        /// The timeout that was attached to the call.
        after: Duration,
    },

    /// An interceptor stage refused the call.
    #[error("interceptor '{stage}' rejected the call: {message}")]
    Interceptor {
        /// Name of the refusing stage.
        stage: String,
        /// Why the stage refused.
        message: String,
    },

    /// The call was cancelled locally before it completed.
    #[error("call cancelled")]
    Cancelled,
}

impl CallError {
    /// Returns `true` if the call timed out locally or remotely.
    pub fn is_timeout(&self) -> bool {
        match self {
            CallError::DeadlineExceeded { .. } => true,
            CallError::Transport(err) => err.code() == OutcomeCode::DeadlineExceeded,
            _ => false,
        }
    }

    /// Returns `true` if the circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    /// Returns `true` if retries were exhausted.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, CallError::RetriesExhausted { .. })
    }

    /// The transport error behind this call error, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            CallError::Transport(err) => Some(err),
            CallError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// The outcome code best describing this error.
    ///
    /// Local rejections (open circuit, interceptor refusal) have no code.
    pub fn outcome_code(&self) -> Option<OutcomeCode> {
        match self {
            CallError::Transport(err) => Some(err.code()),
            CallError::RetriesExhausted { last, .. } => Some(last.code()),
            CallError::DeadlineExceeded { .. } => Some(OutcomeCode::DeadlineExceeded),
            CallError::Cancelled => Some(OutcomeCode::Cancelled),
            CallError::CircuitOpen { .. } | CallError::Interceptor { .. } => None,
        }
    }
}

impl StatusCoded for CallError {
    fn outcome_code(&self) -> Option<OutcomeCode> {
        CallError::outcome_code(self)
    }
}
