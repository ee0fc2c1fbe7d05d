use thiserror::Error;

/// Errors returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute).
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open (or its half-open probes are all taken).
    #[error("circuit breaker '{name}' is open; call not permitted")]
    OpenCircuit {
        /// Name of the rejecting breaker.
        name: String,
    },

    /// The wrapped operation failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if the breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::OpenCircuit { .. })
    }

    /// Returns the operation's error, if the operation ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::OpenCircuit { .. } => None,
        }
    }
}

impl From<CircuitBreakerError<rpc_resilience_core::CallError>> for rpc_resilience_core::CallError {
    fn from(err: CircuitBreakerError<rpc_resilience_core::CallError>) -> Self {
        match err {
            CircuitBreakerError::OpenCircuit { name } => {
                rpc_resilience_core::CallError::CircuitOpen { name }
            }
            CircuitBreakerError::Inner(e) => e,
        }
    }
}
