//! Request and response values exchanged with the resiliency service.

use crate::metadata::Metadata;
use rpc_resilience_core::OutcomeCode;
use std::time::Duration;

/// A request to the resiliency service.
///
/// Carries an opaque payload plus the simulation parameters the peer honours:
/// it waits a random time between `min_delay` and `max_delay`, then answers
/// with one of `desired_status_codes`.
///
/// Requests are never mutated in place; the `with_*` methods return a new
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    payload: String,
    min_delay_seconds: u32,
    max_delay_seconds: u32,
    desired_status_codes: Vec<OutcomeCode>,
}

impl CallRequest {
    /// Creates a request with an empty payload.
    pub fn new(
        min_delay_seconds: u32,
        max_delay_seconds: u32,
        desired_status_codes: impl IntoIterator<Item = OutcomeCode>,
    ) -> Self {
        Self {
            payload: String::new(),
            min_delay_seconds,
            max_delay_seconds,
            desired_status_codes: desired_status_codes.into_iter().collect(),
        }
    }

    /// Returns a copy of this request carrying `payload`.
    pub fn with_payload(&self, payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..self.clone()
        }
    }

    /// The opaque payload.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Lower bound of the simulated delay, in seconds.
    pub fn min_delay_seconds(&self) -> u32 {
        self.min_delay_seconds
    }

    /// Upper bound of the simulated delay, in seconds.
    pub fn max_delay_seconds(&self) -> u32 {
        self.max_delay_seconds
    }

    /// Lower bound of the simulated delay.
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay_seconds.into())
    }

    /// Upper bound of the simulated delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds.into())
    }

    /// Codes the peer should choose its answer from, in order.
    pub fn desired_status_codes(&self) -> &[OutcomeCode] {
        &self.desired_status_codes
    }
}

/// A response from the resiliency service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    payload: String,
    status: OutcomeCode,
    headers: Metadata,
}

impl CallResponse {
    /// Creates a response.
    pub fn new(payload: impl Into<String>, status: OutcomeCode) -> Self {
        Self {
            payload: payload.into(),
            status,
            headers: Metadata::new(),
        }
    }

    /// Creates an `OK` response.
    pub fn ok(payload: impl Into<String>) -> Self {
        Self::new(payload, OutcomeCode::Ok)
    }

    /// Returns a copy carrying `payload`.
    pub fn with_payload(&self, payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..self.clone()
        }
    }

    /// Attaches response header metadata.
    pub fn with_headers(self, headers: Metadata) -> Self {
        Self { headers, ..self }
    }

    /// The opaque payload.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The in-band status reported by the peer.
    pub fn status(&self) -> OutcomeCode {
        self.status
    }

    /// Header metadata received with the response (unary and
    /// client-streaming calls).
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }
}
