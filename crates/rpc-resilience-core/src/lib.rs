//! Core infrastructure for rpc-resilience.
//!
//! This crate provides the pieces shared by every resilience component and the
//! client facade:
//! - Event system for observability
//! - [`OutcomeCode`], the closed set of call outcomes exchanged with the peer
//! - [`TransportError`] with structured detail records
//! - [`CallError`], the terminal error taxonomy surfaced to callers

pub mod code;
pub mod error;
pub mod events;

pub use code::{OutcomeCode, StatusCoded};
pub use error::{CallError, ErrorDetail, PreconditionViolation, TransportError};
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
