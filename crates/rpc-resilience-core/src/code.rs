//! Outcome codes exchanged with the remote peer.
//!
//! The set is closed and its integer values match the standard gRPC status
//! codes 0 through 8, so a code survives the wire unchanged.

use std::fmt;
use std::str::FromStr;

/// The outcome of one call, as reported by the peer or the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum OutcomeCode {
    /// The call completed successfully.
    Ok = 0,
    /// The call was cancelled, typically by the caller.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the call could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// The entity a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller lacks permission for the operation.
    PermissionDenied = 7,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
}

impl OutcomeCode {
    /// Every code, in wire order.
    pub const ALL: [OutcomeCode; 9] = [
        OutcomeCode::Ok,
        OutcomeCode::Cancelled,
        OutcomeCode::Unknown,
        OutcomeCode::InvalidArgument,
        OutcomeCode::DeadlineExceeded,
        OutcomeCode::NotFound,
        OutcomeCode::AlreadyExists,
        OutcomeCode::PermissionDenied,
        OutcomeCode::ResourceExhausted,
    ];

    /// Returns the stable wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Converts a wire value, returning `None` for values outside the set.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Converts a wire value, folding anything outside the set into `Unknown`.
    pub fn from_u32_lossy(value: u32) -> Self {
        Self::from_u32(value).unwrap_or(OutcomeCode::Unknown)
    }

    /// Returns true for [`OutcomeCode::Ok`].
    pub fn is_ok(self) -> bool {
        self == OutcomeCode::Ok
    }

    /// The canonical upper-case name, e.g. `RESOURCE_EXHAUSTED`.
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeCode::Ok => "OK",
            OutcomeCode::Cancelled => "CANCELLED",
            OutcomeCode::Unknown => "UNKNOWN",
            OutcomeCode::InvalidArgument => "INVALID_ARGUMENT",
            OutcomeCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            OutcomeCode::NotFound => "NOT_FOUND",
            OutcomeCode::AlreadyExists => "ALREADY_EXISTS",
            OutcomeCode::PermissionDenied => "PERMISSION_DENIED",
            OutcomeCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognised outcome code name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised outcome code `{0}`")]
pub struct ParseOutcomeCodeError(pub String);

impl FromStr for OutcomeCode {
    type Err = ParseOutcomeCodeError;

    /// Accepts the canonical name in any case; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == normalized)
            .ok_or_else(|| ParseOutcomeCodeError(s.to_string()))
    }
}

impl TryFrom<u32> for OutcomeCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value).ok_or(value)
    }
}

impl From<OutcomeCode> for u32 {
    fn from(code: OutcomeCode) -> Self {
        code.as_u32()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for OutcomeCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for OutcomeCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Implemented by errors that carry an [`OutcomeCode`].
///
/// Retry predicates built from a set of codes rely on this to classify errors.
pub trait StatusCoded {
    /// The code carried by this error, if it has one.
    fn outcome_code(&self) -> Option<OutcomeCode>;
}

impl StatusCoded for OutcomeCode {
    fn outcome_code(&self) -> Option<OutcomeCode> {
        Some(*self)
    }
}
