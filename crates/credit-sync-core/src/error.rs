//! Error types for credit sync core.

use thiserror::Error;

use crate::types::EventId;

/// Core errors raised while building or decoding envelopes.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The bytes do not form a valid envelope for the current schema.
    /// Never retryable.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid email: {0:?}")]
    InvalidEmail(String),
}

/// Validation errors for credit events that decoded correctly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event {event_id} would set a negative balance ({credits})")]
    NegativeCredits { event_id: EventId, credits: i64 },

    #[error("invalid email: {0:?}")]
    InvalidEmail(String),
}
