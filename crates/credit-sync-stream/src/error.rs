//! Error types for the stream module.

use thiserror::Error;

use credit_sync_core::{CoreError, Email, EventId, ValidationError};
use credit_sync_store::StoreError;

/// Transport and lifecycle errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The broker cannot be reached right now. Callers may retry later.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The consumer was closed.
    #[error("consumer closed")]
    Closed,

    /// `start` called on a coordinator that is already running.
    #[error("coordinator already started")]
    AlreadyStarted,

    /// `stop` called on a coordinator that is not running.
    #[error("coordinator not started")]
    NotStarted,

    /// The consumption task panicked or was aborted.
    #[error("consumption task failed: {0}")]
    Task(String),
}

/// Failure to append an envelope to a topic.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker was unavailable. Nothing was appended; the caller decides
    /// whether to retry.
    #[error("transient publish failure: {0}")]
    Transient(String),

    /// Non-recoverable transport failure.
    #[error("publish failed: {0}")]
    Broker(#[source] StreamError),
}

impl StreamError {
    /// Whether the operation may succeed if repeated later on the same
    /// consumer. Everything else ends the consumption loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Unavailable(_))
    }
}

impl From<StreamError> for PublishError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Unavailable(msg) => PublishError::Transient(msg),
            other => PublishError::Broker(other),
        }
    }
}

/// Why a credit event was not applied.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The message could not be decoded. Dropped.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] CoreError),

    /// The event failed validation. Dropped.
    #[error("rejected: {0}")]
    Rejected(#[from] ValidationError),

    /// No account exists for the event's email. Dropped, nothing created.
    #[error("orphan event {event_id} for unknown account {email}")]
    Orphan { email: Email, event_id: EventId },

    /// The ledger write failed. The message stays unacknowledged and is
    /// retried.
    #[error("ledger write failed: {0}")]
    LedgerWrite(#[from] StoreError),
}

impl ReconcileError {
    /// Whether the message should be redelivered rather than acknowledged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::LedgerWrite(_))
    }
}

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;
