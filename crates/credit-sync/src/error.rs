//! Error types for the user service.

use credit_sync_core::{Email, ValidationError};
use credit_sync_store::StoreError;
use credit_sync_stream::StreamError;
use thiserror::Error;

/// Errors that can occur during service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or invalid request fields.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No account for this email.
    #[error("user not found: {0}")]
    UserNotFound(Email),

    /// An account with this email already exists.
    #[error("user already exists: {0}")]
    AlreadyExists(Email),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Broker or coordinator error.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
