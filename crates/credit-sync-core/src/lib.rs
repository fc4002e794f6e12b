//! # Credit Sync Core
//!
//! Pure primitives for the credit synchronization pipeline: accounts, credit
//! events, and the envelope that carries them across the service boundary.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Email`] - Normalized account identifier, also the partition key
//! - [`EventId`] - Content-derived identifier used for idempotent consumption
//! - [`CreditEvent`] - An absolute credit balance announced by a producer
//! - [`UserAccount`] - The persisted user record owned by the ledger
//! - [`Envelope`] - The wire unit `{version, topic, key, event_id, payload}`
//!
//! ## Wire Format
//!
//! Envelopes are encoded as deterministic CBOR with small integer map keys.
//! See the [`envelope`] module.

pub mod account;
pub mod envelope;
pub mod error;
pub mod event;
pub mod types;
pub mod validation;

pub use account::UserAccount;
pub use envelope::{decode_envelope, encode_envelope, Envelope, ENVELOPE_VERSION};
pub use error::{CoreError, ValidationError};
pub use event::CreditEvent;
pub use types::{Email, EventId};
pub use validation::{validate_credit_event, validate_email};

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
