//! CreditEvent: the payload announcing a new absolute credit balance.

use serde::{Deserialize, Serialize};

use crate::types::{Email, EventId};

/// A credit balance announcement for one account.
///
/// `credits` is the new absolute balance, not a delta. It is signed so that a
/// bad producer value survives decoding and can be rejected by validation
/// instead of being silently wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditEvent {
    pub email: Email,
    pub credits: i64,
    pub event_id: EventId,
    /// Producer wall clock (Unix ms). Diagnostics only.
    pub produced_at: i64,
}

impl CreditEvent {
    /// Create a new event with a freshly derived id.
    pub fn new(email: Email, credits: i64, produced_at: i64) -> Self {
        use rand::Rng;
        let nonce: u64 = rand::thread_rng().gen();
        Self::with_nonce(email, credits, produced_at, nonce)
    }

    /// Create an event whose id is derived from an explicit nonce.
    pub fn with_nonce(email: Email, credits: i64, produced_at: i64, nonce: u64) -> Self {
        let event_id = EventId::derive(&email, credits, produced_at, nonce);
        Self {
            email,
            credits,
            event_id,
            produced_at,
        }
    }

    /// Create an event with a caller-chosen id.
    pub fn with_id(email: Email, credits: i64, event_id: EventId, produced_at: i64) -> Self {
        Self {
            email,
            credits,
            event_id,
            produced_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_events_get_distinct_ids() {
        let email = Email::parse("a@x.com").unwrap();
        let e1 = CreditEvent::new(email.clone(), 10, 1000);
        let e2 = CreditEvent::new(email, 10, 1000);
        assert_ne!(e1.event_id, e2.event_id);
    }

    #[test]
    fn test_with_nonce_deterministic() {
        let email = Email::parse("a@x.com").unwrap();
        let e1 = CreditEvent::with_nonce(email.clone(), 10, 1000, 1);
        let e2 = CreditEvent::with_nonce(email, 10, 1000, 1);
        assert_eq!(e1, e2);
    }
}
