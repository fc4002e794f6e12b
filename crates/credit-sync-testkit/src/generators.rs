//! Proptest generators for property-based testing.

use proptest::prelude::*;

use credit_sync_core::{CreditEvent, Email, EventId};

/// Generate a normalized email address.
pub fn email_address() -> impl Strategy<Value = Email> {
    ("[a-z][a-z0-9._]{0,15}", "[a-z]{1,10}\\.(com|org|io)").prop_map(|(local, domain)| {
        Email::parse(&format!("{}@{}", local, domain)).expect("generated email is valid")
    })
}

/// Generate a random EventId.
pub fn event_id() -> impl Strategy<Value = EventId> {
    any::<[u8; 32]>().prop_map(EventId::from_bytes)
}

/// Generate a valid (non-negative) balance.
pub fn credits() -> impl Strategy<Value = i64> {
    0i64..=1_000_000
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_900_000_000_000
}

/// Generate a credit event with any signed balance.
pub fn credit_event() -> impl Strategy<Value = CreditEvent> {
    (email_address(), any::<i64>(), timestamp(), any::<u64>()).prop_map(
        |(email, credits, produced_at, nonce)| {
            CreditEvent::with_nonce(email, credits, produced_at, nonce)
        },
    )
}

/// Generate an event that passes validation, with an arbitrary id.
pub fn valid_credit_event() -> impl Strategy<Value = CreditEvent> {
    (email_address(), credits(), event_id(), timestamp()).prop_map(
        |(email, credits, event_id, produced_at)| {
            CreditEvent::with_id(email, credits, event_id, produced_at)
        },
    )
}

/// One step of a publish sequence.
#[derive(Debug, Clone)]
pub enum PublishStep {
    /// Publish a new event for account `account` with this balance.
    Fresh { account: usize, credits: i64 },
    /// Publish the event from step `step` again (producer retry / redelivery).
    Repeat { step: usize },
}

/// Generate a sequence of publishes over `accounts` accounts, mixing fresh
/// events (some negative) with repeats of earlier steps.
pub fn publish_sequence(
    accounts: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<PublishStep>> {
    let accounts = accounts.max(1);
    let step = prop_oneof![
        4 => (0..accounts, -5i64..=100).prop_map(|(account, credits)| PublishStep::Fresh { account, credits }),
        1 => any::<usize>().prop_map(|step| PublishStep::Repeat { step }),
    ];
    prop::collection::vec(step, 1..=max_len.max(1))
}
