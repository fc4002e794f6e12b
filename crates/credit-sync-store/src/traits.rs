//! LedgerStore trait: the abstract interface over persisted user records.
//!
//! Implementations include SQLite (primary) and in-memory (tests, embedded).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use credit_sync_core::{Email, EventId, UserAccount};

use crate::error::Result;

/// Result of applying a credit event to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Balance overwritten and event recorded.
    Applied,
    /// The event id is already in the idempotency record. Nothing written.
    AlreadyApplied,
    /// No account with this email. Nothing written.
    AccountNotFound,
}

/// Bounds on the idempotency record.
///
/// Entries older than `ttl` are dropped, then only the newest `max_entries`
/// are kept. `None` disables a bound.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub max_entries: Option<usize>,
    #[serde(rename = "ttl_ms", with = "duration_ms_opt")]
    pub ttl: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_entries: Some(10_000),
            ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

impl RetentionPolicy {
    /// Keep everything.
    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            ttl: None,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Entries applied strictly before this timestamp are expired.
    pub fn cutoff(&self, now: i64) -> Option<i64> {
        self.ttl
            .map(|ttl| now.saturating_sub(ttl.as_millis().min(i64::MAX as u128) as i64))
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// The LedgerStore trait: async interface over user accounts and the
/// idempotency record.
///
/// # Design Notes
///
/// - Credit writes never create accounts; a missing account is reported.
/// - [`apply_credit_event`](LedgerStore::apply_credit_event) is the only
///   write path used by the reconciler and must be atomic: either both the
///   balance and the idempotency entry are persisted, or neither is.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Account Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up an account by email.
    async fn find_by_email(&self, email: &Email) -> Result<Option<UserAccount>>;

    /// Insert a new account. Fails with `AlreadyExists` if the email is taken.
    async fn create_account(&self, account: &UserAccount) -> Result<()>;

    /// Overwrite the balance of an existing account.
    ///
    /// Fails with `NotFound` rather than creating the account.
    async fn upsert_credits(&self, email: &Email, credits: u64) -> Result<()>;

    /// Move `last_login` forward.
    ///
    /// Returns false if `at` is older than the stored value (nothing written).
    async fn update_last_login(&self, email: &Email, at: i64) -> Result<bool>;

    /// Set the mirrored chart count.
    async fn set_number_of_charts(&self, email: &Email, count: u64) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Idempotency Record
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the event id is in the idempotency record.
    async fn has_applied(&self, event_id: &EventId) -> Result<bool>;

    /// Overwrite the balance and record the event id in one atomic step.
    async fn apply_credit_event(
        &self,
        email: &Email,
        credits: u64,
        event_id: &EventId,
        applied_at: i64,
    ) -> Result<ApplyOutcome>;

    /// Drop idempotency entries outside the retention window.
    ///
    /// Returns the number of entries removed.
    async fn prune_applied(&self, policy: &RetentionPolicy, now: i64) -> Result<usize>;

    /// Number of entries in the idempotency record.
    async fn applied_count(&self) -> Result<usize>;
}

/// Extension trait for common ledger lookups.
pub trait LedgerStoreExt: LedgerStore {
    /// Current balance of an account, if it exists.
    fn credits_of(
        &self,
        email: &Email,
    ) -> impl std::future::Future<Output = Result<Option<u64>>> + Send;
}

impl<S: LedgerStore + ?Sized> LedgerStoreExt for S {
    async fn credits_of(&self, email: &Email) -> Result<Option<u64>> {
        Ok(self.find_by_email(email).await?.map(|a| a.credits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_cutoff() {
        let policy = RetentionPolicy::unbounded().with_ttl(Duration::from_millis(500));
        assert_eq!(policy.cutoff(1_000), Some(500));
        assert_eq!(RetentionPolicy::unbounded().cutoff(1_000), None);
    }

    #[test]
    fn test_retention_default() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.max_entries, Some(10_000));
        assert_eq!(policy.ttl, Some(Duration::from_secs(86_400)));
    }
}
