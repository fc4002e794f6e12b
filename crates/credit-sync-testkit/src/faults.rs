//! Fault injection for ledger stores.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use credit_sync_core::{Email, EventId, UserAccount};
use credit_sync_store::{ApplyOutcome, LedgerStore, RetentionPolicy, StoreError};

/// Wraps a ledger and fails the next `n` credit writes with
/// [`StoreError::Unavailable`]. Everything else passes through.
pub struct FlakyLedger<L: ?Sized> {
    inner: Arc<L>,
    remaining_failures: AtomicU32,
    failed_writes: AtomicU32,
    attempted_writes: AtomicU32,
}

impl<L: LedgerStore + ?Sized> FlakyLedger<L> {
    pub fn new(inner: Arc<L>) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(0),
            failed_writes: AtomicU32::new(0),
            attempted_writes: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` calls to `apply_credit_event`.
    pub fn fail_next_writes(&self, n: u32) {
        self.remaining_failures.store(n, Ordering::SeqCst);
    }

    pub fn failed_writes(&self) -> u32 {
        self.failed_writes.load(Ordering::SeqCst)
    }

    /// Calls to `apply_credit_event`, failed ones included.
    pub fn attempted_writes(&self) -> u32 {
        self.attempted_writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<L> {
        &self.inner
    }

    fn take_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<L: LedgerStore + ?Sized> LedgerStore for FlakyLedger<L> {
    async fn find_by_email(&self, email: &Email) -> Result<Option<UserAccount>, StoreError> {
        self.inner.find_by_email(email).await
    }

    async fn create_account(&self, account: &UserAccount) -> Result<(), StoreError> {
        self.inner.create_account(account).await
    }

    async fn upsert_credits(&self, email: &Email, credits: u64) -> Result<(), StoreError> {
        self.inner.upsert_credits(email, credits).await
    }

    async fn update_last_login(&self, email: &Email, at: i64) -> Result<bool, StoreError> {
        self.inner.update_last_login(email, at).await
    }

    async fn set_number_of_charts(&self, email: &Email, count: u64) -> Result<(), StoreError> {
        self.inner.set_number_of_charts(email, count).await
    }

    async fn has_applied(&self, event_id: &EventId) -> Result<bool, StoreError> {
        self.inner.has_applied(event_id).await
    }

    async fn apply_credit_event(
        &self,
        email: &Email,
        credits: u64,
        event_id: &EventId,
        applied_at: i64,
    ) -> Result<ApplyOutcome, StoreError> {
        self.attempted_writes.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        self.inner
            .apply_credit_event(email, credits, event_id, applied_at)
            .await
    }

    async fn prune_applied(&self, policy: &RetentionPolicy, now: i64) -> Result<usize, StoreError> {
        self.inner.prune_applied(policy, now).await
    }

    async fn applied_count(&self) -> Result<usize, StoreError> {
        self.inner.applied_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_sync_store::MemoryLedger;

    #[tokio::test]
    async fn test_fails_exactly_n_writes() {
        let email = Email::parse("a@x.com").unwrap();
        let inner = Arc::new(MemoryLedger::new());
        inner
            .create_account(&UserAccount::new(email.clone(), 0))
            .await
            .unwrap();

        let flaky = FlakyLedger::new(Arc::clone(&inner));
        flaky.fail_next_writes(1);

        let id = EventId::from_bytes([1; 32]);
        assert!(flaky.apply_credit_event(&email, 5, &id, 1).await.is_err());
        assert!(!inner.has_applied(&id).await.unwrap());

        let outcome = flaky.apply_credit_event(&email, 5, &id, 1).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(flaky.failed_writes(), 1);
        assert_eq!(flaky.attempted_writes(), 2);
    }
}
