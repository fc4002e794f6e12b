//! In-memory implementation of the LedgerStore trait.
//!
//! Same semantics as SQLite but nothing is persisted. Used by tests and by
//! embedded setups that don't need durability.

use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use credit_sync_core::{Email, EventId, UserAccount};

use crate::error::{Result, StoreError};
use crate::traits::{ApplyOutcome, LedgerStore, RetentionPolicy};

/// In-memory ledger.
///
/// All data is lost when the ledger is dropped. Thread-safe via RwLock.
pub struct MemoryLedger {
    inner: RwLock<MemoryLedgerInner>,
}

#[derive(Default)]
struct MemoryLedgerInner {
    accounts: HashMap<Email, UserAccount>,

    /// event_id -> applied_at.
    applied: HashMap<EventId, i64>,

    /// Insertion order of `applied`, oldest first.
    applied_order: VecDeque<(EventId, i64)>,
}

impl MemoryLedger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryLedgerInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryLedgerInner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("ledger lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryLedgerInner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("ledger lock poisoned".into()))
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerInner {
    fn account_mut(&mut self, email: &Email) -> Result<&mut UserAccount> {
        self.accounts
            .get_mut(email)
            .ok_or_else(|| StoreError::NotFound(email.to_string()))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn find_by_email(&self, email: &Email) -> Result<Option<UserAccount>> {
        Ok(self.read()?.accounts.get(email).cloned())
    }

    async fn create_account(&self, account: &UserAccount) -> Result<()> {
        let mut inner = self.write()?;
        if inner.accounts.contains_key(&account.email) {
            return Err(StoreError::AlreadyExists(account.email.to_string()));
        }
        inner.accounts.insert(account.email.clone(), account.clone());
        Ok(())
    }

    async fn upsert_credits(&self, email: &Email, credits: u64) -> Result<()> {
        self.write()?.account_mut(email)?.credits = credits;
        Ok(())
    }

    async fn update_last_login(&self, email: &Email, at: i64) -> Result<bool> {
        Ok(self.write()?.account_mut(email)?.record_login(at))
    }

    async fn set_number_of_charts(&self, email: &Email, count: u64) -> Result<()> {
        self.write()?.account_mut(email)?.number_of_charts = count;
        Ok(())
    }

    async fn has_applied(&self, event_id: &EventId) -> Result<bool> {
        Ok(self.read()?.applied.contains_key(event_id))
    }

    async fn apply_credit_event(
        &self,
        email: &Email,
        credits: u64,
        event_id: &EventId,
        applied_at: i64,
    ) -> Result<ApplyOutcome> {
        let mut inner = self.write()?;

        if inner.applied.contains_key(event_id) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let Some(account) = inner.accounts.get_mut(email) else {
            return Ok(ApplyOutcome::AccountNotFound);
        };
        account.credits = credits;

        inner.applied.insert(*event_id, applied_at);
        inner.applied_order.push_back((*event_id, applied_at));

        Ok(ApplyOutcome::Applied)
    }

    async fn prune_applied(&self, policy: &RetentionPolicy, now: i64) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.applied_order.len();

        if let Some(cutoff) = policy.cutoff(now) {
            // applied_at is not guaranteed monotonic across callers, so scan.
            let MemoryLedgerInner {
                applied,
                applied_order,
                ..
            } = &mut *inner;
            applied_order.retain(|(id, at)| {
                let keep = *at >= cutoff;
                if !keep {
                    applied.remove(id);
                }
                keep
            });
        }

        if let Some(max) = policy.max_entries {
            while inner.applied_order.len() > max {
                if let Some((id, _)) = inner.applied_order.pop_front() {
                    inner.applied.remove(&id);
                }
            }
        }

        Ok(before - inner.applied_order.len())
    }

    async fn applied_count(&self) -> Result<usize> {
        Ok(self.read()?.applied.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LedgerStoreExt;
    use std::time::Duration;

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    async fn ledger_with(addr: &str) -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger
            .create_account(&UserAccount::new(email(addr), 1000))
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let ledger = ledger_with("a@x.com").await;
        let account = ledger.find_by_email(&email("a@x.com")).await.unwrap().unwrap();
        assert_eq!(account.credits, 0);
        assert!(ledger.find_by_email(&email("b@x.com")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let ledger = ledger_with("a@x.com").await;
        let err = ledger
            .create_account(&UserAccount::new(email("a@x.com"), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_upsert_credits_never_creates() {
        let ledger = MemoryLedger::new();
        let err = ledger.upsert_credits(&email("ghost@x.com"), 5).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(ledger.find_by_email(&email("ghost@x.com")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_idempotent() {
        let ledger = ledger_with("a@x.com").await;
        let id = EventId::from_bytes([1; 32]);

        let r1 = ledger
            .apply_credit_event(&email("a@x.com"), 10, &id, 1)
            .await
            .unwrap();
        assert_eq!(r1, ApplyOutcome::Applied);

        let r2 = ledger
            .apply_credit_event(&email("a@x.com"), 99, &id, 2)
            .await
            .unwrap();
        assert_eq!(r2, ApplyOutcome::AlreadyApplied);

        assert_eq!(ledger.credits_of(&email("a@x.com")).await.unwrap(), Some(10));
        assert_eq!(ledger.applied_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_apply_orphan_records_nothing() {
        let ledger = MemoryLedger::new();
        let id = EventId::from_bytes([2; 32]);

        let outcome = ledger
            .apply_credit_event(&email("ghost@x.com"), 10, &id, 1)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::AccountNotFound);
        assert!(!ledger.has_applied(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_by_count_and_ttl() {
        let ledger = ledger_with("a@x.com").await;
        for i in 0..5u8 {
            ledger
                .apply_credit_event(&email("a@x.com"), i as u64, &EventId::from_bytes([i; 32]), i as i64 * 100)
                .await
                .unwrap();
        }

        // TTL drops applied_at < 200 (ids 0 and 1).
        let policy = RetentionPolicy::unbounded().with_ttl(Duration::from_millis(300));
        assert_eq!(ledger.prune_applied(&policy, 500).await.unwrap(), 2);
        assert!(!ledger.has_applied(&EventId::from_bytes([0; 32])).await.unwrap());

        // Count keeps the newest two.
        let policy = RetentionPolicy::unbounded().with_max_entries(2);
        assert_eq!(ledger.prune_applied(&policy, 500).await.unwrap(), 1);
        assert!(ledger.has_applied(&EventId::from_bytes([4; 32])).await.unwrap());
        assert!(!ledger.has_applied(&EventId::from_bytes([2; 32])).await.unwrap());
    }

    #[tokio::test]
    async fn test_last_login_monotonic() {
        let ledger = ledger_with("a@x.com").await;
        assert!(ledger.update_last_login(&email("a@x.com"), 2000).await.unwrap());
        assert!(!ledger.update_last_login(&email("a@x.com"), 1500).await.unwrap());
        let account = ledger.find_by_email(&email("a@x.com")).await.unwrap().unwrap();
        assert_eq!(account.last_login, 2000);
    }
}
