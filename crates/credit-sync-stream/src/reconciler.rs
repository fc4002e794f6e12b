//! Reconciler: applies a credit event to the ledger.
//!
//! Per message:
//!
//! ```text
//! Received -> duplicate? -> Skipped
//!          -> Validated  -> invalid? -> Rejected
//!                        -> Applied  -> Acknowledged
//! ```
//!
//! The reconciler owns steps 2-5 (dedup, validation, lookup, atomic write).
//! Decoding and acknowledgement belong to the subscriber loop in
//! [`crate::coordinator`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use credit_sync_core::{now_millis, validate_credit_event, CreditEvent, Email, EventId};
use credit_sync_store::{ApplyOutcome, LedgerStore, RetentionPolicy, StoreError};

use crate::error::ReconcileError;

/// Successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The balance was overwritten.
    Updated { email: Email, credits: u64 },
    /// The event was already in the idempotency record. Nothing written.
    Duplicate { event_id: EventId },
}

/// Handler invoked by the consumption loop for every decoded event.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, event: CreditEvent) -> Result<Applied, ReconcileError>;

    /// Housekeeping run periodically by the loop. Returns entries removed.
    async fn prune(&self, _now: i64) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Ledger-backed reconciler.
pub struct Reconciler<L: ?Sized> {
    ledger: Arc<L>,
    retention: RetentionPolicy,
}

impl<L: LedgerStore + ?Sized> Reconciler<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self {
            ledger,
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }
}

#[async_trait]
impl<L: LedgerStore + ?Sized + 'static> Reconcile for Reconciler<L> {
    async fn reconcile(&self, event: CreditEvent) -> Result<Applied, ReconcileError> {
        // Fast path: skip the lookup for redelivered events.
        if self.ledger.has_applied(&event.event_id).await? {
            return Ok(Applied::Duplicate {
                event_id: event.event_id,
            });
        }

        let credits = validate_credit_event(&event)?;

        if self.ledger.find_by_email(&event.email).await?.is_none() {
            return Err(ReconcileError::Orphan {
                email: event.email,
                event_id: event.event_id,
            });
        }

        let outcome = self
            .ledger
            .apply_credit_event(&event.email, credits, &event.event_id, now_millis())
            .await?;

        match outcome {
            ApplyOutcome::Applied => Ok(Applied::Updated {
                email: event.email,
                credits,
            }),
            ApplyOutcome::AlreadyApplied => Ok(Applied::Duplicate {
                event_id: event.event_id,
            }),
            // Deleted between lookup and write.
            ApplyOutcome::AccountNotFound => Err(ReconcileError::Orphan {
                email: event.email,
                event_id: event.event_id,
            }),
        }
    }

    async fn prune(&self, now: i64) -> Result<usize, StoreError> {
        self.ledger.prune_applied(&self.retention, now).await
    }
}

/// Outcome counters for one subscription.
#[derive(Debug, Default)]
pub struct ReconcileStats {
    applied: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
    orphaned: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`ReconcileStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub applied: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub malformed: u64,
    pub orphaned: u64,
    pub retries: u64,
}

impl StatsSnapshot {
    /// Messages that reached a terminal state.
    pub fn processed(&self) -> u64 {
        self.applied + self.skipped + self.rejected + self.malformed + self.orphaned
    }
}

impl ReconcileStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record(&self, result: &Result<Applied, ReconcileError>) {
        let counter = match result {
            Ok(Applied::Updated { .. }) => &self.applied,
            Ok(Applied::Duplicate { .. }) => &self.skipped,
            Err(ReconcileError::Rejected(_)) => &self.rejected,
            Err(ReconcileError::Malformed(_)) => &self.malformed,
            Err(ReconcileError::Orphan { .. }) => &self.orphaned,
            Err(ReconcileError::LedgerWrite(_)) => &self.retries,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
