//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use credit_sync_core::{now_millis, CreditEvent, Email, UserAccount};
use credit_sync_store::{LedgerStore, MemoryLedger};
use credit_sync_stream::{
    Coordinator, MemoryBroker, PublishReceipt, Publisher, Reconciler, RetryPolicy,
    StatsSnapshot, SubscriberConfig,
};

/// Topic the fixture consumes.
pub const CREDIT_TOPIC: &str = "credit-data";

/// Consumer group the fixture joins.
pub const GROUP_ID: &str = "user-info-manager";

/// Parse an email, panicking on bad input.
pub fn email(raw: &str) -> Email {
    Email::parse(raw).expect("valid test email")
}

/// Short timeouts so tests finish quickly.
pub fn fast_config() -> SubscriberConfig {
    SubscriberConfig::default()
        .with_poll_timeout(Duration::from_millis(10))
        .with_retry(
            RetryPolicy::default()
                .with_initial_delay(Duration::from_millis(2))
                .with_max_delay(Duration::from_millis(50)),
        )
}

/// A broker, a ledger, and both ends of the credit topic.
pub struct SyncFixture<L: ?Sized = MemoryLedger> {
    pub broker: MemoryBroker,
    pub ledger: Arc<L>,
    pub publisher: Publisher,
    pub coordinator: Coordinator,
}

impl SyncFixture<MemoryLedger> {
    /// Fixture over a fresh in-memory ledger.
    pub fn memory() -> Self {
        Self::with_ledger(Arc::new(MemoryLedger::new()))
    }
}

impl<L: LedgerStore + ?Sized + 'static> SyncFixture<L> {
    /// Fixture over an existing ledger and a fresh broker.
    pub fn with_ledger(ledger: Arc<L>) -> Self {
        Self::with_broker(MemoryBroker::new(), ledger)
    }

    /// Fixture sharing `broker` with other fixtures.
    pub fn with_broker(broker: MemoryBroker, ledger: Arc<L>) -> Self {
        let publisher = Publisher::new(Arc::new(broker.clone()));
        let coordinator = Coordinator::new(Arc::new(broker.clone()), fast_config());
        Self {
            broker,
            ledger,
            publisher,
            coordinator,
        }
    }

    /// Create an account with zero credits.
    pub async fn seed_account(&self, raw: &str) {
        self.ledger
            .create_account(&UserAccount::new(email(raw), now_millis()))
            .await
            .expect("seed account");
    }

    /// Start consuming the credit topic with a ledger-backed reconciler.
    pub async fn start(&self) {
        let reconciler = Reconciler::new(Arc::clone(&self.ledger));
        self.coordinator
            .start(CREDIT_TOPIC, GROUP_ID, Arc::new(reconciler))
            .await
            .expect("start coordinator");
    }

    pub async fn stop(&self) {
        self.coordinator.stop().await.expect("stop coordinator");
    }

    /// Publish a fresh event setting `raw`'s balance to `credits`.
    pub async fn publish_credits(&self, raw: &str, credits: i64) -> CreditEvent {
        let event = CreditEvent::new(email(raw), credits, now_millis());
        self.publish(&event).await;
        event
    }

    /// Publish an existing event again, as a producer retry would.
    pub async fn publish(&self, event: &CreditEvent) -> PublishReceipt {
        self.publisher
            .publish(CREDIT_TOPIC, event)
            .await
            .expect("publish")
    }

    pub async fn credits_of(&self, raw: &str) -> Option<u64> {
        self.ledger
            .find_by_email(&email(raw))
            .await
            .expect("ledger read")
            .map(|account| account.credits)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.coordinator.stats()
    }

    /// Wait until `n` messages reached a terminal state.
    pub async fn wait_for_processed(&self, n: u64) {
        self.wait_until(|stats| stats.processed() >= n).await;
    }

    /// Poll the coordinator's counters until `pred` holds. Panics after 5s.
    pub async fn wait_until(&self, pred: impl Fn(&StatsSnapshot) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stats = self.stats();
            if pred(&stats) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for subscriber: {:?}",
                stats
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
