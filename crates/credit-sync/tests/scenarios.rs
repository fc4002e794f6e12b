//! End-to-end credit synchronization scenarios.
//!
//! Each test wires a memory broker, a ledger, a publisher, and a running
//! coordinator, then checks the ledger after the subscriber has caught up.

use std::sync::Arc;

use credit_sync::core::{now_millis, CreditEvent};
use credit_sync::store::{LedgerStore, MemoryLedger};
use credit_sync::stream::{Broker, MemoryBroker};
use credit_sync_testkit::{email, FlakyLedger, SyncFixture, CREDIT_TOPIC, GROUP_ID};

/// Append raw bytes to a topic, bypassing the envelope codec.
async fn raw_publish(broker: &MemoryBroker, topic: &str, key: &str, value: &[u8]) {
    broker
        .publish(topic, key, value.to_vec().into())
        .await
        .unwrap();
}

#[tokio::test]
async fn scenario_a_first_event_sets_balance() {
    let fixture = SyncFixture::memory();
    fixture.seed_account("a@x.com").await;
    fixture.start().await;

    fixture.publish_credits("a@x.com", 10).await;
    fixture.wait_for_processed(1).await;
    fixture.stop().await;

    assert_eq!(fixture.credits_of("a@x.com").await, Some(10));
    assert_eq!(fixture.stats().applied, 1);
}

#[tokio::test]
async fn scenario_b_redelivery_is_not_reapplied() {
    let ledger = Arc::new(FlakyLedger::new(Arc::new(MemoryLedger::new())));
    let fixture = SyncFixture::with_ledger(Arc::clone(&ledger));
    fixture.seed_account("a@x.com").await;
    fixture.start().await;

    let e1 = fixture.publish_credits("a@x.com", 10).await;
    fixture.publish(&e1).await;
    fixture.wait_for_processed(2).await;
    fixture.stop().await;

    assert_eq!(fixture.credits_of("a@x.com").await, Some(10));
    let stats = fixture.stats();
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.skipped, 1);
    // The duplicate never reached the write path.
    assert_eq!(ledger.attempted_writes(), 1);
    assert_eq!(ledger.applied_count().await.unwrap(), 1);
}

#[tokio::test]
async fn scenario_c_later_event_overwrites() {
    let fixture = SyncFixture::memory();
    fixture.seed_account("a@x.com").await;
    fixture.start().await;

    fixture.publish_credits("a@x.com", 10).await;
    fixture.publish_credits("a@x.com", 25).await;
    fixture.wait_for_processed(2).await;
    fixture.stop().await;

    assert_eq!(fixture.credits_of("a@x.com").await, Some(25));
}

#[tokio::test]
async fn scenario_d_orphan_event_creates_nothing() {
    let fixture = SyncFixture::memory();
    fixture.seed_account("a@x.com").await;
    fixture.start().await;

    let orphan = fixture.publish_credits("ghost@x.com", 5).await;
    fixture.wait_for_processed(1).await;
    fixture.stop().await;

    assert_eq!(fixture.stats().orphaned, 1);
    assert_eq!(fixture.credits_of("ghost@x.com").await, None);
    assert!(!fixture.ledger.has_applied(&orphan.event_id).await.unwrap());
}

#[tokio::test]
async fn scenario_e_failed_write_is_retried_then_acked() {
    let ledger = Arc::new(FlakyLedger::new(Arc::new(MemoryLedger::new())));
    let fixture = SyncFixture::with_ledger(Arc::clone(&ledger));
    fixture.seed_account("a@x.com").await;
    ledger.fail_next_writes(1);
    fixture.start().await;

    let event = CreditEvent::new(email("a@x.com"), 10, now_millis());
    let receipt = fixture.publish(&event).await;
    fixture.wait_for_processed(1).await;
    fixture.stop().await;

    let stats = fixture.stats();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(ledger.failed_writes(), 1);
    assert_eq!(ledger.attempted_writes(), 2);
    assert_eq!(ledger.applied_count().await.unwrap(), 1);
    assert_eq!(fixture.credits_of("a@x.com").await, Some(10));
    assert_eq!(
        fixture
            .broker
            .committed_offset(CREDIT_TOPIC, GROUP_ID, receipt.partition)
            .await,
        receipt.offset + 1
    );
}

#[tokio::test]
async fn negative_balance_is_rejected_not_clamped() {
    let fixture = SyncFixture::memory();
    fixture.seed_account("a@x.com").await;
    fixture.start().await;

    fixture.publish_credits("a@x.com", 8).await;
    fixture.publish_credits("a@x.com", -1).await;
    fixture.wait_for_processed(2).await;
    fixture.stop().await;

    assert_eq!(fixture.stats().rejected, 1);
    assert_eq!(fixture.credits_of("a@x.com").await, Some(8));
}

#[tokio::test]
async fn malformed_message_does_not_block_partition() {
    let fixture = SyncFixture::memory();
    fixture.seed_account("a@x.com").await;
    fixture.start().await;

    // Same key, so same partition, ahead of the valid event.
    raw_publish(&fixture.broker, CREDIT_TOPIC, "a@x.com", b"\xff\x00garbage").await;
    fixture.publish_credits("a@x.com", 3).await;
    fixture.wait_for_processed(2).await;
    fixture.stop().await;

    assert_eq!(fixture.stats().malformed, 1);
    assert_eq!(fixture.credits_of("a@x.com").await, Some(3));
}

#[tokio::test]
async fn accounts_converge_independently() {
    let fixture = SyncFixture::memory();
    for addr in ["a@x.com", "b@x.com", "c@x.com"] {
        fixture.seed_account(addr).await;
    }
    fixture.start().await;

    for round in 1..=5 {
        fixture.publish_credits("a@x.com", round).await;
        fixture.publish_credits("b@x.com", round * 10).await;
        fixture.publish_credits("c@x.com", round * 100).await;
    }
    fixture.wait_for_processed(15).await;
    fixture.stop().await;

    assert_eq!(fixture.credits_of("a@x.com").await, Some(5));
    assert_eq!(fixture.credits_of("b@x.com").await, Some(50));
    assert_eq!(fixture.credits_of("c@x.com").await, Some(500));
}
