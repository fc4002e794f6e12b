//! # Credit Sync Testkit
//!
//! Testing utilities for the credit synchronization pipeline.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a broker, ledger, publisher, and coordinator wired together
//! - **Generators**: Proptest strategies for emails, credit events, and publish sequences
//! - **Faults**: a ledger wrapper that fails writes on demand
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use credit_sync_testkit::SyncFixture;
//!
//! async fn example() {
//!     let fixture = SyncFixture::memory();
//!     fixture.seed_account("a@x.com").await;
//!     fixture.start().await;
//!
//!     fixture.publish_credits("a@x.com", 10).await;
//!     fixture.wait_for_processed(1).await;
//!
//!     assert_eq!(fixture.credits_of("a@x.com").await, Some(10));
//!     fixture.stop().await;
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use credit_sync_testkit::generators::credit_event;
//!
//! proptest! {
//!     #[test]
//!     fn envelope_round_trips(event in credit_event()) {
//!         let envelope = credit_sync_core::Envelope::new("credit-data", event);
//!         let decoded = credit_sync_core::decode_envelope(&envelope.encode()).unwrap();
//!         prop_assert_eq!(decoded, envelope);
//!     }
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::FlakyLedger;
pub use fixtures::{email, fast_config, SyncFixture, CREDIT_TOPIC, GROUP_ID};
pub use generators::{
    credit_event, email_address, publish_sequence, valid_credit_event, PublishStep,
};
