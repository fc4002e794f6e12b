//! # Credit Sync Stream
//!
//! Event plumbing between the services: a broker abstraction, the publisher
//! that emits credit events, and the reconciling subscriber that applies them
//! to the ledger.
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once**: a record is acknowledged only after the ledger write
//!   and its idempotency entry are committed
//! - **Idempotent apply**: redelivered events are recognised by id and skipped
//! - **Per-key ordering**: records are partitioned by account email
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use credit_sync_store::MemoryLedger;
//! use credit_sync_stream::{Coordinator, MemoryBroker, Reconciler, SubscriberConfig};
//!
//! async fn example() -> credit_sync_stream::Result<()> {
//!     let broker = MemoryBroker::new();
//!     let ledger = Arc::new(MemoryLedger::new());
//!
//!     let coordinator = Coordinator::new(Arc::new(broker), SubscriberConfig::default());
//!     coordinator
//!         .start("credit-data", "user-info-manager", Arc::new(Reconciler::new(ledger)))
//!         .await?;
//!
//!     // ... serve traffic ...
//!
//!     coordinator.stop().await
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Producer            Broker                 Subscriber            Ledger
//!   |-- publish -------->|                        |                    |
//!   |                    |-------- poll --------->|                    |
//!   |                    |                        |-- has_applied? --->|
//!   |                    |                        |-- find_by_email -->|
//!   |                    |                        |-- apply (tx) ----->|
//!   |                    |<------- ack -----------|                    |
//! ```

pub mod coordinator;
pub mod error;
pub mod publisher;
pub mod reconciler;
pub mod retry;
pub mod transport;

pub use coordinator::{Coordinator, SubscriberConfig};
pub use error::{PublishError, ReconcileError, Result, StreamError};
pub use publisher::{PublishReceipt, Publisher};
pub use reconciler::{Applied, Reconcile, ReconcileStats, Reconciler, StatsSnapshot};
pub use retry::{Backoff, RetryPolicy};
pub use transport::{
    memory::MemoryBroker, memory::MemoryConsumer, partition_for, Broker, Consumer, Record,
    RecordMeta,
};
