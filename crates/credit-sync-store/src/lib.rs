//! # Credit Sync Store
//!
//! Storage abstraction for the credit ledger. Provides a trait-based interface
//! over the persisted user records and the idempotency record, with SQLite and
//! in-memory implementations.
//!
//! ## Key Types
//!
//! - [`LedgerStore`] - The async trait for all ledger operations
//! - [`SqliteLedger`] - SQLite-based persistent storage
//! - [`MemoryLedger`] - In-memory storage for tests and embedded use
//! - [`ApplyOutcome`] - Result of applying a credit event
//! - [`RetentionPolicy`] - Bounds on the idempotency record
//!
//! ## Usage
//!
//! ```rust,no_run
//! use credit_sync_core::{Email, UserAccount};
//! use credit_sync_store::{LedgerStore, SqliteLedger};
//!
//! async fn example() {
//!     let ledger = SqliteLedger::open("ledger.db").unwrap();
//!
//!     let email = Email::parse("a@x.com").unwrap();
//!     ledger
//!         .create_account(&UserAccount::new(email.clone(), 0))
//!         .await
//!         .unwrap();
//!
//!     let account = ledger.find_by_email(&email).await.unwrap();
//!     assert_eq!(account.map(|a| a.credits), Some(0));
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **No phantom accounts**: credit writes never create an account
//! - **Atomic apply**: the balance write and the idempotency record entry
//!   commit together or not at all
//! - **Externalized dedup**: the idempotency record lives next to the ledger,
//!   so it survives consumer restarts and rebalances

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;
pub use traits::{ApplyOutcome, LedgerStore, LedgerStoreExt, RetentionPolicy};
