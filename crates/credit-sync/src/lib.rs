//! # Credit Sync
//!
//! The user-management side of a multi-service charting application, with
//! event-driven synchronization of credit balances.
//!
//! ## Overview
//!
//! - **Users**: accounts are created and looked up by email
//! - **Publishing**: user creation announces the new account on `user-data`
//! - **Reconciling**: balances announced on `credit-data` are applied to the
//!   ledger idempotently, at least once, in per-account order
//!
//! The two services share no database. Each owns its records and the topics
//! carry state between them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use credit_sync::{init_tracing, SaveUserRequest, ServiceConfig, UserService};
//! use credit_sync::stream::MemoryBroker;
//!
//! async fn example() -> anyhow::Result<()> {
//!     init_tracing();
//!
//!     let config = ServiceConfig::default();
//!     let service = UserService::open(config, Arc::new(MemoryBroker::new()))?;
//!     service.start_sync().await?;
//!
//!     let response = service
//!         .save_user(SaveUserRequest::new("a@x.com", 1_700_000_000_000))
//!         .await?;
//!     assert!(!response.sync_pending);
//!
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `credit_sync::core` - Accounts, events, envelope codec
//! - `credit_sync::store` - Ledger store abstraction and SQLite
//! - `credit_sync::stream` - Broker, publisher, reconciler, coordinator

pub mod config;
pub mod error;
pub mod logging;
pub mod service;

// Re-export component crates
pub use credit_sync_core as core;
pub use credit_sync_store as store;
pub use credit_sync_stream as stream;

// Re-export main types for convenience
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use logging::init_tracing;
pub use service::{
    CreateUserResponse, LastLoginRequest, SaveUserRequest, UserService, UserView,
};

// Re-export commonly used core types
pub use credit_sync_core::{CreditEvent, Email, EventId, UserAccount};
