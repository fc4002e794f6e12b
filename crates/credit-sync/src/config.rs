//! Service configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use credit_sync_store::{LedgerStore, MemoryLedger, RetentionPolicy, SqliteLedger};
use credit_sync_stream::SubscriberConfig;

/// Topic user creation is announced on.
pub const USER_TOPIC: &str = "user-data";

/// Topic credit balances arrive on.
pub const CREDIT_TOPIC: &str = "credit-data";

/// Consumer group of the user service.
pub const GROUP_ID: &str = "user-info-manager";

/// Configuration for the user service.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub user_topic: String,
    pub credit_topic: String,
    /// Stable across restarts so a new consumer resumes from the last commit.
    pub group_id: String,
    /// SQLite file for the ledger. In-memory when absent.
    pub store_path: Option<PathBuf>,
    pub subscriber: SubscriberConfig,
    pub retention: RetentionPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            user_topic: USER_TOPIC.to_string(),
            credit_topic: CREDIT_TOPIC.to_string(),
            group_id: GROUP_ID.to_string(),
            store_path: None,
            subscriber: SubscriberConfig::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid service configuration")
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_subscriber(mut self, subscriber: SubscriberConfig) -> Self {
        self.subscriber = subscriber;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Open the configured ledger backend.
    pub fn open_ledger(&self) -> credit_sync_store::Result<Arc<dyn LedgerStore>> {
        match &self.store_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "opening sqlite ledger");
                Ok(Arc::new(SqliteLedger::open(path)?))
            }
            None => {
                tracing::info!("using in-memory ledger");
                Ok(Arc::new(MemoryLedger::new()))
            }
        }
    }
}
