//! SQLite implementation of the LedgerStore trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite, wrapped in
//! async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use credit_sync_core::{now_millis, Email, EventId, UserAccount};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{ApplyOutcome, LedgerStore, RetentionPolicy};

/// SQLite-based ledger.
///
/// Thread-safe via an internal Mutex. Every operation runs on the blocking
/// pool so the async runtime is never stalled by disk I/O.
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

fn to_sql_int(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidData(format!("{} out of range", what)))
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, i64, i64)> {
    Ok((
        row.get("email")?,
        row.get("credits")?,
        row.get("last_login")?,
        row.get("number_of_charts")?,
    ))
}

fn account_from_parts(parts: (String, i64, i64, i64)) -> Result<UserAccount> {
    let (email, credits, last_login, number_of_charts) = parts;
    Ok(UserAccount {
        email: Email::parse(&email).map_err(|e| StoreError::InvalidData(e.to_string()))?,
        credits: u64::try_from(credits)
            .map_err(|_| StoreError::InvalidData(format!("negative credits for {}", email)))?,
        last_login,
        number_of_charts: u64::try_from(number_of_charts)
            .map_err(|_| StoreError::InvalidData(format!("negative chart count for {}", email)))?,
    })
}

/// Map "no row updated" to NotFound.
fn expect_updated(changed: usize, email: &Email) -> Result<()> {
    if changed == 0 {
        return Err(StoreError::NotFound(email.to_string()));
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn find_by_email(&self, email: &Email) -> Result<Option<UserAccount>> {
        let email = email.clone();

        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT email, credits, last_login, number_of_charts
                     FROM accounts WHERE email = ?1",
                    params![email.as_str()],
                    row_to_account,
                )
                .optional()?;

            row.map(account_from_parts).transpose()
        })
        .await
    }

    async fn create_account(&self, account: &UserAccount) -> Result<()> {
        let account = account.clone();

        self.blocking(move |conn| {
            let now = now_millis();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO accounts (
                    email, credits, last_login, number_of_charts, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    account.email.as_str(),
                    to_sql_int(account.credits, "credits")?,
                    account.last_login,
                    to_sql_int(account.number_of_charts, "number_of_charts")?,
                    now,
                ],
            )?;

            if inserted == 0 {
                return Err(StoreError::AlreadyExists(account.email.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn upsert_credits(&self, email: &Email, credits: u64) -> Result<()> {
        let email = email.clone();
        let credits = to_sql_int(credits, "credits")?;

        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE accounts SET credits = ?2, updated_at = ?3 WHERE email = ?1",
                params![email.as_str(), credits, now_millis()],
            )?;
            expect_updated(changed, &email)
        })
        .await
    }

    async fn update_last_login(&self, email: &Email, at: i64) -> Result<bool> {
        let email = email.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let current: Option<i64> = tx
                .query_row(
                    "SELECT last_login FROM accounts WHERE email = ?1",
                    params![email.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(current) = current else {
                return Err(StoreError::NotFound(email.to_string()));
            };
            if at < current {
                return Ok(false);
            }

            tx.execute(
                "UPDATE accounts SET last_login = ?2, updated_at = ?3 WHERE email = ?1",
                params![email.as_str(), at, now_millis()],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn set_number_of_charts(&self, email: &Email, count: u64) -> Result<()> {
        let email = email.clone();
        let count = to_sql_int(count, "number_of_charts")?;

        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE accounts SET number_of_charts = ?2, updated_at = ?3 WHERE email = ?1",
                params![email.as_str(), count, now_millis()],
            )?;
            expect_updated(changed, &email)
        })
        .await
    }

    async fn has_applied(&self, event_id: &EventId) -> Result<bool> {
        let event_id = *event_id;

        self.blocking(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM applied_events WHERE event_id = ?1)",
                params![event_id.0.as_slice()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn apply_credit_event(
        &self,
        email: &Email,
        credits: u64,
        event_id: &EventId,
        applied_at: i64,
    ) -> Result<ApplyOutcome> {
        let email = email.clone();
        let event_id = *event_id;
        let credits = to_sql_int(credits, "credits")?;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let seen: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM applied_events WHERE event_id = ?1)",
                params![event_id.0.as_slice()],
                |row| row.get(0),
            )?;
            if seen {
                return Ok(ApplyOutcome::AlreadyApplied);
            }

            let changed = tx.execute(
                "UPDATE accounts SET credits = ?2, updated_at = ?3 WHERE email = ?1",
                params![email.as_str(), credits, applied_at],
            )?;
            if changed == 0 {
                // Dropping the transaction rolls back.
                return Ok(ApplyOutcome::AccountNotFound);
            }

            tx.execute(
                "INSERT INTO applied_events (event_id, applied_at) VALUES (?1, ?2)",
                params![event_id.0.as_slice(), applied_at],
            )?;

            tx.commit()?;
            Ok(ApplyOutcome::Applied)
        })
        .await
    }

    async fn prune_applied(&self, policy: &RetentionPolicy, now: i64) -> Result<usize> {
        let cutoff = policy.cutoff(now);
        let max_entries = policy
            .max_entries
            .map(|m| to_sql_int(m as u64, "max_entries"))
            .transpose()?;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;

            if let Some(cutoff) = cutoff {
                removed += tx.execute(
                    "DELETE FROM applied_events WHERE applied_at < ?1",
                    params![cutoff],
                )?;
            }

            if let Some(max) = max_entries {
                removed += tx.execute(
                    "DELETE FROM applied_events WHERE event_id NOT IN (
                        SELECT event_id FROM applied_events
                        ORDER BY applied_at DESC, rowid DESC
                        LIMIT ?1
                    )",
                    params![max],
                )?;
            }

            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn applied_count(&self) -> Result<usize> {
        self.blocking(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM applied_events", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}
