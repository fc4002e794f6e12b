//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each one transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, credit_sync_core::now_millis()],
            )?;
            tracing::debug!(version, "applied ledger schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: accounts and the idempotency record.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE accounts (
            email TEXT PRIMARY KEY,               -- normalized, lower-case
            credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
            last_login INTEGER NOT NULL,          -- Unix ms
            number_of_charts INTEGER NOT NULL DEFAULT 0 CHECK (number_of_charts >= 0),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Idempotency record: events already applied to the ledger
        CREATE TABLE applied_events (
            event_id BLOB PRIMARY KEY,            -- 32 bytes
            applied_at INTEGER NOT NULL           -- Unix ms
        );

        CREATE INDEX idx_applied_events_applied_at ON applied_events(applied_at);
        "#,
    )?;

    Ok(())
}
