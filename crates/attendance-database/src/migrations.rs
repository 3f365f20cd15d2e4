//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table. Each
//! one runs inside its own transaction together with its bookkeeping row.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations. Safe to call on every startup.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version >= CURRENT_VERSION {
        debug!(current_version, "Schema up to date");
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_attendance_table(conn)?;
    }
    if current_version < 2 {
        migrate_v2_compound_natural_key(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: the original `attendance` layout.
///
/// `IF NOT EXISTS` adopts a database file written by an earlier relay, whose
/// table only carried a unique constraint on `timestamp`.
fn migrate_v1_attendance_table(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: attendance table");

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS attendance (
            id INTEGER PRIMARY KEY,
            device_user_id TEXT,
            timestamp DATETIME UNIQUE,
            api_status INTEGER DEFAULT 0
        );
        ",
    )?;
    record_migration(&tx, 1, "attendance_table")?;
    tx.commit()?;
    Ok(())
}

/// V2: uniqueness on `(device_user_id, timestamp)` instead of `timestamp`.
///
/// Two badges punching in the same second are distinct events. The table is
/// rebuilt with ids and delivery statuses preserved; rows missing either key
/// column cannot be delivered and are dropped.
///
/// Timestamps are rewritten to `YYYY-MM-DD HH:MM:SS` on the way over, since
/// older relays also stored `T`-separated and fractional forms. Rows that
/// collapse onto the same key keep the delivered one.
fn migrate_v2_compound_natural_key(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: compound natural key");

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE attendance_v2 (
            id INTEGER PRIMARY KEY,
            device_user_id TEXT NOT NULL,
            timestamp DATETIME NOT NULL,
            api_status INTEGER NOT NULL DEFAULT 0,
            UNIQUE (device_user_id, timestamp)
        );

        INSERT OR IGNORE INTO attendance_v2 (id, device_user_id, timestamp, api_status)
            SELECT id,
                   device_user_id,
                   COALESCE(strftime('%Y-%m-%d %H:%M:%S', timestamp), timestamp),
                   COALESCE(api_status, 0)
            FROM attendance
            WHERE device_user_id IS NOT NULL AND timestamp IS NOT NULL
            ORDER BY COALESCE(api_status, 0) DESC, id;

        DROP TABLE attendance;
        ALTER TABLE attendance_v2 RENAME TO attendance;

        CREATE INDEX IF NOT EXISTS idx_attendance_status_timestamp
            ON attendance(api_status, timestamp);
        ",
    )
    .map_err(|e| DatabaseError::Migration(format!("v2 rebuild failed: {e}")))?;
    record_migration(&tx, 2, "compound_natural_key")?;
    tx.commit()?;
    Ok(())
}
