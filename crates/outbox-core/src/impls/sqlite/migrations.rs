//! Schema migrations, tracked in the `migrations` table.

use rusqlite::{Connection, TransactionBehavior, params};
use tracing::{debug, info};

use crate::domain::OutboxResult;

pub const CURRENT_VERSION: i32 = 3;

pub fn current_version(conn: &Connection) -> OutboxResult<i32> {
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM migrations", [], |row| {
        row.get(0)
    })?)
}

/// Apply every migration newer than the recorded version.
///
/// The version check and the migrations share one `BEGIN IMMEDIATE`
/// transaction, so processes opening a fresh file at the same time apply
/// each migration once.
pub fn run_migrations(conn: &mut Connection) -> OutboxResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let version = current_version(&tx)?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }
    info!(current_version = version, target_version = CURRENT_VERSION, "running migrations");

    if version < 1 {
        migrate_v1_outbox_events(&tx)?;
    }
    if version < 2 {
        migrate_v2_jobs(&tx)?;
    }
    if version < 3 {
        migrate_v3_notification_deliveries(&tx)?;
    }
    tx.commit()?;
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> OutboxResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        params![version, name],
    )?;
    debug!(version, name, "migration applied");
    Ok(())
}

/// V1: the outbox itself.
fn migrate_v1_outbox_events(conn: &Connection) -> OutboxResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            aggregate_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            processed_at INTEGER,
            processing_at INTEGER,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at INTEGER NOT NULL,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_events_unprocessed
            ON outbox_events(next_attempt_at, id)
            WHERE processed_at IS NULL;
        ",
    )?;
    record_migration(conn, 1, "outbox_events")
}

/// V2: downstream job queue, one job per (queue, identity).
fn migrate_v2_jobs(conn: &Connection) -> OutboxResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            queue TEXT NOT NULL,
            identity TEXT NOT NULL,
            id TEXT NOT NULL UNIQUE,
            job_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            PRIMARY KEY (queue, identity)
        );
        ",
    )?;
    record_migration(conn, 2, "jobs")
}

/// V3: which channels were notified for which event.
fn migrate_v3_notification_deliveries(conn: &Connection) -> OutboxResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS notification_deliveries (
            event_id INTEGER NOT NULL,
            channel TEXT NOT NULL,
            id TEXT NOT NULL UNIQUE,
            delivered_at INTEGER NOT NULL,
            PRIMARY KEY (event_id, channel)
        );
        ",
    )?;
    record_migration(conn, 3, "notification_deliveries")
}
