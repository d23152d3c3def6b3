//! SQLite backend - 永続化された outbox / jobs / 通知履歴
//!
//! One `rusqlite::Connection` behind a `std::sync::Mutex`; every call runs on
//! `tokio::task::spawn_blocking` so the async runtime never blocks on disk.
//! Several processes may open the same file: WAL plus `busy_timeout` make
//! them queue on the short claim transaction instead of failing.
//!
//! Timestamps are stored as Unix milliseconds (`INTEGER`).

pub mod jobs;
pub mod migrations;
pub mod notifications;
pub mod outbox;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tracing::info;

use crate::domain::OutboxResult;
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};

pub use self::outbox::append_event;

#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    ids: Arc<dyn IdGenerator>,
}

impl SqliteBackend {
    /// Open (or create) a database file and run pending migrations.
    pub fn open(path: &Path) -> OutboxResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::domain::OutboxError::Store(format!("create {}: {e}", parent.display())))?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        migrations::run_migrations(&mut conn)?;
        info!(path = %path.display(), "opened sqlite outbox");
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database, for tests and the demo.
    pub fn open_in_memory() -> OutboxResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    /// Run `f` with exclusive access to the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> OutboxResult<T>
    where
        F: FnOnce(&mut Connection) -> OutboxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut conn)
        })
        .await?
    }

    /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// This is where producers write their business rows together with
    /// `append_event`.
    pub async fn transaction<F, T>(&self, f: F) -> OutboxResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> OutboxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn json_column(idx: usize, raw: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
