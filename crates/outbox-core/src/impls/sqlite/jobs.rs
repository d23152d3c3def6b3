//! `jobs` table: the `JobQueue` port.
//!
//! `PRIMARY KEY (queue, identity)` with `INSERT OR IGNORE` makes a repeated
//! enqueue a no-op at the storage level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{SqliteBackend, from_millis, json_column, to_millis};
use crate::domain::{Enqueued, Job, JobId, JobIdentity, NewJob, OutboxResult};
use crate::ports::JobQueue;

fn read_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let payload: String = row.get(4)?;
    Ok(Job {
        id: JobId::parse(&id).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid job id {id:?}").into(),
            )
        })?,
        queue: row.get(1)?,
        identity: JobIdentity::from_raw(row.get::<_, String>(2)?),
        job_type: row.get(3)?,
        payload: json_column(4, &payload)?,
        enqueued_at: from_millis(5, row.get(5)?)?,
    })
}

#[async_trait]
impl JobQueue for SqliteBackend {
    async fn enqueue(&self, queue: &str, job: NewJob, now: DateTime<Utc>) -> OutboxResult<Enqueued> {
        let created = Job {
            id: self.ids.generate_job_id(),
            queue: queue.to_string(),
            identity: job.identity,
            job_type: job.job_type,
            payload: job.payload,
            enqueued_at: from_millis(0, to_millis(now))?,
        };
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO jobs (id, queue, identity, job_type, payload, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    created.id.as_ulid().to_string(),
                    created.queue,
                    created.identity.as_str(),
                    created.job_type,
                    serde_json::to_string(&created.payload)?,
                    to_millis(created.enqueued_at)
                ],
            )?;
            Ok(if inserted == 1 {
                Enqueued::Created(created)
            } else {
                Enqueued::Duplicate
            })
        })
        .await
    }

    async fn get(&self, queue: &str, identity: &JobIdentity) -> OutboxResult<Option<Job>> {
        let queue = queue.to_string();
        let identity = identity.clone();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, queue, identity, job_type, payload, enqueued_at
                       FROM jobs WHERE queue = ?1 AND identity = ?2",
                    params![queue, identity.as_str()],
                    read_job,
                )
                .optional()?)
        })
        .await
    }

    async fn list(&self, queue: &str) -> OutboxResult<Vec<Job>> {
        let queue = queue.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, queue, identity, job_type, payload, enqueued_at
                   FROM jobs WHERE queue = ?1 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![queue], read_job)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn len(&self, queue: &str) -> OutboxResult<usize> {
        let queue = queue.to_string();
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE queue = ?1",
                params![queue],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }
}
