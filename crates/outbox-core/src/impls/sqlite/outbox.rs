//! `outbox_events` table: producer append and the `OutboxStore` port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use super::{SqliteBackend, from_millis, json_column, to_millis};
use crate::domain::{
    Claim, ClaimPolicy, EventId, EventStatus, NewOutboxEvent, OutboxEvent, OutboxResult,
    OutboxStats,
};
use crate::ports::{FailureUpdate, OutboxStore};

const COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, created_at, \
                       processed_at, processing_at, attempts, next_attempt_at, error_message";

/// Insert an event through the caller's connection or transaction.
///
/// Called inside the same `rusqlite::Transaction` as the business write, the
/// event exists exactly when the business change committed.
pub fn append_event(
    conn: &Connection,
    event: &NewOutboxEvent,
    now: DateTime<Utc>,
) -> OutboxResult<OutboxEvent> {
    let now_ms = to_millis(now);
    let payload = serde_json::to_string(&event.payload)?;
    let row = conn.query_row(
        &format!(
            "INSERT INTO outbox_events
                 (aggregate_type, aggregate_id, event_type, payload, created_at, attempts, next_attempt_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?5)
             RETURNING {COLUMNS}"
        ),
        params![
            event.aggregate_type,
            event.aggregate_id,
            event.event_type,
            payload,
            now_ms
        ],
        read_event,
    )?;
    Ok(row)
}

fn read_event(row: &Row<'_>) -> rusqlite::Result<OutboxEvent> {
    let payload: String = row.get(4)?;
    let processed_at: Option<i64> = row.get(6)?;
    let processing_at: Option<i64> = row.get(7)?;
    Ok(OutboxEvent {
        id: EventId::new(row.get(0)?),
        aggregate_type: row.get(1)?,
        aggregate_id: row.get(2)?,
        event_type: row.get(3)?,
        payload: json_column(4, &payload)?,
        created_at: from_millis(5, row.get(5)?)?,
        processed_at: processed_at.map(|ms| from_millis(6, ms)).transpose()?,
        processing_at: processing_at.map(|ms| from_millis(7, ms)).transpose()?,
        attempts: row.get(8)?,
        next_attempt_at: from_millis(9, row.get(9)?)?,
        error_message: row.get(10)?,
    })
}

/// The claim: one `BEGIN IMMEDIATE` transaction holding a single
/// `UPDATE ... WHERE id IN (SELECT ...)`. The subselect re-evaluates the
/// eligibility predicate under the write lock, so a row reserved by another
/// connection is skipped rather than claimed twice.
fn claim_batch(
    conn: &mut Connection,
    limit: usize,
    now: DateTime<Utc>,
    policy: &ClaimPolicy,
) -> OutboxResult<Vec<OutboxEvent>> {
    let now_ms = to_millis(now);
    let stale_before = now_ms.saturating_sub(policy.claim_timeout.num_milliseconds());
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut claimed = {
        let mut stmt = tx.prepare(&format!(
            "UPDATE outbox_events
                SET processing_at = ?1
              WHERE id IN (
                    SELECT id FROM outbox_events
                     WHERE processed_at IS NULL
                       AND (processing_at IS NULL OR processing_at < ?2)
                       AND next_attempt_at <= ?1
                       AND attempts < ?3
                     ORDER BY id
                     LIMIT ?4)
             RETURNING {COLUMNS}"
        ))?;
        let rows = stmt.query_map(params![now_ms, stale_before, policy.max_attempts, limit], read_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    tx.commit()?;

    // RETURNING does not promise an order
    claimed.sort_by_key(|e| e.id);
    Ok(claimed)
}

#[async_trait]
impl OutboxStore for SqliteBackend {
    async fn insert(&self, event: NewOutboxEvent, now: DateTime<Utc>) -> OutboxResult<OutboxEvent> {
        self.call(move |conn| append_event(conn, &event, now)).await
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> OutboxResult<Vec<OutboxEvent>> {
        let policy = *policy;
        self.call(move |conn| claim_batch(conn, limit, now, &policy)).await
    }

    async fn mark_processed(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        note: Option<String>,
    ) -> OutboxResult<bool> {
        let claim = *claim;
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE outbox_events
                    SET processed_at = ?1,
                        processing_at = NULL,
                        attempts = attempts + 1,
                        error_message = COALESCE(?2, error_message)
                  WHERE id = ?3 AND processing_at = ?4 AND processed_at IS NULL",
                params![
                    to_millis(now),
                    note,
                    claim.event_id.get(),
                    to_millis(claim.claimed_at)
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn record_failure(&self, claim: &Claim, update: &FailureUpdate) -> OutboxResult<bool> {
        let claim = *claim;
        let update = update.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE outbox_events
                    SET processing_at = NULL,
                        attempts = ?1,
                        next_attempt_at = ?2,
                        error_message = ?3
                  WHERE id = ?4 AND processing_at = ?5 AND processed_at IS NULL",
                params![
                    update.attempts,
                    to_millis(update.next_attempt_at),
                    update.error,
                    claim.event_id.get(),
                    to_millis(claim.claimed_at)
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn get(&self, id: EventId) -> OutboxResult<Option<OutboxEvent>> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM outbox_events WHERE id = ?1"),
                    params![id.get()],
                    read_event,
                )
                .optional()?)
        })
        .await
    }

    async fn dead_letters(&self, max_attempts: u32, limit: usize) -> OutboxResult<Vec<OutboxEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM outbox_events
                  WHERE processed_at IS NULL AND attempts >= ?1
                  ORDER BY id
                  LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![max_attempts, limit], read_event)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn replay(
        &self,
        id: EventId,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> OutboxResult<bool> {
        let now_ms = to_millis(now);
        let stale_before = now_ms.saturating_sub(policy.claim_timeout.num_milliseconds());
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE outbox_events
                    SET attempts = 0, processing_at = NULL, next_attempt_at = ?1
                  WHERE id = ?2
                    AND processed_at IS NULL
                    AND (processing_at IS NULL OR processing_at < ?3)",
                params![now_ms, id.get(), stale_before],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn stats(&self, now: DateTime<Utc>, policy: &ClaimPolicy) -> OutboxResult<OutboxStats> {
        let policy = *policy;
        self.call(move |conn| {
            let processed: i64 = conn.query_row(
                "SELECT COUNT(*) FROM outbox_events WHERE processed_at IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
            let mut stats = OutboxStats {
                processed: usize::try_from(processed).unwrap_or(0),
                ..OutboxStats::default()
            };

            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM outbox_events WHERE processed_at IS NULL"
            ))?;
            for event in stmt.query_map([], read_event)? {
                stats.record(EventStatus::of(&event?, now, &policy));
            }
            Ok(stats)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutboxError;
    use chrono::{TimeDelta, TimeZone};
    use std::collections::HashSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn policy() -> ClaimPolicy {
        ClaimPolicy {
            claim_timeout: TimeDelta::seconds(300),
            max_attempts: 5,
        }
    }

    fn upload(i: usize) -> NewOutboxEvent {
        NewOutboxEvent::new(
            "document",
            format!("doc-{i}"),
            "document.uploaded",
            serde_json::json!({"documentId": format!("doc-{i}"), "storagePath": "p", "mimeType": "text/plain"}),
        )
    }

    #[tokio::test]
    async fn insert_then_get_round_trips_the_row() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let inserted = db.insert(upload(1), t0()).await.unwrap();
        let fetched = db.get(inserted.id).await.unwrap().unwrap();
        assert_eq!(inserted, fetched);
        assert_eq!(fetched.attempts, 0);
        assert_eq!(fetched.next_attempt_at, t0());
        assert!(db.get(EventId::new(404)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn business_rollback_drops_the_event_too() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.call(|conn| {
            conn.execute("CREATE TABLE documents (id TEXT PRIMARY KEY)", [])?;
            Ok(())
        })
        .await
        .unwrap();

        db.transaction(|tx| {
            tx.execute("INSERT INTO documents (id) VALUES ('doc-1')", [])?;
            append_event(tx, &upload(1), t0())?;
            Ok(())
        })
        .await
        .unwrap();

        let err = db
            .transaction(|tx| {
                tx.execute("INSERT INTO documents (id) VALUES ('doc-2')", [])?;
                append_event(tx, &upload(2), t0())?;
                Err::<(), _>(OutboxError::Store("validation failed".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::Store(_)));

        let (documents, events): (i64, i64) = db
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM documents), (SELECT COUNT(*) FROM outbox_events)",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })
            .await
            .unwrap();
        assert_eq!((documents, events), (1, 1));
    }

    #[tokio::test]
    async fn claim_is_fenced_and_ordered() {
        let db = SqliteBackend::open_in_memory().unwrap();
        for i in 0..3 {
            db.insert(upload(i), t0()).await.unwrap();
        }

        let batch = db.claim_batch(2, t0(), &policy()).await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id.get()).collect::<Vec<_>>(), vec![1, 2]);
        let claim = batch[0].claim().unwrap();

        assert!(db.mark_processed(&claim, t0(), None).await.unwrap());
        assert!(!db.mark_processed(&claim, t0(), None).await.unwrap());

        let row = db.get(claim.event_id).await.unwrap().unwrap();
        assert!(row.is_processed());
        assert_eq!(row.attempts, 1);

        // event 2 keeps its live claim, only event 3 is left
        let rest = db.claim_batch(10, t0(), &policy()).await.unwrap();
        assert_eq!(rest.iter().map(|e| e.id.get()).collect::<Vec<_>>(), vec![3]);

        // after the timeout event 2 is reclaimed, and its old claim is lost
        let later = t0() + TimeDelta::seconds(301);
        let reclaimed = db.claim_batch(10, later, &policy()).await.unwrap();
        assert_eq!(reclaimed.iter().map(|e| e.id.get()).collect::<Vec<_>>(), vec![2, 3]);
        let stale = batch[1].claim().unwrap();
        let update = FailureUpdate {
            attempts: 1,
            next_attempt_at: later,
            error: "late".into(),
        };
        assert!(!db.record_failure(&stale, &update).await.unwrap());
    }

    #[tokio::test]
    async fn dead_letters_and_replay() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let event = db.insert(upload(1), t0()).await.unwrap();
        let claim = db.claim_batch(1, t0(), &policy()).await.unwrap()[0].claim().unwrap();
        let exhausted = FailureUpdate {
            attempts: 5,
            next_attempt_at: t0(),
            error: "extractor crashed".into(),
        };
        assert!(db.record_failure(&claim, &exhausted).await.unwrap());

        assert!(db.claim_batch(10, t0() + TimeDelta::days(1), &policy()).await.unwrap().is_empty());
        let dead = db.dead_letters(5, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].error_message.as_deref(), Some("extractor crashed"));
        assert_eq!(db.stats(t0(), &policy()).await.unwrap().dead_lettered, 1);

        assert!(db.replay(event.id, t0(), &policy()).await.unwrap());
        let row = db.get(event.id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 0);
        assert_eq!(row.error_message.as_deref(), Some("extractor crashed"));
        assert_eq!(db.stats(t0(), &policy()).await.unwrap().pending, 1);

        let claim = db.claim_batch(1, t0(), &policy()).await.unwrap()[0].claim().unwrap();
        assert!(db.mark_processed(&claim, t0(), Some("note".into())).await.unwrap());
        assert!(!db.replay(event.id, t0(), &policy()).await.unwrap());
        let row = db.get(event.id).await.unwrap().unwrap();
        assert_eq!(row.error_message.as_deref(), Some("note"));
    }

    #[tokio::test]
    async fn replay_leaves_a_live_claim_alone() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let event = db.insert(upload(1), t0()).await.unwrap();
        let first = db.claim_batch(1, t0(), &policy()).await.unwrap()[0].claim().unwrap();

        let soon = t0() + TimeDelta::seconds(1);
        assert!(!db.replay(event.id, soon, &policy()).await.unwrap());
        assert!(db.claim_batch(1, soon, &policy()).await.unwrap().is_empty());
        assert_eq!(db.get(event.id).await.unwrap().unwrap().processing_at, Some(t0()));

        let later = t0() + TimeDelta::seconds(301);
        assert!(db.replay(event.id, later, &policy()).await.unwrap());
        assert_eq!(db.claim_batch(1, later, &policy()).await.unwrap().len(), 1);
        assert!(!db.mark_processed(&first, later, None).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_connections_never_claim_the_same_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.db");
        let a = SqliteBackend::open(&path).unwrap();
        let b = SqliteBackend::open(&path).unwrap();
        for i in 0..50 {
            a.insert(upload(i), t0()).await.unwrap();
        }

        let mut joins = Vec::new();
        for db in [a.clone(), b.clone(), a.clone(), b.clone()] {
            joins.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let batch = db.claim_batch(4, t0(), &policy()).await.unwrap();
                    if batch.is_empty() {
                        break mine;
                    }
                    mine.extend(batch.into_iter().map(|e| e.id));
                }
            }));
        }

        let mut all = Vec::new();
        for join in joins {
            all.extend(join.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }
}
