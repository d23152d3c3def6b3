//! JobQueue port - 下流ジョブキュー
//!
//! Handlers publish work here. Jobs are keyed by a deterministic identity
//! derived from the outbox event id, and the queue refuses to create a second
//! job with an identity it already holds.
//!
//! # 実装
//! - `InMemoryJobQueue`: namespace (queue name) ごとの HashMap
//! - `SqliteBackend`: `jobs` table, `PRIMARY KEY (queue, identity)`

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Enqueued, Job, JobIdentity, NewJob, OutboxResult};

/// JobQueue は idempotent な enqueue を提供
///
/// # 設計原則
/// - Enqueue with an existing `(queue, identity)` returns `Enqueued::Duplicate`;
///   it is neither an error nor a second job.
/// - The queue shares no transaction with the outbox store.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, job: NewJob, now: DateTime<Utc>) -> OutboxResult<Enqueued>;

    async fn get(&self, queue: &str, identity: &JobIdentity) -> OutboxResult<Option<Job>>;

    /// Jobs of one queue in enqueue order.
    async fn list(&self, queue: &str) -> OutboxResult<Vec<Job>>;

    async fn len(&self, queue: &str) -> OutboxResult<usize>;
}
