//! OutboxStore port - outbox テーブルの正本（source of truth）
//!
//! The store is the single authority on delivery state. The job queue and
//! notification channels are separate resources with no shared transaction.
//!
//! # 実装
//! - `InMemoryOutboxStore`: tests and the demo
//! - `SqliteBackend`: durable, shared by several processes

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Claim, ClaimPolicy, EventId, NewOutboxEvent, OutboxEvent, OutboxResult, OutboxStats,
};

/// Row update applied when a handler attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureUpdate {
    /// New value of `attempts` (previous + 1).
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub error: String,
}

/// OutboxStore は outbox 行の状態遷移をすべて担う
///
/// # 設計原則
/// - `claim_batch` is one atomic operation: select eligible rows, skip rows
///   another claimer holds, set `processing_at = now`, commit. No handler runs
///   inside it.
/// - Completion (`mark_processed` / `record_failure`) is fenced by the claim:
///   it returns `false` and changes nothing when the row no longer carries the
///   same `processing_at` (another worker reclaimed it after a timeout).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Producer write outside of a business transaction.
    async fn insert(&self, event: NewOutboxEvent, now: DateTime<Utc>) -> OutboxResult<OutboxEvent>;

    /// Atomically reserve up to `limit` eligible events, oldest id first.
    /// Returned events carry the new `processing_at`.
    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> OutboxResult<Vec<OutboxEvent>>;

    /// Terminal success: `processed_at = now`, claim released, `attempts += 1`.
    /// `note` replaces `error_message` when given (unknown event types).
    async fn mark_processed(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        note: Option<String>,
    ) -> OutboxResult<bool>;

    /// Release the claim and reschedule (or leave dead-lettered when
    /// `attempts` reached the maximum).
    async fn record_failure(&self, claim: &Claim, update: &FailureUpdate) -> OutboxResult<bool>;

    async fn get(&self, id: EventId) -> OutboxResult<Option<OutboxEvent>>;

    /// Dead-lettered events, oldest first.
    async fn dead_letters(&self, max_attempts: u32, limit: usize) -> OutboxResult<Vec<OutboxEvent>>;

    /// Manual intervention: make an unprocessed event eligible again with a
    /// fresh attempt budget. Processed events and events whose claim is
    /// still live under `policy` are left alone (`false`).
    async fn replay(
        &self,
        id: EventId,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> OutboxResult<bool>;

    async fn stats(&self, now: DateTime<Utc>, policy: &ClaimPolicy) -> OutboxResult<OutboxStats>;
}
