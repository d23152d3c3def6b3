//! In-memory outbox store.
//!
//! Claim selection and marking happen under one `tokio::sync::Mutex`, which
//! gives the same guarantee as a row-locking claim in a database: two
//! concurrent claimers never receive the same event.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Claim, ClaimPolicy, EventId, EventStatus, NewOutboxEvent, OutboxEvent, OutboxResult,
    OutboxStats,
};
use crate::ports::{FailureUpdate, OutboxStore};

/// In-memory store state.
struct InMemoryStoreState {
    /// Rows keyed (and therefore ordered) by id.
    events: BTreeMap<EventId, OutboxEvent>,

    /// Next id to assign.
    next_id: i64,
}

impl InMemoryStoreState {
    fn new() -> Self {
        Self {
            events: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> EventId {
        let id = EventId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// The row still carries the claim that is trying to complete it.
    fn claimed_row(&mut self, claim: &Claim) -> Option<&mut OutboxEvent> {
        self.events
            .get_mut(&claim.event_id)
            .filter(|e| e.processed_at.is_none() && e.processing_at == Some(claim.claimed_at))
    }
}

#[derive(Clone)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::new())),
        }
    }

    /// Snapshot of every row in id order.
    pub async fn all(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.events.values().cloned().collect()
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, event: NewOutboxEvent, now: DateTime<Utc>) -> OutboxResult<OutboxEvent> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let row = OutboxEvent::inserted(id, event, now);
        state.events.insert(id, row.clone());
        Ok(row)
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> OutboxResult<Vec<OutboxEvent>> {
        let mut state = self.state.lock().await;
        let claimed = state
            .events
            .values_mut()
            .filter(|e| e.is_claimable(now, policy))
            .take(limit)
            .map(|e| {
                e.processing_at = Some(now);
                e.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        note: Option<String>,
    ) -> OutboxResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.claimed_row(claim) else {
            return Ok(false);
        };
        row.processed_at = Some(now);
        row.processing_at = None;
        row.attempts = row.attempts.saturating_add(1);
        if note.is_some() {
            row.error_message = note;
        }
        Ok(true)
    }

    async fn record_failure(&self, claim: &Claim, update: &FailureUpdate) -> OutboxResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.claimed_row(claim) else {
            return Ok(false);
        };
        row.processing_at = None;
        row.attempts = update.attempts;
        row.next_attempt_at = update.next_attempt_at;
        row.error_message = Some(update.error.clone());
        Ok(true)
    }

    async fn get(&self, id: EventId) -> OutboxResult<Option<OutboxEvent>> {
        Ok(self.state.lock().await.events.get(&id).cloned())
    }

    async fn dead_letters(&self, max_attempts: u32, limit: usize) -> OutboxResult<Vec<OutboxEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .values()
            .filter(|e| e.is_dead_lettered(max_attempts))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn replay(
        &self,
        id: EventId,
        now: DateTime<Utc>,
        policy: &ClaimPolicy,
    ) -> OutboxResult<bool> {
        let mut state = self.state.lock().await;
        match state.events.get_mut(&id) {
            Some(row) if !row.is_processed() && !row.has_live_claim(now, policy.claim_timeout) => {
                row.attempts = 0;
                row.processing_at = None;
                row.next_attempt_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stats(&self, now: DateTime<Utc>, policy: &ClaimPolicy) -> OutboxResult<OutboxStats> {
        let state = self.state.lock().await;
        let mut stats = OutboxStats::default();
        for event in state.events.values() {
            stats.record(EventStatus::of(event, now, policy));
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).unwrap()
    }

    fn policy() -> ClaimPolicy {
        ClaimPolicy {
            claim_timeout: TimeDelta::seconds(300),
            max_attempts: 5,
        }
    }

    fn new_event(i: usize) -> NewOutboxEvent {
        NewOutboxEvent::new("document", format!("d{i}"), "document.uploaded", serde_json::json!({"i": i}))
    }

    #[tokio::test]
    async fn ids_increase_monotonically() {
        let store = InMemoryOutboxStore::new();
        let a = store.insert(new_event(0), t0()).await.unwrap();
        let b = store.insert(new_event(1), t0()).await.unwrap();
        assert!(a.id < b.id);
        assert_eq!(a.next_attempt_at, a.created_at);
    }

    #[tokio::test]
    async fn concurrent_claimers_get_disjoint_batches() {
        let store = Arc::new(InMemoryOutboxStore::new());
        for i in 0..40 {
            store.insert(new_event(i), t0()).await.unwrap();
        }

        let mut joins = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            joins.push(tokio::spawn(async move {
                store.claim_batch(7, t0(), &policy()).await.unwrap()
            }));
        }
        let mut ids = Vec::new();
        for join in joins {
            ids.extend(join.await.unwrap().into_iter().map(|e| e.id));
        }
        ids.sort();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
        assert_eq!(ids.len(), 40);
    }

    #[tokio::test]
    async fn failure_releases_claim_and_reschedules() {
        let store = InMemoryOutboxStore::new();
        store.insert(new_event(0), t0()).await.unwrap();
        let row = store.claim_batch(1, t0(), &policy()).await.unwrap().remove(0);
        let claim = row.claim().unwrap();

        let update = FailureUpdate {
            attempts: 1,
            next_attempt_at: t0() + TimeDelta::seconds(5),
            error: "boom".into(),
        };
        assert!(store.record_failure(&claim, &update).await.unwrap());
        // second completion with the same claim is rejected
        assert!(!store.record_failure(&claim, &update).await.unwrap());

        let row = store.get(row.id).await.unwrap().unwrap();
        assert_eq!(row.processing_at, None);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.error_message.as_deref(), Some("boom"));
        assert!(store.claim_batch(1, t0(), &policy()).await.unwrap().is_empty());
        assert_eq!(
            store.claim_batch(1, t0() + TimeDelta::seconds(5), &policy()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn replay_revives_dead_letters_but_not_processed_rows() {
        let store = InMemoryOutboxStore::new();
        let dead = store.insert(new_event(0), t0()).await.unwrap();
        let done = store.insert(new_event(1), t0()).await.unwrap();

        let batch = store.claim_batch(2, t0(), &policy()).await.unwrap();
        let dead_claim = batch[0].claim().unwrap();
        let done_claim = batch[1].claim().unwrap();
        let exhausted = FailureUpdate {
            attempts: 5,
            next_attempt_at: t0(),
            error: "gave up".into(),
        };
        store.record_failure(&dead_claim, &exhausted).await.unwrap();
        store.mark_processed(&done_claim, t0(), None).await.unwrap();

        let stats = store.stats(t0(), &policy()).await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(store.dead_letters(5, 10).await.unwrap()[0].id, dead.id);

        assert!(!store.replay(done.id, t0(), &policy()).await.unwrap());
        assert!(!store.replay(EventId::new(999), t0(), &policy()).await.unwrap());
        assert!(store.replay(dead.id, t0() + TimeDelta::minutes(1), &policy()).await.unwrap());

        let row = store.get(dead.id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 0);
        assert_eq!(row.error_message.as_deref(), Some("gave up"));
        let reclaimed = store
            .claim_batch(10, t0() + TimeDelta::minutes(1), &policy())
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, dead.id);
    }

    #[tokio::test]
    async fn replay_leaves_a_live_claim_alone() {
        let store = InMemoryOutboxStore::new();
        let event = store.insert(new_event(0), t0()).await.unwrap();
        let first = store.claim_batch(1, t0(), &policy()).await.unwrap().remove(0);

        let soon = t0() + TimeDelta::seconds(1);
        assert!(!store.replay(event.id, soon, &policy()).await.unwrap());
        assert!(store.claim_batch(1, soon, &policy()).await.unwrap().is_empty());
        assert_eq!(store.get(event.id).await.unwrap().unwrap().processing_at, Some(t0()));

        // once the claim has expired the row can be replayed and reclaimed
        let later = t0() + TimeDelta::seconds(301);
        assert!(store.replay(event.id, later, &policy()).await.unwrap());
        let second = store.claim_batch(1, later, &policy()).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(!store
            .mark_processed(&first.claim().unwrap(), later, None)
            .await
            .unwrap());
    }
}
