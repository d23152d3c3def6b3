//! InMemoryJobQueue - 開発用の下流ジョブキュー
//!
//! # 実装詳細
//! - queue 名（namespace）ごとに Job を enqueue 順で保持
//! - identity の集合で重複 enqueue を弾く
//! - ロックは同期区間だけで保持し、await を跨がない

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Enqueued, Job, JobIdentity, NewJob, OutboxResult};
use crate::ports::{IdGenerator, JobQueue, SystemClock, UlidGenerator};

#[derive(Default)]
struct Namespace {
    jobs: Vec<Job>,
    identities: HashSet<JobIdentity>,
}

pub struct InMemoryJobQueue {
    /// namespace ごとのキュー
    queues: Arc<Mutex<HashMap<String, Namespace>>>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            ids,
        }
    }

    /// Names of queues that hold at least one job.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Namespace>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue: &str, job: NewJob, now: DateTime<Utc>) -> OutboxResult<Enqueued> {
        let mut queues = self.lock();
        let ns = queues.entry(queue.to_string()).or_default();
        if ns.identities.contains(&job.identity) {
            return Ok(Enqueued::Duplicate);
        }

        let created = Job {
            id: self.ids.generate_job_id(),
            queue: queue.to_string(),
            identity: job.identity,
            job_type: job.job_type,
            payload: job.payload,
            enqueued_at: now,
        };
        ns.identities.insert(created.identity.clone());
        ns.jobs.push(created.clone());
        Ok(Enqueued::Created(created))
    }

    async fn get(&self, queue: &str, identity: &JobIdentity) -> OutboxResult<Option<Job>> {
        Ok(self
            .lock()
            .get(queue)
            .and_then(|ns| ns.jobs.iter().find(|j| &j.identity == identity))
            .cloned())
    }

    async fn list(&self, queue: &str) -> OutboxResult<Vec<Job>> {
        Ok(self
            .lock()
            .get(queue)
            .map(|ns| ns.jobs.clone())
            .unwrap_or_default())
    }

    async fn len(&self, queue: &str) -> OutboxResult<usize> {
        Ok(self.lock().get(queue).map_or(0, |ns| ns.jobs.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventId;

    fn job(event: i64) -> NewJob {
        NewJob {
            job_type: "extract_document".into(),
            payload: serde_json::json!({"event": event}),
            identity: JobIdentity::for_event(EventId::new(event)),
        }
    }

    #[tokio::test]
    async fn duplicate_identity_is_a_noop() {
        let queue = InMemoryJobQueue::new();
        let now = Utc::now();

        let created = queue.enqueue("extraction", job(1), now).await.unwrap();
        assert!(!created.is_duplicate());
        assert!(queue.enqueue("extraction", job(1), now).await.unwrap().is_duplicate());
        assert!(!queue.enqueue("extraction", job(2), now).await.unwrap().is_duplicate());

        assert_eq!(queue.len("extraction").await.unwrap(), 2);
        assert_eq!(queue.len("missing").await.unwrap(), 0);
        let found = queue
            .get("extraction", &JobIdentity::for_event(EventId::new(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.payload["event"], 2);
        assert_eq!(queue.queue_names(), vec!["extraction".to_string()]);
    }
}
