//! JobEnqueuer - outbox event から下流ジョブを冪等に作る

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{Enqueued, JobIdentity, NewJob, OutboxError, OutboxEvent, OutboxResult};
use crate::ports::{Clock, JobQueue};

/// Publishes downstream jobs whose identity is always derived from the
/// outbox event id, so a redelivered event cannot create a second job.
#[derive(Clone)]
pub struct JobEnqueuer {
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl JobEnqueuer {
    pub fn new(queue: Arc<dyn JobQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { queue, clock }
    }

    pub async fn enqueue_for_event<P: Serialize>(
        &self,
        event: &OutboxEvent,
        queue: &str,
        job_type: &str,
        payload: &P,
    ) -> OutboxResult<Enqueued> {
        if queue.is_empty() {
            return Err(OutboxError::Queue(format!(
                "empty queue name for event {}",
                event.id
            )));
        }
        let identity = JobIdentity::for_event(event.id);
        let job = NewJob {
            job_type: job_type.to_string(),
            payload: serde_json::to_value(payload)?,
            identity: identity.clone(),
        };

        let result = self.queue.enqueue(queue, job, self.clock.now()).await?;
        match &result {
            Enqueued::Created(job) => info!(
                event_id = %event.id,
                queue,
                job_type,
                job_id = %job.id,
                identity = %identity,
                "enqueued job"
            ),
            Enqueued::Duplicate => debug!(
                event_id = %event.id,
                queue,
                identity = %identity,
                "job already enqueued, skipping"
            ),
        }
        Ok(result)
    }
}
