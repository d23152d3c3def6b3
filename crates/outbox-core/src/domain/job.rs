//! Downstream jobs produced by handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, JobIdentity};

/// What a handler asks the queue to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub identity: JobIdentity,
}

/// A job as stored by a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub identity: JobIdentity,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

/// Result of an idempotent enqueue.
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    Created(Job),
    /// The identity already existed in the queue; nothing was written.
    Duplicate,
}

impl Enqueued {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Enqueued::Duplicate)
    }
}
