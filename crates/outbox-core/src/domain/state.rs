//! Derived event status.
//!
//! The outbox row stores timestamps and counters, not a state column. The
//! status is computed from them so stores never have to keep two sources of
//! truth in sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{ClaimPolicy, OutboxEvent};

/// Status transitions:
/// - Pending -> Claimed -> Processed
/// - Pending -> Claimed -> RetryScheduled -> Claimed (loop until max_attempts)
/// - Pending -> Claimed -> DeadLettered (attempts == max_attempts)
/// - Claimed (abandoned, claim expired) -> Pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// Eligible now (never claimed, or an abandoned claim expired).
    Pending,

    /// Held by a live claim.
    Claimed,

    /// Failed earlier, waiting for `next_attempt_at`.
    RetryScheduled,

    /// Terminal success.
    Processed,

    /// Terminal failure awaiting manual replay.
    DeadLettered,
}

impl EventStatus {
    pub fn of(event: &OutboxEvent, now: DateTime<Utc>, policy: &ClaimPolicy) -> Self {
        if event.is_processed() {
            EventStatus::Processed
        } else if event.is_dead_lettered(policy.max_attempts) {
            EventStatus::DeadLettered
        } else if event.has_live_claim(now, policy.claim_timeout) {
            EventStatus::Claimed
        } else if event.next_attempt_at > now {
            EventStatus::RetryScheduled
        } else {
            EventStatus::Pending
        }
    }

    /// Is this a terminal state (no automatic transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Processed | EventStatus::DeadLettered)
    }
}

/// Counts by status, for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: usize,
    pub claimed: usize,
    pub retry_scheduled: usize,
    pub processed: usize,
    pub dead_lettered: usize,
}

impl OutboxStats {
    pub fn record(&mut self, status: EventStatus) {
        match status {
            EventStatus::Pending => self.pending += 1,
            EventStatus::Claimed => self.claimed += 1,
            EventStatus::RetryScheduled => self.retry_scheduled += 1,
            EventStatus::Processed => self.processed += 1,
            EventStatus::DeadLettered => self.dead_lettered += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.claimed + self.retry_scheduled + self.processed + self.dead_lettered
    }
}
