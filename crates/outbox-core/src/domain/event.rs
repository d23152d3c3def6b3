//! Outbox event: the durable row written by producers and owned by the store.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::errors::OutboxResult;
use super::ids::EventId;
use crate::typed::EventPayload;

/// One row of the outbox.
///
/// Design:
/// - Only the store mutates rows; everything else reads snapshots.
/// - `processed_at` set => immutable history.
/// - `processing_at` set => somebody holds a claim (live until it is older
///   than the claim timeout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_at: Option<DateTime<Utc>>,

    /// Completed processing attempts (successful or failed).
    pub attempts: u32,

    pub next_attempt_at: DateTime<Utc>,

    /// Last failure detail, kept for operators.
    pub error_message: Option<String>,
}

impl OutboxEvent {
    /// Build the stored form of a freshly inserted event.
    pub fn inserted(id: EventId, new: NewOutboxEvent, now: DateTime<Utc>) -> Self {
        Self {
            id,
            aggregate_type: new.aggregate_type,
            aggregate_id: new.aggregate_id,
            event_type: new.event_type,
            payload: new.payload,
            created_at: now,
            processed_at: None,
            processing_at: None,
            attempts: 0,
            next_attempt_at: now,
            error_message: None,
        }
    }

    /// The fencing token of the current claim, if any.
    pub fn claim(&self) -> Option<Claim> {
        self.processing_at.map(|claimed_at| Claim {
            event_id: self.id,
            claimed_at,
        })
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_dead_lettered(&self, max_attempts: u32) -> bool {
        self.processed_at.is_none() && self.attempts >= max_attempts
    }

    /// A claim is live while it is not older than the timeout.
    pub fn has_live_claim(&self, now: DateTime<Utc>, claim_timeout: TimeDelta) -> bool {
        self.processing_at
            .is_some_and(|claimed_at| claimed_at >= now - claim_timeout)
    }

    /// The claim eligibility predicate.
    ///
    /// `processed_at IS NULL AND (processing_at IS NULL OR processing_at < now - timeout)
    ///  AND next_attempt_at <= now AND attempts < max_attempts`
    pub fn is_claimable(&self, now: DateTime<Utc>, policy: &ClaimPolicy) -> bool {
        self.processed_at.is_none()
            && !self.has_live_claim(now, policy.claim_timeout)
            && self.next_attempt_at <= now
            && self.attempts < policy.max_attempts
    }
}

/// Producer input: what a business transaction writes next to its mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
        }
    }

    /// Build an event from a typed payload; the tag comes from `P::TYPE`.
    pub fn for_kind<P: EventPayload>(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: &P,
    ) -> OutboxResult<Self> {
        Ok(Self::new(
            aggregate_type,
            aggregate_id,
            P::TYPE,
            serde_json::to_value(payload)?,
        ))
    }
}

/// Fencing token handed out by a claim.
///
/// Completing an event only applies while the row still carries this
/// `claimed_at`; after a timeout reclaim by another worker it is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub event_id: EventId,
    pub claimed_at: DateTime<Utc>,
}

/// Parameters of the eligibility predicate that come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPolicy {
    pub claim_timeout: TimeDelta,
    pub max_attempts: u32,
}
