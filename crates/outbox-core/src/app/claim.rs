//! ClaimEngine - 原子的なバッチ予約
//!
//! Thin service over `OutboxStore` that owns the claim policy and the clock,
//! so the poller only says "give me a batch" and "this claim is done".

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::{Claim, ClaimPolicy, OutboxEvent, OutboxResult};
use crate::ports::{Clock, FailureUpdate, OutboxStore};

pub struct ClaimEngine {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    policy: ClaimPolicy,
}

impl ClaimEngine {
    pub fn new(store: Arc<dyn OutboxStore>, clock: Arc<dyn Clock>, policy: ClaimPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Reserve up to `limit` eligible events, oldest first.
    ///
    /// Every returned event carries the `Claim` its completion must present.
    pub async fn claim_batch(&self, limit: usize) -> OutboxResult<Vec<(OutboxEvent, Claim)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let events = self
            .store
            .claim_batch(limit, now, &self.policy)
            .await
            .inspect_err(|e| error!(error = %e, "outbox claim failed"))?;

        let claimed: Vec<(OutboxEvent, Claim)> = events
            .into_iter()
            .filter_map(|event| event.claim().map(|claim| (event, claim)))
            .collect();

        if !claimed.is_empty() {
            info!(
                count = claimed.len(),
                first_id = %claimed[0].0.id,
                "claimed outbox events"
            );
        }
        Ok(claimed)
    }

    /// Returns `false` when the claim was lost to a timeout reclaim.
    pub async fn mark_processed(&self, claim: &Claim, note: Option<String>) -> OutboxResult<bool> {
        let applied = self
            .store
            .mark_processed(claim, self.clock.now(), note)
            .await?;
        if !applied {
            warn!(event_id = %claim.event_id, "claim lost before mark processed");
        }
        Ok(applied)
    }

    /// Returns `false` when the claim was lost to a timeout reclaim.
    pub async fn record_failure(&self, claim: &Claim, update: &FailureUpdate) -> OutboxResult<bool> {
        let applied = self.store.record_failure(claim, update).await?;
        if !applied {
            warn!(event_id = %claim.event_id, "claim lost before failure was recorded");
        }
        Ok(applied)
    }
}
