//! `transaction.created` → anomaly scoring job.

use async_trait::async_trait;

use crate::app::enqueuer::JobEnqueuer;
use crate::domain::{OutboxError, OutboxEvent, TransactionCreated};
use crate::typed::Handler;

pub const ANOMALY_QUEUE: &str = "anomaly";
pub const SCORE_TRANSACTION_JOB: &str = "score_transaction";

pub struct AnomalyScoringHandler {
    enqueuer: JobEnqueuer,
}

impl AnomalyScoringHandler {
    pub fn new(enqueuer: JobEnqueuer) -> Self {
        Self { enqueuer }
    }
}

#[async_trait]
impl Handler<TransactionCreated> for AnomalyScoringHandler {
    async fn handle(&self, event: &OutboxEvent, payload: TransactionCreated) -> Result<(), OutboxError> {
        self.enqueuer
            .enqueue_for_event(event, ANOMALY_QUEUE, SCORE_TRANSACTION_JOB, &payload)
            .await?;
        Ok(())
    }
}
