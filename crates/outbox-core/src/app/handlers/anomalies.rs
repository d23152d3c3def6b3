//! `anomaly.detected` → notification fan-out.
//!
//! Each channel is checked against the delivery log before sending, so a
//! retry of a partially delivered event only reaches the channels that
//! failed last time.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{AnomalyDetected, OutboxError, OutboxEvent};
use crate::ports::{Clock, DeliveryRecord, IdGenerator, Notification, NotificationChannel, NotificationLog};
use crate::typed::Handler;

pub struct AnomalyNotificationHandler {
    channels: Vec<Arc<dyn NotificationChannel>>,
    log: Arc<dyn NotificationLog>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl AnomalyNotificationHandler {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        log: Arc<dyn NotificationLog>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            channels,
            log,
            ids,
            clock,
        }
    }

    fn compose(event: &OutboxEvent, payload: &AnomalyDetected) -> Notification {
        let severity = serde_json::to_value(payload.severity)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Notification {
            event_id: event.id,
            subject: format!("[{severity}] anomaly {} on transaction {}", payload.anomaly_id, payload.transaction_id),
            body: payload.summary.clone(),
        }
    }
}

#[async_trait]
impl Handler<AnomalyDetected> for AnomalyNotificationHandler {
    async fn handle(&self, event: &OutboxEvent, payload: AnomalyDetected) -> Result<(), OutboxError> {
        let notification = Self::compose(event, &payload);
        let mut first_failure: Option<OutboxError> = None;

        for channel in &self.channels {
            let name = channel.name();
            if self.log.exists(event.id, name).await? {
                debug!(event_id = %event.id, channel = name, "already notified, skipping channel");
                continue;
            }

            match channel.send(&notification).await {
                Ok(()) => {
                    let record = DeliveryRecord {
                        id: self.ids.generate_notification_id(),
                        event_id: event.id,
                        channel: name.to_string(),
                        delivered_at: self.clock.now(),
                    };
                    self.log.record(record).await?;
                    info!(event_id = %event.id, channel = name, "anomaly notification sent");
                }
                Err(err) => {
                    warn!(event_id = %event.id, channel = name, error = %err, "anomaly notification failed");
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
