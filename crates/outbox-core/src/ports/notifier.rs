//! Notifier ports - 通知チャネルと送信履歴
//!
//! Channels are opaque: they take a `Notification` and report success or
//! failure. The log remembers which `(event, channel)` pairs were delivered so
//! a retried event does not notify the same channel twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EventId, NotificationId, OutboxResult};

/// What a channel is asked to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event_id: EventId,
    pub subject: String,
    pub body: String,
}

/// A recorded delivery (the dependent record created by the fan-out).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: NotificationId,
    pub event_id: EventId,
    pub channel: String,
    pub delivered_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Stable name used as the existence-check key ("email", "webhook", ...).
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> OutboxResult<()>;
}

#[async_trait]
pub trait NotificationLog: Send + Sync {
    async fn exists(&self, event_id: EventId, channel: &str) -> OutboxResult<bool>;

    /// Insert-if-absent. Returns `false` when the pair was already recorded.
    async fn record(&self, record: DeliveryRecord) -> OutboxResult<bool>;

    async fn for_event(&self, event_id: EventId) -> OutboxResult<Vec<DeliveryRecord>>;
}
