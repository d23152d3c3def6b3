//! In-memory notification channels and delivery log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::info;

use crate::domain::{EventId, OutboxError, OutboxResult};
use crate::ports::{DeliveryRecord, Notification, NotificationChannel, NotificationLog};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Delivery log keyed by `(event, channel)`.
#[derive(Default)]
pub struct InMemoryNotificationLog {
    records: Mutex<HashMap<(EventId, String), DeliveryRecord>>,
}

impl InMemoryNotificationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationLog for InMemoryNotificationLog {
    async fn exists(&self, event_id: EventId, channel: &str) -> OutboxResult<bool> {
        Ok(lock(&self.records).contains_key(&(event_id, channel.to_string())))
    }

    async fn record(&self, record: DeliveryRecord) -> OutboxResult<bool> {
        let mut records = lock(&self.records);
        let key = (record.event_id, record.channel.clone());
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, record);
        Ok(true)
    }

    async fn for_event(&self, event_id: EventId) -> OutboxResult<Vec<DeliveryRecord>> {
        let mut found: Vec<DeliveryRecord> = lock(&self.records)
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.channel.cmp(&b.channel));
        Ok(found)
    }
}

/// Channel that keeps what it was asked to send. `fail_next(n)` makes the
/// next `n` sends fail.
pub struct RecordingChannel {
    name: String,
    sent: Mutex<Vec<Notification>>,
    failures: Mutex<usize>,
}

impl RecordingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(0),
        }
    }

    pub fn fail_next(&self, n: usize) {
        *lock(&self.failures) = n;
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> OutboxResult<()> {
        {
            let mut failures = lock(&self.failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(OutboxError::Notification {
                    channel: self.name.clone(),
                    message: "simulated delivery failure".to_string(),
                });
            }
        }
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}

/// Channel that only writes the notification to the log.
pub struct TracingChannel {
    name: String,
}

impl TracingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn shared(name: impl Into<String>) -> Arc<dyn NotificationChannel> {
        Arc::new(Self::new(name))
    }
}

#[async_trait]
impl NotificationChannel for TracingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> OutboxResult<()> {
        info!(
            channel = %self.name,
            event_id = %notification.event_id,
            subject = %notification.subject,
            "notification"
        );
        Ok(())
    }
}
