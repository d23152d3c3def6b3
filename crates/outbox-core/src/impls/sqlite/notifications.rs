//! `notification_deliveries` table: the `NotificationLog` port.

use async_trait::async_trait;
use rusqlite::params;

use super::{SqliteBackend, from_millis, to_millis};
use crate::domain::{EventId, NotificationId, OutboxResult};
use crate::ports::{DeliveryRecord, NotificationLog};

#[async_trait]
impl NotificationLog for SqliteBackend {
    async fn exists(&self, event_id: EventId, channel: &str) -> OutboxResult<bool> {
        let channel = channel.to_string();
        self.call(move |conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM notification_deliveries WHERE event_id = ?1 AND channel = ?2)",
                params![event_id.get(), channel],
                |row| row.get(0),
            )?;
            Ok(found == 1)
        })
        .await
    }

    async fn record(&self, record: DeliveryRecord) -> OutboxResult<bool> {
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO notification_deliveries (event_id, channel, id, delivered_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.event_id.get(),
                    record.channel,
                    record.id.as_ulid().to_string(),
                    to_millis(record.delivered_at)
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn for_event(&self, event_id: EventId) -> OutboxResult<Vec<DeliveryRecord>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_id, channel, delivered_at
                   FROM notification_deliveries WHERE event_id = ?1 ORDER BY channel",
            )?;
            let rows = stmt.query_map(params![event_id.get()], |row| {
                let id: String = row.get(0)?;
                Ok(DeliveryRecord {
                    id: NotificationId::parse(&id).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            format!("invalid notification id {id:?}").into(),
                        )
                    })?,
                    event_id: EventId::new(row.get(1)?),
                    channel: row.get(2)?,
                    delivered_at: from_millis(3, row.get(3)?)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{IdGenerator, SystemClock, UlidGenerator};

    #[tokio::test]
    async fn record_is_insert_if_absent() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let ids = UlidGenerator::new(SystemClock);
        let event = EventId::new(5);
        let record = |channel: &str| DeliveryRecord {
            id: ids.generate_notification_id(),
            event_id: event,
            channel: channel.to_string(),
            delivered_at: chrono::Utc::now(),
        };

        assert!(!db.exists(event, "email").await.unwrap());
        assert!(db.record(record("email")).await.unwrap());
        assert!(!db.record(record("email")).await.unwrap());
        assert!(db.record(record("webhook")).await.unwrap());
        assert!(db.exists(event, "email").await.unwrap());

        let channels: Vec<String> = db
            .for_event(event)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.channel)
            .collect();
        assert_eq!(channels, vec!["email", "webhook"]);
    }
}
