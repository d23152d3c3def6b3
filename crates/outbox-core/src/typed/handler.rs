//! Handler trait - EventPayload を処理する Handler の定義

use async_trait::async_trait;

use super::payload::EventPayload;
use crate::domain::{OutboxError, OutboxEvent};

/// Handler は一種類の event を処理する
///
/// # Idempotency
/// Delivery is at-least-once: the same event can reach `handle` again after
/// a crash before mark-processed, or after a failure in a later step. A
/// handler must not produce a second observable effect in that case
/// (derive job identities from `event.id`, check before notifying, ...).
///
/// # ジェネリクスによる型安全性
/// - `Handler<DocumentUploaded>` は `DocumentUploaded` しか受け取れない
#[async_trait]
pub trait Handler<T: EventPayload>: Send + Sync {
    async fn handle(&self, event: &OutboxEvent, payload: T) -> Result<(), OutboxError>;
}
