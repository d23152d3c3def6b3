//! Dispatcher - event_type から Handler を選んで実行する
//!
//! # 学習ポイント
//! - 閉じた enum (`EventKind`) に対する網羅的 match
//! - Builder パターンと起動時検証（Fail-fast 設計）
//! - `Any` による型消去と型付き Handler の取り出し

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{
    AnomalyDetected, DocumentUploaded, EventKind, OutboxError, OutboxEvent, OutboxResult,
    TransactionCreated,
};
use crate::typed::{EventPayload, Handler};

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The registered handler returned `Ok`.
    Handled { kind: &'static str },

    /// No handler exists for this tag. The event is finished without effect.
    Skipped { event_type: String },
}

impl DispatchOutcome {
    /// Note stored in `error_message` when an event is finished as skipped.
    pub fn note(&self) -> Option<String> {
        match self {
            Self::Handled { .. } => None,
            Self::Skipped { event_type } => Some(unknown_type_note(event_type)),
        }
    }
}

pub fn unknown_type_note(event_type: &str) -> String {
    format!("no handler registered for event_type={event_type}")
}

/// BuildError は Dispatcher 構築時のエラー
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Missing handlers for event types: {0:?}. Every known event type must be registered.")]
    MissingHandlers(Vec<String>),

    #[error("Handler for event type '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Event type '{0}' is not a known event kind")]
    UnknownEventType(String),
}

type Slot = Box<dyn Any + Send + Sync>;

/// DispatcherBuilder は Handler を登録して Dispatcher を構築
///
/// # 使用例
/// ```ignore
/// let dispatcher = DispatcherBuilder::new()
///     .register::<DocumentUploaded, _>(ExtractionHandler::new(enqueuer.clone()))?
///     .register::<TransactionCreated, _>(AnomalyScoringHandler::new(enqueuer))?
///     .register::<AnomalyDetected, _>(AnomalyNotificationHandler::new(channels, log, ids))?
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// `build()` は `EventKind::KNOWN_TYPES` がすべて登録済みかをチェックし、
/// 不足があれば `BuildError::MissingHandlers` を返す。
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<&'static str, Slot>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, H>(mut self, handler: H) -> Result<Self, BuildError>
    where
        T: EventPayload,
        H: Handler<T> + 'static,
    {
        if !EventKind::KNOWN_TYPES.contains(&T::TYPE) {
            return Err(BuildError::UnknownEventType(T::TYPE.to_string()));
        }
        if self.handlers.contains_key(T::TYPE) {
            return Err(BuildError::AlreadyRegistered(T::TYPE.to_string()));
        }
        let handler: Arc<dyn Handler<T>> = Arc::new(handler);
        self.handlers.insert(T::TYPE, Box::new(handler));
        Ok(self)
    }

    pub fn build(self) -> Result<Dispatcher, BuildError> {
        let missing: Vec<String> = EventKind::KNOWN_TYPES
            .iter()
            .filter(|t| !self.handlers.contains_key(*t))
            .map(|t| t.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingHandlers(missing));
        }
        Ok(Dispatcher {
            handlers: self.handlers,
        })
    }
}

/// Dispatcher は immutable な Handler 表
///
/// 構築後は変更しないので、ロック無しで `Arc<Dispatcher>` を共有できる。
pub struct Dispatcher {
    handlers: HashMap<&'static str, Slot>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Decode the payload and run the matching handler.
    ///
    /// A malformed payload for a known tag is an error (it is retried and
    /// eventually dead-lettered); an unknown tag is `Skipped`.
    pub async fn dispatch(&self, event: &OutboxEvent) -> OutboxResult<DispatchOutcome> {
        let kind = EventKind::parse(&event.event_type, &event.payload)?;
        debug!(event_id = %event.id, event_type = %event.event_type, "dispatching event");

        match kind {
            EventKind::DocumentUploaded(payload) => self.invoke::<DocumentUploaded>(event, payload).await,
            EventKind::TransactionCreated(payload) => {
                self.invoke::<TransactionCreated>(event, payload).await
            }
            EventKind::AnomalyDetected(payload) => self.invoke::<AnomalyDetected>(event, payload).await,
            EventKind::Unknown { event_type } => {
                warn!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "no handler registered for event type, marking processed"
                );
                Ok(DispatchOutcome::Skipped { event_type })
            }
        }
    }

    async fn invoke<T: EventPayload>(
        &self,
        event: &OutboxEvent,
        payload: T,
    ) -> OutboxResult<DispatchOutcome> {
        let handler = self
            .handlers
            .get(T::TYPE)
            .and_then(|slot| slot.downcast_ref::<Arc<dyn Handler<T>>>())
            .ok_or_else(|| OutboxError::Handler(format!("handler for {} is not registered", T::TYPE)))?;
        handler.handle(event, payload).await?;
        Ok(DispatchOutcome::Handled { kind: T::TYPE })
    }
}
