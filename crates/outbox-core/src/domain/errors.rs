//! Errors - エラー型と分類

use thiserror::Error;

/// OutboxError はドメインエラー
///
/// Handler failures end up as `error_message` on the outbox row, so the
/// `Display` text is what operators read.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("store error: {0}")]
    Store(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid payload for event_type={event_type}: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("job queue error: {0}")]
    Queue(String),

    #[error("notification via {channel} failed: {message}")]
    Notification { channel: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("poller is already running")]
    AlreadyRunning,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type OutboxResult<T> = Result<T, OutboxError>;
