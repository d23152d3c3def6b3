//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryOutboxStore / InMemoryJobQueue / InMemoryNotificationLog**: テストとデモ用
//! - **RecordingChannel / TracingChannel**: 通知チャネル
//! - **SqliteBackend**: 永続化（outbox, jobs, 通知履歴を一つの DB に）

pub mod inmem_notify;
pub mod inmem_queue;
pub mod inmem_store;
pub mod sqlite;

// 主要な型を再エクスポート
pub use self::inmem_notify::{InMemoryNotificationLog, RecordingChannel, TracingChannel};
pub use self::inmem_queue::InMemoryJobQueue;
pub use self::inmem_store::InMemoryOutboxStore;
pub use self::sqlite::{SqliteBackend, append_event};
