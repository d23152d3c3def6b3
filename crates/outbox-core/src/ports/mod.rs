//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//!
//! # 設計原則
//! - The outbox table is the source of truth (正本) for delivery state
//! - The job queue and notification channels are independent resources
//! - Time and ids come through ports so tests stay deterministic

pub mod clock;
pub mod id_generator;
pub mod job_queue;
pub mod notifier;
pub mod outbox_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_queue::JobQueue;
pub use self::notifier::{DeliveryRecord, Notification, NotificationChannel, NotificationLog};
pub use self::outbox_store::{FailureUpdate, OutboxStore};
