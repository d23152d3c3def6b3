//! outbox-core
//!
//! Transactional outbox dispatcher: events written next to business data are
//! claimed by pollers, dispatched to typed handlers, and turned into
//! downstream jobs and notifications with at-least-once delivery.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, event, kind, job, state, errors）
//! - **ports**: 抽象化レイヤー（OutboxStore, JobQueue, NotificationChannel, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（claim, dispatch, retry, poller, config）
//! - **typed**: 型付き Handler API（EventPayload trait, Handler trait）
//! - **impls**: 実装（in-memory と SQLite）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;
