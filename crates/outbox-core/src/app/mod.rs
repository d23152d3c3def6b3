//! App - アプリケーション層
//!
//! ports を組み合わせて outbox の配送ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **ClaimEngine**: 原子的なバッチ予約と claim で守られた完了処理
//! - **Dispatcher**: event_type → Handler（起動時に網羅性を検証）
//! - **JobEnqueuer**: event id 由来の identity で冪等に enqueue
//! - **RetryPolicy**: 指数バックオフと dead-letter 判定
//! - **Poller / PollerGroup**: tick ループと start/stop

pub mod claim;
pub mod config;
pub mod dispatch;
pub mod enqueuer;
pub mod group;
pub mod handlers;
pub mod poller;
pub mod retry;

// 主要な型を再エクスポート
pub use self::claim::ClaimEngine;
pub use self::config::{BackoffConfig, DispatcherConfig};
pub use self::dispatch::{BuildError, DispatchOutcome, Dispatcher, DispatcherBuilder};
pub use self::enqueuer::JobEnqueuer;
pub use self::group::PollerGroup;
pub use self::poller::{Poller, TickReport};
pub use self::retry::{RetryDecision, RetryPolicy};
