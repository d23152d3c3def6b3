//! Typed - 型付き Event API
//!
//! event_type の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! - `EventPayload`: payload struct ↔ `event_type` tag
//! - `Handler<T>`: processes one payload type

pub mod handler;
pub mod payload;

pub use self::handler::Handler;
pub use self::payload::EventPayload;
