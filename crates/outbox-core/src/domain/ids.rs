//! Domain identifiers (strongly-typed IDs).
//!
//! Two families live here:
//! - `EventId`: the outbox row id. It is assigned by the store, increases
//!   monotonically and is the only ordering guarantee the outbox gives.
//! - `Id<T>`: ULID based ids for things the dispatcher creates itself
//!   (jobs, pollers, notification records).
//!
//! ## Phantom Type パターン
//! `Id<T>` は共通実装を一つにまとめつつ、`T`（PhantomData のマーカー型）で
//! JobId と PollerId を混同できないようにしています。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Prefix of every downstream job identity derived from an outbox event.
pub const JOB_IDENTITY_PREFIX: &str = "outbox_";

/// Identifier of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Deterministic identity of the downstream job produced for an outbox event.
///
/// The job queue treats a second enqueue with the same identity as a no-op,
/// which turns "event delivered twice" into "job created once".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobIdentity(String);

impl JobIdentity {
    /// `outbox_<eventId>`
    pub fn for_event(event_id: EventId) -> Self {
        Self(format!("{JOB_IDENTITY_PREFIX}{event_id}"))
    }

    /// Wrap an identity read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"job-", "poller-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ULID based id, typed by its marker.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parse the bare ULID text (without prefix) as written by the SQLite backend.
    pub fn parse(raw: &str) -> Option<Self> {
        Ulid::from_string(raw).ok().map(Self::from_ulid)
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Job のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Poller のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Poller {}

impl IdMarker for Poller {
    fn prefix() -> &'static str {
        "poller-"
    }
}

/// Notification のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Notification {}

impl IdMarker for Notification {
    fn prefix() -> &'static str {
        "notification-"
    }
}

/// Identifier of a job record inside a queue.
pub type JobId = Id<Job>;

/// Identifier of one poller instance (used in logs).
pub type PollerId = Id<Poller>;

/// Identifier of one recorded notification delivery.
pub type NotificationId = Id<Notification>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_identity_is_derived_from_event_id() {
        let identity = JobIdentity::for_event(EventId::new(42));
        assert_eq!(identity.as_str(), "outbox_42");
        assert_eq!(identity, JobIdentity::for_event(EventId::new(42)));
        assert_ne!(identity, JobIdentity::for_event(EventId::new(43)));
    }

    #[test]
    fn event_ids_order_by_value() {
        let mut ids = vec![EventId::new(3), EventId::new(1), EventId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![EventId::new(1), EventId::new(2), EventId::new(3)]);
    }

    #[test]
    fn ulid_ids_carry_their_prefix() {
        let ulid = Ulid::new();
        assert!(JobId::from_ulid(ulid).to_string().starts_with("job-"));
        assert!(PollerId::from_ulid(ulid).to_string().starts_with("poller-"));
        assert!(
            NotificationId::from_ulid(ulid)
                .to_string()
                .starts_with("notification-")
        );
    }

    #[test]
    fn ulid_ids_parse_from_bare_text() {
        let ulid = Ulid::new();
        let parsed = JobId::parse(&ulid.to_string()).unwrap();
        assert_eq!(parsed.as_ulid(), ulid);
        assert!(JobId::parse("not-a-ulid").is_none());
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<JobId>(), size_of::<Ulid>());
        assert_eq!(size_of::<PollerId>(), 16);
    }
}
