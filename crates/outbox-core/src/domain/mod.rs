//! Domain model (IDs, outbox events, event kinds, jobs, errors).

pub mod errors;
pub mod event;
pub mod ids;
pub mod job;
pub mod kind;
pub mod state;

pub use self::errors::{OutboxError, OutboxResult};
pub use self::event::{Claim, ClaimPolicy, NewOutboxEvent, OutboxEvent};
pub use self::ids::{EventId, JobId, JobIdentity, NotificationId, PollerId};
pub use self::job::{Enqueued, Job, NewJob};
pub use self::kind::{AnomalyDetected, DocumentUploaded, EventKind, Severity, TransactionCreated};
pub use self::state::{EventStatus, OutboxStats};
