//! Event kinds: the closed set of event types this dispatcher understands.
//!
//! Producers and consumers evolve independently, so the set is closed only on
//! the consumer side: anything not listed here decodes to `EventKind::Unknown`
//! instead of failing.

use serde::{Deserialize, Serialize};

use super::errors::{OutboxError, OutboxResult};
use crate::typed::EventPayload;

/// A document landed in storage and needs text extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUploaded {
    pub document_id: String,
    pub storage_path: String,
    pub mime_type: String,
}

impl EventPayload for DocumentUploaded {
    const TYPE: &'static str = "document.uploaded";
}

/// A financial transaction was recorded and should be scored for anomalies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCreated {
    pub transaction_id: String,
    pub account_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

impl EventPayload for TransactionCreated {
    const TYPE: &'static str = "transaction.created";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// The anomaly detector flagged something; people need to hear about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyDetected {
    pub anomaly_id: String,
    pub transaction_id: String,
    pub severity: Severity,
    pub summary: String,
}

impl EventPayload for AnomalyDetected {
    const TYPE: &'static str = "anomaly.detected";
}

/// Decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    DocumentUploaded(DocumentUploaded),
    TransactionCreated(TransactionCreated),
    AnomalyDetected(AnomalyDetected),
    Unknown { event_type: String },
}

impl EventKind {
    /// Every tag with a handler. `DispatcherBuilder::build` checks against it.
    pub const KNOWN_TYPES: [&'static str; 3] = [
        DocumentUploaded::TYPE,
        TransactionCreated::TYPE,
        AnomalyDetected::TYPE,
    ];

    /// Decode `(event_type, payload)`.
    ///
    /// A known tag with a payload that does not decode is an error: the event
    /// goes through retries and ends up dead-lettered where operators see it.
    pub fn parse(event_type: &str, payload: &serde_json::Value) -> OutboxResult<Self> {
        let kind = match event_type {
            DocumentUploaded::TYPE => EventKind::DocumentUploaded(decode(event_type, payload)?),
            TransactionCreated::TYPE => EventKind::TransactionCreated(decode(event_type, payload)?),
            AnomalyDetected::TYPE => EventKind::AnomalyDetected(decode(event_type, payload)?),
            other => EventKind::Unknown {
                event_type: other.to_string(),
            },
        };
        Ok(kind)
    }

    pub fn event_type(&self) -> &str {
        match self {
            EventKind::DocumentUploaded(_) => DocumentUploaded::TYPE,
            EventKind::TransactionCreated(_) => TransactionCreated::TYPE,
            EventKind::AnomalyDetected(_) => AnomalyDetected::TYPE,
            EventKind::Unknown { event_type } => event_type,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventKind::Unknown { .. })
    }
}

fn decode<P: EventPayload>(event_type: &str, payload: &serde_json::Value) -> OutboxResult<P> {
    P::deserialize(payload).map_err(|source| OutboxError::Payload {
        event_type: event_type.to_string(),
        source,
    })
}
