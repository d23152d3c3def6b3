//! Built-in handlers, one per known event kind.

pub mod anomalies;
pub mod documents;
pub mod transactions;

pub use self::anomalies::AnomalyNotificationHandler;
pub use self::documents::{EXTRACT_DOCUMENT_JOB, EXTRACTION_QUEUE, ExtractionHandler};
pub use self::transactions::{ANOMALY_QUEUE, AnomalyScoringHandler, SCORE_TRANSACTION_JOB};
