//! `document.uploaded` → text extraction job.

use async_trait::async_trait;

use crate::app::enqueuer::JobEnqueuer;
use crate::domain::{DocumentUploaded, OutboxError, OutboxEvent};
use crate::typed::Handler;

pub const EXTRACTION_QUEUE: &str = "extraction";
pub const EXTRACT_DOCUMENT_JOB: &str = "extract_document";

pub struct ExtractionHandler {
    enqueuer: JobEnqueuer,
}

impl ExtractionHandler {
    pub fn new(enqueuer: JobEnqueuer) -> Self {
        Self { enqueuer }
    }
}

#[async_trait]
impl Handler<DocumentUploaded> for ExtractionHandler {
    async fn handle(&self, event: &OutboxEvent, payload: DocumentUploaded) -> Result<(), OutboxError> {
        self.enqueuer
            .enqueue_for_event(event, EXTRACTION_QUEUE, EXTRACT_DOCUMENT_JOB, &payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventId, NewOutboxEvent};
    use crate::impls::InMemoryJobQueue;
    use crate::ports::{JobQueue, SystemClock};
    use std::sync::Arc;

    #[tokio::test]
    async fn enqueues_one_extraction_job_per_event() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let handler = ExtractionHandler::new(JobEnqueuer::new(queue.clone(), Arc::new(SystemClock)));
        let payload = DocumentUploaded {
            document_id: "doc-1".into(),
            storage_path: "uploads/doc-1.pdf".into(),
            mime_type: "application/pdf".into(),
        };
        let event = OutboxEvent::inserted(
            EventId::new(3),
            NewOutboxEvent::for_kind("document", "doc-1", &payload).unwrap(),
            chrono::Utc::now(),
        );

        handler.handle(&event, payload.clone()).await.unwrap();
        handler.handle(&event, payload).await.unwrap();

        let jobs = queue.list(EXTRACTION_QUEUE).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].identity.as_str(), "outbox_3");
        assert_eq!(jobs[0].job_type, EXTRACT_DOCUMENT_JOB);
        assert_eq!(jobs[0].payload["documentId"], "doc-1");
    }
}
