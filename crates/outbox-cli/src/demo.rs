//! In-memory walkthrough: one event of each kind, a flaky notification
//! channel, and ticks until the outbox is drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use outbox_core::app::handlers::{ANOMALY_QUEUE, EXTRACTION_QUEUE};
use outbox_core::app::{ClaimEngine, DispatcherConfig, Poller, RetryPolicy, TickReport};
use outbox_core::domain::{
    AnomalyDetected, DocumentUploaded, Job, NewOutboxEvent, OutboxError, OutboxEvent, OutboxResult,
    OutboxStats, Severity, TransactionCreated,
};
use outbox_core::impls::{InMemoryJobQueue, InMemoryNotificationLog, InMemoryOutboxStore, TracingChannel};
use outbox_core::ports::{
    Clock, FixedClock, JobQueue, Notification, NotificationChannel, OutboxStore, SystemClock,
};
use serde::Serialize;

/// Prints to stdout and fails the first `failures` sends.
struct StdoutChannel {
    failures: AtomicU32,
}

#[async_trait]
impl NotificationChannel for StdoutChannel {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, notification: &Notification) -> OutboxResult<()> {
        let left = self.failures.load(Ordering::Relaxed);
        if left > 0 {
            self.failures.fetch_sub(1, Ordering::Relaxed);
            return Err(OutboxError::Notification {
                channel: "stdout".into(),
                message: format!("intentional failure (left={left})"),
            });
        }
        println!("notify: {} | {}", notification.subject, notification.body);
        Ok(())
    }
}

#[derive(Serialize)]
struct Summary {
    ticks: usize,
    totals: TickReport,
    stats: OutboxStats,
    events: Vec<OutboxEvent>,
    extraction_jobs: Vec<Job>,
    anomaly_jobs: Vec<Job>,
}

pub async fn run(config: DispatcherConfig) -> anyhow::Result<()> {
    let fixed = Arc::new(FixedClock::new(SystemClock.now()));
    let clock: Arc<dyn Clock> = fixed.clone();
    let store = Arc::new(InMemoryOutboxStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let channels: Vec<Arc<dyn NotificationChannel>> = vec![
        Arc::new(StdoutChannel {
            failures: AtomicU32::new(1),
        }) as Arc<dyn NotificationChannel>,
        TracingChannel::shared("audit-log"),
    ];

    let dispatcher = crate::build_dispatcher(
        queue.clone(),
        Arc::new(InMemoryNotificationLog::new()),
        channels,
        clock.clone(),
    )?;
    let claims = Arc::new(ClaimEngine::new(store.clone(), clock.clone(), config.claim_policy()));
    let retry = RetryPolicy::from_config(&config);
    let poller = Poller::new(&config, claims, dispatcher, retry.clone(), clock.clone())?;

    let now = clock.now();
    let events = [
        NewOutboxEvent::for_kind(
            "document",
            "doc-1",
            &DocumentUploaded {
                document_id: "doc-1".into(),
                storage_path: "uploads/2024/doc-1.pdf".into(),
                mime_type: "application/pdf".into(),
            },
        )?,
        NewOutboxEvent::for_kind(
            "transaction",
            "tx-1",
            &TransactionCreated {
                transaction_id: "tx-1".into(),
                account_id: "acc-7".into(),
                amount_cents: 1_250_000,
                currency: "USD".into(),
            },
        )?,
        NewOutboxEvent::for_kind(
            "anomaly",
            "an-1",
            &AnomalyDetected {
                anomaly_id: "an-1".into(),
                transaction_id: "tx-1".into(),
                severity: Severity::High,
                summary: "amount is 40x the account's 90 day median".into(),
            },
        )?,
        NewOutboxEvent::new("invoice", "inv-1", "invoice.voided", serde_json::json!({})),
    ];
    for event in events {
        store.insert(event, now).await?;
    }

    // Tick, and jump the clock over each retry backoff instead of sleeping.
    let mut totals = TickReport::default();
    let mut ticks = 0;
    loop {
        let report = poller.tick().await;
        ticks += 1;
        totals.merge(&report);

        let stats = store.stats(clock.now(), &config.claim_policy()).await?;
        if stats.pending + stats.claimed + stats.retry_scheduled == 0 || ticks >= 20 {
            break;
        }
        if report.is_idle() {
            fixed.advance(delay_as_time_delta(retry.compute_backoff(config.max_attempts)));
        }
    }

    let summary = Summary {
        ticks,
        totals,
        stats: store.stats(clock.now(), &config.claim_policy()).await?,
        events: store.all().await,
        extraction_jobs: queue.list(EXTRACTION_QUEUE).await?,
        anomaly_jobs: queue.list(ANOMALY_QUEUE).await?,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn delay_as_time_delta(delay: std::time::Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(delay).unwrap_or(chrono::TimeDelta::days(1))
}
