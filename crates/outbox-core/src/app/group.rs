//! PollerGroup - 同じ outbox を n 個の poller で回す

use std::sync::Arc;

use tracing::{error, info};

use super::claim::ClaimEngine;
use super::config::DispatcherConfig;
use super::dispatch::Dispatcher;
use super::poller::Poller;
use super::retry::RetryPolicy;
use crate::domain::{OutboxResult, PollerId};
use crate::ports::Clock;

/// Poller group handle.
/// - 各 poller は同じ store に対して独立にループする（排他は claim だけ）
/// - `shutdown_and_join()` で全 poller の停止を待てる
pub struct PollerGroup {
    pollers: Vec<Poller>,
}

impl PollerGroup {
    /// Spawn `n` pollers, each ticking immediately.
    pub fn spawn(
        n: usize,
        config: &DispatcherConfig,
        claims: Arc<ClaimEngine>,
        dispatcher: Arc<Dispatcher>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> OutboxResult<Self> {
        let mut pollers = Vec::with_capacity(n);
        for _ in 0..n {
            let poller = Poller::new(
                config,
                Arc::clone(&claims),
                Arc::clone(&dispatcher),
                retry.clone(),
                Arc::clone(&clock),
            )?;
            poller.start(true)?;
            pollers.push(poller);
        }
        info!(pollers = n, "poller group started");
        Ok(Self { pollers })
    }

    pub fn ids(&self) -> Vec<PollerId> {
        self.pollers.iter().map(Poller::id).collect()
    }

    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }

    /// Stop every poller and wait for in-flight batches.
    pub async fn shutdown_and_join(self) {
        for poller in &self.pollers {
            if let Err(e) = poller.stop().await {
                error!(poller_id = %poller.id(), error = %e, "poller did not stop cleanly");
            }
        }
        info!("poller group stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::enqueuer::JobEnqueuer;
    use crate::app::handlers::{
        AnomalyNotificationHandler, AnomalyScoringHandler, ExtractionHandler, ANOMALY_QUEUE,
    };
    use crate::domain::{AnomalyDetected, DocumentUploaded, NewOutboxEvent, TransactionCreated};
    use crate::impls::{InMemoryJobQueue, InMemoryNotificationLog, InMemoryOutboxStore};
    use crate::ports::{JobQueue, OutboxStore, SystemClock, UlidGenerator};
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn group_drains_the_outbox_exactly_once() {
        let config = DispatcherConfig {
            poll_interval: Duration::from_millis(5),
            batch_size: 3,
            ..DispatcherConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryOutboxStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let enqueuer = JobEnqueuer::new(queue.clone(), clock.clone());

        for i in 0..25 {
            let payload = TransactionCreated {
                transaction_id: format!("tx-{i}"),
                account_id: "acc-1".into(),
                amount_cents: 100 * i,
                currency: "USD".into(),
            };
            store
                .insert(
                    NewOutboxEvent::for_kind("transaction", format!("tx-{i}"), &payload).unwrap(),
                    clock.now(),
                )
                .await
                .unwrap();
        }

        let dispatcher = Arc::new(
            Dispatcher::builder()
                .register::<DocumentUploaded, _>(ExtractionHandler::new(enqueuer.clone()))
                .unwrap()
                .register::<TransactionCreated, _>(AnomalyScoringHandler::new(enqueuer))
                .unwrap()
                .register::<AnomalyDetected, _>(AnomalyNotificationHandler::new(
                    Vec::new(),
                    Arc::new(InMemoryNotificationLog::new()),
                    Arc::new(UlidGenerator::new(SystemClock)),
                    clock.clone(),
                ))
                .unwrap()
                .build()
                .unwrap(),
        );
        let claims = Arc::new(ClaimEngine::new(store.clone(), clock.clone(), config.claim_policy()));

        let group = PollerGroup::spawn(
            3,
            &config,
            claims,
            dispatcher,
            RetryPolicy::from_config(&config),
            clock.clone(),
        )
        .unwrap();
        assert_eq!(group.len(), 3);
        assert_eq!(group.ids().into_iter().collect::<HashSet<_>>().len(), 3);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let stats = store.stats(clock.now(), &config.claim_policy()).await.unwrap();
            if stats.processed == 25 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "outbox not drained: {stats:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        group.shutdown_and_join().await;

        let jobs = queue.list(ANOMALY_QUEUE).await.unwrap();
        assert_eq!(jobs.len(), 25);
        let identities: HashSet<_> = jobs.iter().map(|j| j.identity.clone()).collect();
        assert_eq!(identities.len(), 25);
    }
}
