//! Poller - claim → dispatch → complete を周期的に回すサービス
//!
//! # 設計
//! - `tick()` is one cycle and can be driven by hand (tests, cron-style
//!   callers) or by the loop `start()` spawns.
//! - Events of a batch run sequentially in claim order. One failing or
//!   panicking handler never aborts the rest of the batch.
//! - `stop()` does not cancel a tick that already started; it waits for it.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::claim::ClaimEngine;
use super::config::DispatcherConfig;
use super::dispatch::{DispatchOutcome, Dispatcher};
use super::retry::{RetryDecision, RetryPolicy};
use crate::domain::{Claim, OutboxError, OutboxEvent, OutboxResult, PollerId};
use crate::ports::{Clock, FailureUpdate, IdGenerator, UlidGenerator};

/// Counters of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub claimed: usize,
    pub processed: usize,
    /// Unknown event types finished without a handler.
    pub skipped: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Completions rejected because another poller reclaimed the event.
    pub lost_claims: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }

    pub fn merge(&mut self, other: &TickReport) {
        self.claimed += other.claimed;
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.lost_claims += other.lost_claims;
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct Poller {
    worker: Arc<TickWorker>,
    poll_interval: Duration,
    running: Mutex<Option<Running>>,
}

struct TickWorker {
    id: PollerId,
    batch_size: usize,
    claims: Arc<ClaimEngine>,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Poller {
    /// Fails with `OutboxError::Config` when `config` does not validate.
    pub fn new(
        config: &DispatcherConfig,
        claims: Arc<ClaimEngine>,
        dispatcher: Arc<Dispatcher>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> OutboxResult<Self> {
        config.validate()?;
        let id = UlidGenerator::new(Arc::clone(&clock)).generate_poller_id();
        Ok(Self {
            worker: Arc::new(TickWorker {
                id,
                batch_size: config.batch_size,
                claims,
                dispatcher,
                retry,
                clock,
            }),
            poll_interval: config.poll_interval,
            running: Mutex::new(None),
        })
    }

    pub fn id(&self) -> PollerId {
        self.worker.id
    }

    /// One claim-and-process cycle.
    ///
    /// A failed claim is logged and reported as an idle tick; the next tick
    /// simply tries again.
    pub async fn tick(&self) -> TickReport {
        self.worker.tick().await
    }

    /// Spawn the polling loop. The first tick runs right away when
    /// `run_immediately`, otherwise after one `poll_interval`.
    pub fn start(&self, run_immediately: bool) -> OutboxResult<()> {
        let mut running = self.lock_running();
        if running.as_ref().is_some_and(|r| !r.join.is_finished()) {
            return Err(OutboxError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Arc::clone(&self.worker);
        let join = tokio::spawn(poll_loop(worker, self.poll_interval, run_immediately, shutdown_rx));
        *running = Some(Running { shutdown_tx, join });

        info!(
            poller_id = %self.worker.id,
            interval_ms = self.poll_interval.as_millis() as u64,
            "poller started"
        );
        Ok(())
    }

    /// Request shutdown and wait for the loop to exit. An in-flight batch
    /// completes first. Calling it on a stopped poller is a no-op.
    pub async fn stop(&self) -> OutboxResult<()> {
        let running = self.lock_running().take();
        let Some(Running { shutdown_tx, join }) = running else {
            return Ok(());
        };

        // ignore send error: the loop may already be gone
        let _ = shutdown_tx.send(true);
        join.await?;
        info!(poller_id = %self.worker.id, "poller stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|r| !r.join.is_finished())
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn poll_loop(
    worker: Arc<TickWorker>,
    poll_interval: Duration,
    run_immediately: bool,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !run_immediately {
        // the first tick of an interval completes immediately
        interval.tick().await;
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = interval.tick() => {}
        }
        if *shutdown_rx.borrow() {
            break;
        }
        worker.tick().await;
    }
}

impl TickWorker {
    async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let batch = match self.claims.claim_batch(self.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(poller_id = %self.id, error = %e, "tick skipped, claim failed");
                return report;
            }
        };
        report.claimed = batch.len();

        for (event, claim) in batch {
            self.process(event, claim, &mut report).await;
        }

        if !report.is_idle() {
            info!(
                poller_id = %self.id,
                claimed = report.claimed,
                processed = report.processed,
                skipped = report.skipped,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                lost_claims = report.lost_claims,
                "tick finished"
            );
        }
        report
    }

    async fn process(&self, event: OutboxEvent, claim: Claim, report: &mut TickReport) {
        match self.run_handler(&event).await {
            Ok(outcome) => {
                let skipped = matches!(outcome, DispatchOutcome::Skipped { .. });
                match self.claims.mark_processed(&claim, outcome.note()).await {
                    Ok(true) if skipped => report.skipped += 1,
                    Ok(true) => report.processed += 1,
                    Ok(false) => report.lost_claims += 1,
                    Err(e) => error!(
                        poller_id = %self.id,
                        event_id = %event.id,
                        error = %e,
                        "handler succeeded but mark processed failed, event will be redelivered"
                    ),
                }
            }
            Err(err) => self.fail(&event, &claim, err, report).await,
        }
    }

    /// Dispatch in its own task so a panicking handler only fails this event.
    async fn run_handler(&self, event: &OutboxEvent) -> OutboxResult<DispatchOutcome> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let owned = event.clone();
        match tokio::spawn(async move { dispatcher.dispatch(&owned).await }).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => Err(OutboxError::Handler(format!(
                "handler panicked: {}",
                panic_message(join_err.into_panic())
            ))),
            Err(join_err) => Err(OutboxError::Join(join_err)),
        }
    }

    async fn fail(&self, event: &OutboxEvent, claim: &Claim, err: OutboxError, report: &mut TickReport) {
        let now = self.clock.now();
        let decision = self.retry.decide(event.attempts.saturating_add(1), now);
        let next_attempt_at = match &decision {
            RetryDecision::Retry { next_attempt_at, .. } => *next_attempt_at,
            RetryDecision::DeadLetter { .. } => now,
        };
        let update = FailureUpdate {
            attempts: decision.attempts(),
            next_attempt_at,
            error: err.to_string(),
        };

        match self.claims.record_failure(claim, &update).await {
            Ok(false) => report.lost_claims += 1,
            Ok(true) => match decision {
                RetryDecision::Retry { attempts, delay, .. } => {
                    report.retried += 1;
                    warn!(
                        poller_id = %self.id,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "event failed, retry scheduled"
                    );
                }
                RetryDecision::DeadLetter { attempts } => {
                    report.dead_lettered += 1;
                    error!(
                        poller_id = %self.id,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        error = %err,
                        "event dead-lettered"
                    );
                }
            },
            Err(e) => error!(
                poller_id = %self.id,
                event_id = %event.id,
                error = %e,
                "could not record failure, event will be reclaimed after claim timeout"
            ),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
