//! `outbox` binary.
//!
//! Usage:
//!   outbox run --pollers 2            # poll the SQLite outbox until Ctrl-C
//!   outbox emit --event-type document.uploaded --payload '{...}'
//!   outbox dead-letters | replay <id> | show <id> | stats
//!   outbox demo                       # in-memory walkthrough

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use outbox_core::app::handlers::{AnomalyNotificationHandler, AnomalyScoringHandler, ExtractionHandler};
use outbox_core::app::{ClaimEngine, Dispatcher, DispatcherConfig, JobEnqueuer, PollerGroup, RetryPolicy};
use outbox_core::domain::{
    AnomalyDetected, DocumentUploaded, EventId, NewOutboxEvent, TransactionCreated,
};
use outbox_core::impls::{SqliteBackend, TracingChannel};
use outbox_core::ports::{
    Clock, JobQueue, NotificationChannel, NotificationLog, OutboxStore, SystemClock, UlidGenerator,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "outbox")]
#[command(about = "Transactional outbox dispatcher")]
struct Cli {
    /// SQLite database file.
    #[arg(long, env = "OUTBOX_DB", default_value = "outbox.db", global = true)]
    db: PathBuf,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Overrides OUTBOX_MAX_ATTEMPTS.
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run pollers against the database until Ctrl-C.
    Run {
        #[arg(long, env = "OUTBOX_POLLERS", default_value_t = 1)]
        pollers: usize,

        /// Overrides OUTBOX_POLL_INTERVAL_MS.
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Overrides OUTBOX_BATCH_SIZE.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Notification channel names; each one logs what it would send.
        #[arg(long, value_delimiter = ',', default_value = "email,webhook")]
        channels: Vec<String>,
    },

    /// Append one event to the outbox.
    Emit {
        #[arg(long)]
        event_type: String,

        #[arg(long, default_value = "cli")]
        aggregate_type: String,

        #[arg(long, default_value = "cli")]
        aggregate_id: String,

        /// JSON payload.
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// List dead-lettered events.
    DeadLetters {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Give a dead-lettered event a fresh attempt budget.
    Replay { id: i64 },

    /// Print one event.
    Show { id: i64 },

    /// Counts by status.
    Stats,

    /// In-memory walkthrough of the dispatcher.
    Demo,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<DispatcherConfig> {
    let mut config = DispatcherConfig::from_env().context("reading OUTBOX_* configuration")?;
    if let Some(max) = cli.max_attempts {
        config.max_attempts = max;
    }
    if let Command::Run {
        poll_interval_ms,
        batch_size,
        ..
    } = &cli.command
    {
        if let Some(ms) = poll_interval_ms {
            config.poll_interval = Duration::from_millis(*ms);
        }
        if let Some(size) = batch_size {
            config.batch_size = *size;
        }
    }
    config.validate()?;
    Ok(config)
}

/// Wire the three built-in handlers against the given queue and delivery log.
pub(crate) fn build_dispatcher(
    queue: Arc<dyn JobQueue>,
    log: Arc<dyn NotificationLog>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<Dispatcher>> {
    let enqueuer = JobEnqueuer::new(queue, Arc::clone(&clock));
    let dispatcher = Dispatcher::builder()
        .register::<DocumentUploaded, _>(ExtractionHandler::new(enqueuer.clone()))?
        .register::<TransactionCreated, _>(AnomalyScoringHandler::new(enqueuer))?
        .register::<AnomalyDetected, _>(AnomalyNotificationHandler::new(
            channels,
            log,
            Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        ))?
        .build()?;
    Ok(Arc::new(dispatcher))
}

async fn run(
    db: SqliteBackend,
    config: DispatcherConfig,
    pollers: usize,
    channel_names: Vec<String>,
) -> anyhow::Result<()> {
    if pollers == 0 {
        bail!("--pollers must be at least 1");
    }
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend = Arc::new(db);
    let channels: Vec<Arc<dyn NotificationChannel>> =
        channel_names.into_iter().map(TracingChannel::shared).collect();

    let dispatcher = build_dispatcher(backend.clone(), backend.clone(), channels, clock.clone())?;
    let claims = Arc::new(ClaimEngine::new(backend, clock.clone(), config.claim_policy()));

    info!(
        pollers,
        interval_ms = config.poll_interval.as_millis() as u64,
        batch_size = config.batch_size,
        max_attempts = config.max_attempts,
        "starting outbox dispatcher"
    );
    let group = PollerGroup::spawn(
        pollers,
        &config,
        claims,
        dispatcher,
        RetryPolicy::from_config(&config),
        clock,
    )?;

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, finishing in-flight batches");
    group.shutdown_and_join().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let config = load_config(&cli)?;

    if matches!(cli.command, Command::Demo) {
        return demo::run(config).await;
    }

    let db = SqliteBackend::open(&cli.db)
        .with_context(|| format!("opening {}", cli.db.display()))?;
    let now = SystemClock.now();

    match cli.command {
        Command::Run {
            pollers, channels, ..
        } => run(db, config, pollers, channels).await?,
        Command::Emit {
            event_type,
            aggregate_type,
            aggregate_id,
            payload,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("--payload is not valid JSON")?;
            let event = db
                .insert(
                    NewOutboxEvent::new(aggregate_type, aggregate_id, event_type, payload),
                    now,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        Command::DeadLetters { limit } => {
            let dead = db.dead_letters(config.max_attempts, limit).await?;
            println!("{}", serde_json::to_string_pretty(&dead)?);
        }
        Command::Replay { id } => {
            if db.replay(EventId::new(id), now, &config.claim_policy()).await? {
                println!("event {id} scheduled for replay");
            } else {
                bail!("event {id} does not exist, is already processed, or is claimed by a running poller");
            }
        }
        Command::Show { id } => match OutboxStore::get(&db, EventId::new(id)).await? {
            Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
            None => bail!("event {id} not found"),
        },
        Command::Stats => {
            let stats = db.stats(now, &config.claim_policy()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Demo => {}
    }
    Ok(())
}
