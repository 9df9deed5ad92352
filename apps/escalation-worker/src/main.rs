//! Helpdesk escalation worker.
//!
//! Runs the escalation engine's background jobs against PostgreSQL: the
//! escalation cycle, schedule seeding, pre-deadline warnings, the daily
//! summary report and outbox delivery.

mod config;
mod logging;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use config::WorkerConfig;
use helpdesk_db::{ensure_default_settings, run_migrations, DbPool};
use helpdesk_escalation::jobs::{
    summary_report_job, EscalationJob, EscalationReportJob, EscalationWarningJob, JobError,
    NotificationOutboxWorker,
};
use helpdesk_escalation::{
    EscalationError, EscalationRuleCatalog, EscalationScheduler, EscalationSettings,
    EscalationSettingsResolver, LoggingTransport, NotificationDispatch, NotificationTransport,
    OutboxDispatcher, PgEscalationStore, StaticRecipientDirectory, TicketEscalationStateMachine,
    WebhookTransport,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "escalation-worker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run every job on its interval until interrupted (default)
    Run,

    /// Run a single pass of one job and exit
    Once {
        #[arg(value_enum)]
        job: JobKind,
    },

    /// Apply migrations and insert the global settings row, then exit
    Bootstrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum JobKind {
    /// Escalate every due ticket
    Cycle,
    /// Schedule tickets that have no deadline yet
    Seed,
    /// Warn assignees ahead of deadlines
    Warn,
    /// Send the escalation summary report
    Report,
    /// Deliver queued notifications
    Deliver,
}

impl JobKind {
    const ALL: [JobKind; 5] = [
        JobKind::Cycle,
        JobKind::Seed,
        JobKind::Warn,
        JobKind::Report,
        JobKind::Deliver,
    ];

    fn interval(self, config: &WorkerConfig) -> Duration {
        let secs = match self {
            JobKind::Cycle => config.intervals.cycle_secs,
            JobKind::Seed => config.intervals.seed_secs,
            JobKind::Warn => config.intervals.warning_secs,
            // Checks run more often than reports; the cursor decides when one is due.
            JobKind::Report => config
                .intervals
                .report_secs
                .min(summary_report_job::DEFAULT_POLL_INTERVAL_SECS),
            JobKind::Deliver => config.intervals.outbox_secs,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Cycle => "escalation_cycle",
            JobKind::Seed => "seed_schedules",
            JobKind::Warn => "escalation_warnings",
            JobKind::Report => "summary_report",
            JobKind::Deliver => "outbox_delivery",
        };
        f.write_str(name)
    }
}

/// All background jobs, wired to one Postgres store.
struct Jobs {
    escalation: EscalationJob,
    warnings: EscalationWarningJob,
    report: EscalationReportJob,
    outbox: NotificationOutboxWorker,
}

impl Jobs {
    fn build(config: &WorkerConfig, pool: &DbPool) -> Result<Self, EscalationError> {
        let store = Arc::new(PgEscalationStore::new(pool.inner().clone()));
        let dispatcher: Arc<dyn NotificationDispatch> =
            Arc::new(OutboxDispatcher::new(store.clone()));

        let catalog = EscalationRuleCatalog::new(store.clone());
        let resolver = EscalationSettingsResolver::new(store.clone());
        let state_machine = TicketEscalationStateMachine::new(store.clone(), dispatcher.clone());
        let scheduler = EscalationScheduler::new(
            store.clone(),
            catalog.clone(),
            resolver.clone(),
            state_machine,
        )
        .with_cycle_budget(JobKind::Cycle.interval(config));

        let warnings =
            EscalationWarningJob::new(store.clone(), catalog, resolver, dispatcher.clone())
                .with_lead_secs(config.warning_lead_secs);

        let directory = Arc::new(StaticRecipientDirectory::new(config.summary_recipients.clone()));
        let period = chrono::Duration::from_std(Duration::from_secs(config.intervals.report_secs))
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let report = EscalationReportJob::new(
            store.clone(),
            store.clone(),
            store.clone(),
            directory,
            dispatcher,
        )
        .with_period(period);

        let transport: Arc<dyn NotificationTransport> = match &config.webhook_url {
            Some(url) => {
                info!(url = %url, "Delivering notifications to webhook");
                Arc::new(WebhookTransport::new(url.clone())?)
            }
            None => {
                info!("No webhook configured; notifications are written to the log");
                Arc::new(LoggingTransport)
            }
        };
        let outbox =
            NotificationOutboxWorker::new(store, transport).with_batch_size(config.batch_size);

        Ok(Self {
            escalation: EscalationJob::new(scheduler),
            warnings,
            report,
            outbox,
        })
    }

    async fn run(&self, kind: JobKind) -> Result<(), JobError> {
        match kind {
            JobKind::Cycle => {
                self.escalation.poll().await?;
            }
            JobKind::Seed => {
                self.escalation.seed().await?;
            }
            JobKind::Warn => {
                self.warnings.poll().await?;
            }
            JobKind::Report => {
                self.report.poll().await?;
            }
            JobKind::Deliver => {
                self.outbox.poll().await?;
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration (fail-fast on missing required values)
    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        cycle_interval_secs = config.intervals.cycle_secs,
        webhook = config.webhook_url.is_some(),
        "Starting escalation worker"
    );

    let pool = match DbPool::connect_with(&config.database_url, config.max_connections).await {
        Ok(pool) => {
            info!("Database connection established");
            pool
        }
        Err(e) => {
            eprintln!("Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run_migrations(&pool).await {
        eprintln!("FATAL: Database migrations failed: {e}");
        std::process::exit(1);
    }

    // Reads never create settings; the global row must exist before any job runs.
    match ensure_default_settings(pool.inner(), &EscalationSettings::default().to_new_row()).await
    {
        Ok(created) => info!(created, "Escalation settings bootstrap completed"),
        Err(e) => {
            eprintln!("FATAL: Escalation settings bootstrap failed: {e}");
            std::process::exit(1);
        }
    }

    let jobs = match Jobs::build(&config, &pool) {
        Ok(jobs) => Arc::new(jobs),
        Err(e) => {
            eprintln!("FATAL: Failed to build escalation jobs: {e}");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Bootstrap => {
            info!("Bootstrap complete");
        }
        Command::Once { job } => {
            if let Err(e) = jobs.run(job).await {
                error!(job = %job, error = %e, "Job run failed");
                std::process::exit(1);
            }
        }
        Command::Run => {
            let token = CancellationToken::new();
            let handles: Vec<JoinHandle<()>> = JobKind::ALL
                .into_iter()
                .map(|kind| {
                    spawn_job_loop(jobs.clone(), kind, kind.interval(&config), token.clone())
                })
                .collect();

            shutdown_signal().await;
            token.cancel();
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Job loop terminated abnormally");
                }
            }
        }
    }

    pool.into_inner().close().await;
    info!("Escalation worker stopped");
}

/// Run `kind` every `every` until `token` is cancelled.
///
/// A run in progress finishes before the loop observes cancellation.
fn spawn_job_loop(
    jobs: Arc<Jobs>,
    kind: JobKind,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(job = %kind, interval_secs = every.as_secs(), "Job loop started");
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = jobs.run(kind).await {
                        error!(job = %kind, error = %e, "Job run failed");
                    }
                }
            }
        }
        info!(job = %kind, "Job loop stopped");
    })
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
