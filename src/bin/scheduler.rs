//! Runs the round deadline sweep and the verdict worker.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use rostrum::{
    clock::SystemClock,
    config::ArenaConfig,
    debates::{
        scheduler::Scheduler,
        verdicts::{VerdictError, VerdictGenerator, VerdictQueue, VerdictWorker},
    },
    error::ArenaError,
    notify::{LogNotifier, LogUsageMeter},
    state::{Services, make_pool},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// A TOML configuration file. Defaults are used for anything it leaves
    /// out.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured (and `DATABASE_URL`) database.
    #[arg(long)]
    database_url: Option<String>,
    /// Sweep once and exit.
    #[arg(long)]
    once: bool,
}

/// Stands in for the judging service: records that a verdict was asked for.
/// Verdicts are then supplied through `apply_verdict`.
struct LoggingGenerator;

impl VerdictGenerator for LoggingGenerator {
    async fn generate(&self, debate_id: &str) -> Result<(), VerdictError> {
        tracing::info!(debate = debate_id, "verdict requested from judges");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), ArenaError> {
    let args = Args::parse();
    let mut config = ArenaConfig::load(args.config.as_deref())?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let pool = make_pool(&config.database_url, config.pool_size)?;
    let (verdicts, jobs) = VerdictQueue::channel();
    let services = Services {
        clock: Arc::new(SystemClock),
        notifier: Arc::new(LogNotifier),
        meter: Arc::new(LogUsageMeter),
        verdicts,
    };

    let scheduler = Arc::new(
        Scheduler::new(pool, services)
            .with_retry_after(config.verdict_retry_after()),
    );
    let worker =
        VerdictWorker::new(Arc::new(LoggingGenerator), config.retry_policy());
    let worker = tokio::spawn(worker.run(jobs));

    if args.once {
        let sweeper = scheduler.clone();
        let task = tokio::task::spawn_blocking(move || {
            let report = sweeper.sweep()?;
            sweeper.retry_stalled_verdicts()?;
            Ok::<_, ArenaError>(report)
        });
        let report = match task.await {
            Ok(report) => report?,
            Err(e) => {
                tracing::error!("sweep task panicked: {e}");
                std::process::exit(1);
            }
        };
        tracing::info!(
            processed = report.processed,
            failures = report.failures(),
            "sweep finished"
        );
    } else {
        scheduler
            .clone()
            .run(config.sweep_interval(), async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("could not listen for ctrl-c: {e}");
                }
            })
            .await;
    }

    // the worker stops once the last queue handle (held by the scheduler's
    // services) is gone
    drop(scheduler);
    if let Err(e) = worker.await {
        tracing::error!("verdict worker panicked: {e}");
    }

    Ok(())
}
