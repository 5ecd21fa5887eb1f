//! ludex-ingest - catalog ingestion entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use ludex_common::logging::{init_logging, LogConfig, LogLevel};
use ludex_ingest::archive::S3SnapshotStore;
use ludex_ingest::config::IngestConfig;
use ludex_ingest::orchestrator::Orchestrator;
use ludex_ingest::rawg::RawgClient;
use ludex_ingest::reconcile::Reconciler;
use ludex_ingest::retry::RetryPolicy;
use ludex_ingest::store::{CatalogStore, PgCatalogStore};
use ludex_ingest::types::{RunKind, RunReport};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ludex-ingest", about = "Incremental game-catalog ingestion", version)]
struct Cli {
    /// Log debug output to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one ingestion run
    Run {
        /// Scan the whole catalog instead of the changed-since window
        #[arg(long)]
        full: bool,
    },
    /// Show recent runs and their outcomes
    Status {
        /// How many runs to show
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Re-apply the archived snapshots of a past run
    Replay {
        /// Run whose archive to replay
        run_id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _ = init_logging(&effective_log_config(cli.verbose));

    if let Err(e) = execute(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Env-configured logging with CLI overrides layered on top. `--verbose`
/// raises the level to Debug regardless of `LOG_LEVEL`.
fn effective_log_config(verbose: bool) -> LogConfig {
    let mut config = LogConfig::from_env().unwrap_or_default();
    if std::env::var("LOG_FILE_PREFIX").is_err() {
        config.log_file_prefix = "ludex-ingest".to_string();
    }
    if verbose {
        config.level = LogLevel::Debug;
    }
    config
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let config = IngestConfig::load().context("loading configuration")?;

    let store = Arc::new(
        PgCatalogStore::connect(&config.database)
            .await
            .context("connecting to catalog store")?,
    );

    match &cli.command {
        Commands::Run { full } => {
            let kind = if *full {
                RunKind::Full
            } else {
                RunKind::Incremental
            };
            let report = build_orchestrator(&config, store).await?.run(kind).await?;
            print_report(&report);
            Ok(())
        }

        Commands::Status { limit } => {
            let runs = store.latest_runs(*limit).await?;
            if runs.is_empty() {
                println!("No runs recorded yet");
                return Ok(());
            }
            for run in runs {
                println!(
                    "{}  {:11}  {:9}  pages={:<3}  +{} ~{} ={}  defects={}{}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.kind.as_str(),
                    run.status.as_str(),
                    run.pages_completed,
                    run.records_inserted,
                    run.records_updated,
                    run.records_unchanged,
                    run.defects,
                    run.failure_reason
                        .as_deref()
                        .map(|r| format!("  ({})", r))
                        .unwrap_or_default(),
                );
            }
            Ok(())
        }

        Commands::Replay { run_id } => {
            let report = build_orchestrator(&config, store)
                .await?
                .replay(*run_id)
                .await?;
            print_report(&report);
            Ok(())
        }
    }
}

async fn build_orchestrator(
    config: &IngestConfig,
    store: Arc<PgCatalogStore>,
) -> anyhow::Result<Orchestrator> {
    let client =
        RawgClient::new(&config.upstream, &config.retry).context("building upstream client")?;
    let archive = Arc::new(
        S3SnapshotStore::new(&config.archive)
            .await
            .context("initializing snapshot archive")?,
    );

    let store: Arc<dyn CatalogStore> = store;
    let reconciler = Reconciler::new(
        store.clone(),
        config.pipeline.batch_size,
        RetryPolicy::new(
            config.pipeline.batch_max_retries,
            Duration::from_millis(config.retry.backoff_base_ms),
            Duration::from_millis(config.retry.backoff_max_ms),
        ),
    );

    let owner = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "ludex-ingest".to_string());

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current page before stopping");
            signal_token.cancel();
        }
    });

    Ok(Orchestrator::new(
        client,
        archive,
        store,
        reconciler,
        config.pipeline.clone(),
        config.upstream.max_pages,
        owner,
        cancel,
    ))
}

fn print_report(report: &RunReport) {
    info!(
        run_id = %report.run_id,
        status = report.status.as_str(),
        "Run finished"
    );
    println!(
        "run {} {}: {} pages, {} seen, {} inserted, {} updated, {} unchanged, {} defects",
        report.run_id,
        report.status.as_str(),
        report.pages_completed,
        report.records_seen,
        report.records_inserted,
        report.records_updated,
        report.records_unchanged,
        report.defects
    );
}
