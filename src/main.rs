use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use kawaraban::config::Config;
use kawaraban::queue::{OfflineQueue, SyncReport};
use kawaraban::store::FileStore;
use kawaraban::transport::HttpTransport;
use kawaraban::RequestOrchestrator;

/// Kawaraban - resilient request core of the Kawaraban feed reader
#[derive(Parser, Debug)]
#[command(name = "kawaraban")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and exit
    Check,
    /// Show the persisted offline queue
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay pending offline operations against the backend
    Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    config.validate().context("Configuration is invalid")?;

    kawaraban::logging::init_subscriber(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging subsystem: {}", e))?;

    tracing::info!(
        config_file = %args.config.display(),
        base_url = %config.api.base_url,
        storage_dir = %config.queue.storage_dir.display(),
        "Configuration loaded successfully"
    );

    if let Command::Check = args.command {
        println!("Configuration OK: {}", args.config.display());
        return Ok(());
    }

    let transport = HttpTransport::new().context("Failed to build HTTP client")?;
    let orchestrator = RequestOrchestrator::new(&config, Arc::new(transport))?;
    let store = FileStore::new(config.queue.storage_dir.clone());
    let queue = OfflineQueue::restore(&config.queue, Arc::new(store), orchestrator.clone()).await;

    match args.command {
        Command::Check => {}
        Command::Status { json } => {
            let status = queue.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!(
                    "pending: {}  failed: {}  total: {}",
                    status.pending, status.failed, status.total
                );
                for op in queue.pending() {
                    println!(
                        "  [{}] {} {} {} (attempts: {})",
                        op.priority, op.id, op.method, op.path, op.attempt_count
                    );
                }
                for op in queue.failed() {
                    println!(
                        "  [failed] {} {} {}: {}",
                        op.id,
                        op.method,
                        op.path,
                        op.last_error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        Command::Sync => {
            let report = tokio::select! {
                report = queue.force_sync() => report,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, leaving remaining operations queued");
                    orchestrator.cancel_all();
                    SyncReport {
                        interrupted: true,
                        ..Default::default()
                    }
                }
            };
            println!(
                "passes: {}  attempted: {}  succeeded: {}  requeued: {}  failed: {}",
                report.passes, report.attempted, report.succeeded, report.requeued, report.failed
            );
        }
    }

    orchestrator.shutdown();
    Ok(())
}
