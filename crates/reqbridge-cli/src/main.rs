use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqbridge_storage::TrackingStore;
use reqbridge_sync::{maybe_build_scheduler, run_sync_once_from_env, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "reqbridge")]
#[command(about = "Service desk request bridge command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one incremental sync now.
    Sync,
    /// Run the cron scheduler and sync on its schedule until interrupted.
    Schedule,
    /// Print a summary of the persisted tracking state.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} fetched={} created={} flagged={} skipped={} errored={}",
                summary.run_id,
                summary.fetched,
                summary.created,
                summary.flagged,
                summary.skipped,
                summary.errored
            );
        }
        Commands::Schedule => {
            let config = SyncConfig::from_env();
            let Some(mut sched) = maybe_build_scheduler(&config).await? else {
                anyhow::bail!(
                    "scheduler is disabled; set REQBRIDGE_SCHEDULER_ENABLED=1 to enable it"
                );
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running; waiting for shutdown signal");
            tokio::signal::ctrl_c().await.context("signal handler failed")?;
            info!("shutdown signal received");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Status => {
            let config = SyncConfig::from_env();
            let store = TrackingStore::new(config.tracking_file, config.tracking_epoch);
            let state = store.load().await?;
            println!("last_run_date={}", state.fetch_boundary());
            println!("tickets={}", state.email_to_issue.len());
            println!("handled_on_boundary={}", state.processed_emails_same_date.len());
            println!("flagged={}", state.flagged_requests.len());
            for (identity, reason) in &state.flagged_requests {
                println!("  {identity}: {reason}");
            }
        }
    }

    Ok(())
}
