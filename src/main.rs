//! # Planloop — recurring-job scheduler host
//!
//! Loads the host configuration, builds the plan worker, registers the
//! static plan table, and runs until Ctrl-C.
//!
//! Usage:
//!   planloop                      # Run with ~/.planloop/config.toml
//!   planloop --interval 5         # Override the poll interval
//!   planloop --delay 10           # Delay the first tick by 10s

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use planloop_core::PlanloopConfig;
use planloop_scheduler::{Plan, PlanWorker, TimePlan};

#[derive(Parser)]
#[command(
    name = "planloop",
    version,
    about = "⏰ Planloop — recurring-job scheduler"
)]
struct Cli {
    /// Path to config file (default: ~/.planloop/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the poll interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Override the startup delay in seconds
    #[arg(long)]
    delay: Option<u64>,

    /// Seconds to wait for in-flight plans when stopping
    #[arg(long, default_value = "10")]
    grace: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PlanloopConfig::load_from(Path::new(path))?,
        None => PlanloopConfig::load()?,
    };
    if let Some(interval) = cli.interval {
        config.worker.interval = interval;
    }
    if let Some(delay) = cli.delay {
        config.worker.delay = delay;
    }

    // Initialize logging
    let filter = if cli.verbose {
        "planloop=debug".to_string()
    } else {
        config.log_filter.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let worker = Arc::new(PlanWorker::new(config.worker.clone()));

    if config.worker.auto_bind {
        register_builtin_plans(&worker).await?;
    }

    // Mirror worker notifications into the log.
    let mut events = worker.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!("📣 {event:?}");
        }
    });

    let runner = worker.clone();
    let run_handle = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, stopping worker...");
    if !worker.stop(Duration::from_secs(cli.grace)).await {
        tracing::warn!("⚠️ Worker did not stop within the grace period");
    }
    run_handle.await??;
    Ok(())
}

/// The static plan table — each entry is a (name, rule, callback)
/// triple handed to the worker. This replaces runtime discovery: adding
/// a job means adding a line here, checked at compile time.
async fn register_builtin_plans(worker: &PlanWorker) -> Result<()> {
    worker
        .append_plan(Plan::bare("startup-banner", TimePlan::startup(), || {
            tracing::info!("🗓️ Planloop is up");
            Ok(())
        }))
        .await?;

    worker
        .append_plan(Plan::bare("shutdown-banner", TimePlan::shutdown(), || {
            tracing::info!("👋 Planloop is going down");
            Ok(())
        }))
        .await?;

    // Daily heartbeat. The first slot lands one period past the anchor,
    // so anchoring a day back puts it a minute from now and a fresh run
    // shows a periodic fire without waiting a day.
    let anchor = Local::now().naive_local() + chrono::Duration::minutes(1) - chrono::Duration::days(1);
    let rule = TimePlan::every_days(anchor, 1)?;
    worker
        .append_plan(Plan::with_plan("heartbeat", rule, |plan| {
            tracing::info!(
                "💓 heartbeat — next slot {:?}",
                plan.rule().next_time()
            );
            Ok(())
        }))
        .await?;

    Ok(())
}
