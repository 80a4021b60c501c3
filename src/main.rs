// src/main.rs

//! stockwatch: multi-signal stock monitor CLI.
//!
//! Subcommands: `run` (the monitor daemon), `check` (one-shot diagnostic
//! poll), `prune` (history retention pass), `config` (dump the effective
//! configuration).
//!
//! Exit codes: 0 success, 1 invalid configuration, 2 migration failure,
//! 3 fatal runtime error, 130 cancelled.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};

use stockwatch::config::load_required;
use stockwatch::detect::DetectorSet;
use stockwatch::error::{AppError, Result};
use stockwatch::fetch::{Fetcher, PageSource};
use stockwatch::models::Config;
use stockwatch::notify::{LogSink, NotificationAggregator, Sink};
use stockwatch::scheduler::{PollContext, Scheduler, TransitionEvaluator};
use stockwatch::store::Store;

#[derive(Parser, Debug)]
#[command(
    name = "stockwatch",
    version = "1.0.0",
    about = "Multi-signal stock monitor for VPS sale pages"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "stockwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor daemon
    Run,
    /// Poll a single item once and print the detector breakdown
    Check {
        item_id: i64,
    },
    /// Delete history beyond the retention window
    Prune,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_required(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    stockwatch::logging::init(&config.logging.level, config.logging.json);

    let result = match cli.command {
        Command::Run => run_monitor(&config).await,
        Command::Check { item_id } => run_check(&config, item_id).await,
        Command::Prune => run_prune(&config).await,
        Command::Config => {
            println!("{config:#?}");
            Ok(false)
        }
    };

    match result {
        Ok(cancelled) => {
            if cancelled {
                ExitCode::from(130)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) if e.is_migration_failure() => {
            eprintln!("migration error: {e}");
            ExitCode::from(2)
        }
        Err(e @ AppError::Config(_)) => {
            eprintln!("configuration error: {e}");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::from(3)
        }
    }
}

async fn open_store(config: &Config) -> Result<Store> {
    Store::open(Path::new(&config.storage.db_path)).await
}

/// Run the daemon: scheduler, aggregator, shutdown plumbing.
///
/// Returns `true` when stopped by ctrl-c.
async fn run_monitor(config: &Config) -> Result<bool> {
    let store = open_store(config).await?;
    let fetcher: Arc<dyn PageSource> = Arc::new(Fetcher::new(&config.fetcher)?);
    let sink: Arc<dyn Sink> = Arc::new(LogSink);

    let ctx = PollContext {
        store: store.clone(),
        source: Arc::clone(&fetcher),
        detectors: DetectorSet::new(config.detectors.clone()),
        evaluator: TransitionEvaluator::new(config.detectors.confidence_threshold),
        config: config.clone(),
    };

    let (events_tx, events_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let aggregator = NotificationAggregator::new(
        store.clone(),
        Arc::clone(&sink),
        config.notifier.clone(),
    );
    let aggregator_handle = tokio::spawn(aggregator.run(events_rx, shutdown_rx.clone()));

    // Startup summary to the admins, the way a restart announces itself.
    let enabled = store
        .list_due_items(Utc::now(), std::time::Duration::from_secs(0))
        .await?;
    tracing::info!(items = enabled.len(), "startup check: all enabled items are due");
    for admin in &config.notifier.admin_ids {
        let _ = sink
            .send_text(
                admin,
                &format!("stockwatch started; monitoring {} item(s)", enabled.len()),
            )
            .await;
    }

    let scheduler = Scheduler::new(ctx, events_tx);
    let scheduler_handle = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    scheduler_handle
        .await
        .map_err(|e| AppError::validation(format!("scheduler task panicked: {e}")))??;
    aggregator_handle.abort();
    fetcher.shutdown().await;
    Ok(true)
}

/// One-shot diagnostic poll of a single item.
async fn run_check(config: &Config, item_id: i64) -> Result<bool> {
    let store = open_store(config).await?;
    let item = store
        .get_item(item_id)
        .await?
        .ok_or(AppError::NotFound(item_id))?;

    println!("Checking {} ({})", item.name, item.url);

    let fetcher = Arc::new(Fetcher::new(&config.fetcher)?);
    let ctx = PollContext {
        store: store.clone(),
        source: fetcher.clone(),
        detectors: DetectorSet::new(config.detectors.clone()),
        evaluator: TransitionEvaluator::new(config.detectors.confidence_threshold),
        config: config.clone(),
    };

    let fetch = Fetcher::fetch(&fetcher, &item.url).await;
    println!(
        "HTTP {} in {} ms",
        fetch
            .http_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "—".to_string()),
        fetch.latency_ms
    );

    let summary = ctx.poll_item(&item, fetch, None).await?;
    for record in &summary.detectors {
        println!(
            "  {:<12} {:<12} {:.2}  {}",
            record.name,
            record.verdict.as_str(),
            record.confidence,
            record.evidence
        );
    }
    println!(
        "fused: {} (confidence {:.2})",
        summary.status.as_str(),
        summary.confidence
    );
    if let Some(kind) = summary.error_kind {
        println!("fetch error: {}", kind.as_str());
    }

    let stats = store.daily_stats(7).await?;
    if !stats.is_empty() {
        println!("\nLast 7 days:");
        for day in stats {
            println!("  {}  {} checks, {} errors", day.date, day.checks, day.errors);
        }
    }

    fetcher.close().await;
    Ok(false)
}

/// Force a retention pass over check history and the ledger.
async fn run_prune(config: &Config) -> Result<bool> {
    let store = open_store(config).await?;
    let cutoff = Utc::now() - Duration::days(config.storage.history_retention_days);

    let mut total = 0usize;
    loop {
        let deleted = store
            .prune_history(
                cutoff,
                config.storage.history_keep_per_item,
                config.storage.prune_batch,
            )
            .await?;
        total += deleted;
        if deleted == 0 {
            break;
        }
    }
    let ledger_deleted = store.prune_ledger(cutoff).await?;
    println!("pruned {total} history rows, {ledger_deleted} ledger rows");
    Ok(false)
}
