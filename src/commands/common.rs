//! Shared setup and output helpers for commands

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use remote_table_backup::models::format_bytes;
use remote_table_backup::remote::HttpRemoteStore;
use remote_table_backup::store::SnapshotStore;
use remote_table_backup::{Config, Context, EngineError, RestoreReport};

use crate::cli::GlobalArgs;

/// Load configuration from the environment and apply global overrides
pub fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = Config::from_env().map_err(EngineError::Config)?;
    if let Some(root) = &global.root {
        config.root_dir = root.into();
    }
    if let Some(tables) = &global.tables {
        config.tables = tables
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if config.tables.is_empty() {
            anyhow::bail!("--tables lists no tables");
        }
    }
    Ok(config)
}

/// Build the engine context; Ctrl-C cancels in-flight runs
pub fn build_context(config: Config) -> Result<Context> {
    let remote = HttpRemoteStore::new(
        &config.remote_url,
        &config.remote_key,
        &config.id_column,
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("Failed to create remote store client")?;
    let ctx = Context::new(config, Arc::new(remote)).context("Failed to open backup directories")?;

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; no new work will be started");
            cancel.cancel();
        }
    });

    Ok(ctx)
}

/// Print a snapshot listing
pub fn print_listing(store: &SnapshotStore, label: &str) -> Result<()> {
    let listings = store
        .list_detailed()
        .with_context(|| format!("Failed to list {}", label))?;
    if listings.is_empty() {
        println!("No {} found in {}", label, store.dir().display());
        return Ok(());
    }

    println!("{} {} in {}:", listings.len(), label, store.dir().display());
    for listing in listings {
        println!(
            "  {}  {}  {:<11}  {:>10}  {:>3} changed  {:>8} rows",
            listing.file_name,
            listing.created_at.format("%Y-%m-%d %H:%M:%S"),
            listing.kind.to_string(),
            format_bytes(listing.size_bytes),
            listing.changed_count,
            listing.total_rows
        );
    }
    Ok(())
}

/// Print the outcome of a restore
pub fn print_restore_report(report: &RestoreReport) {
    let log = &report.log;
    println!("Restore of {}: {}", log.snapshot_id, log.stage);
    println!(
        "  {} inserted, {} updated, {} errors across {} tables",
        log.total_inserted,
        log.total_updated,
        log.total_errors,
        log.tables_restored.len()
    );
    for failure in &log.tables_failed {
        println!("  skipped {}: {}", failure.table, failure.reason);
    }
    for warning in &log.verification_warnings {
        println!(
            "  warning: {} has {} rows, expected {}",
            warning.table, warning.actual, warning.expected
        );
    }
    match &log.safety_snapshot_id {
        Some(id) => println!("  safety backup: {}", id),
        None => println!("  no safety backup was taken"),
    }
    if let Some(path) = &report.log_path {
        println!("  log: {}", path.display());
    }
}
