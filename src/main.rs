//! rtbackup - incremental backup and restore for a remote tabular store

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_table_backup::Config;

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{backup, common, list, restore, rollback};

/// Terminal output plus an append-only log file without colours
fn init_tracing(config: &Config) -> Result<()> {
    fs::create_dir_all(config.logs_dir())?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_file())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remote_table_backup=info,rtbackup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = common::load_config(&cli.global)?;
    init_tracing(&config)?;

    tracing::info!(
        "{} tables configured, backups under {:?}",
        config.tables.len(),
        config.root_dir
    );

    let ctx = common::build_context(config)?;

    match &cli.command {
        Commands::Backup(args) => backup::execute(args, &ctx).await,
        Commands::List => list::execute(&ctx).await,
        Commands::Restore(args) => restore::execute(args, &ctx).await,
        Commands::Rollback(args) => rollback::execute(args, &ctx).await,
        Commands::ListSafety => list::execute_safety(&ctx).await,
    }
}
