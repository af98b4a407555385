//! Rollback command implementation

use std::io::{self, BufRead, Write};

use anyhow::{Context as _, Result};
use remote_table_backup::constants::ROLLBACK_CONFIRMATION;
use remote_table_backup::{Context, RestoreOptions, RestoreOrchestrator};

use super::common::print_restore_report;
use crate::cli::RollbackArgs;

/// Execute the rollback command
pub async fn execute(args: &RollbackArgs, ctx: &Context) -> Result<()> {
    let confirmation = match &args.confirm {
        Some(token) => token.clone(),
        None => prompt(&args.snapshot)?,
    };

    let mut options = RestoreOptions::from_config(&ctx.config);
    options.show_progress = !args.no_progress;
    if let Some(workers) = args.workers {
        options.concurrency = workers;
    }

    let report = RestoreOrchestrator::new(ctx)
        .rollback(&args.snapshot, &confirmation, &options)
        .await
        .context("Rollback failed")?;

    println!("Pre-rollback safety backup: {}", report.pre_rollback_snapshot_id);
    print_restore_report(&report.restore);
    report.restore.into_result().context("Rollback failed")?;
    Ok(())
}

fn prompt(snapshot: &str) -> Result<String> {
    println!("This overwrites the remote store with safety backup {}.", snapshot);
    print!("Type {} to continue: ", ROLLBACK_CONFIRMATION);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
