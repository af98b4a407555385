//! Backup command implementation

use anyhow::{Context as _, Result};
use remote_table_backup::models::format_bytes;
use remote_table_backup::{BackupOrchestrator, BackupRequest, Context};

use crate::cli::BackupArgs;

/// Execute the backup command
pub async fn execute(args: &BackupArgs, ctx: &Context) -> Result<()> {
    let mut request = BackupRequest::regular(&ctx.config);
    request.force_full = args.force_full;
    request.compress = ctx.config.compress && !args.no_compress;
    request.show_progress = !args.no_progress;
    if let Some(workers) = args.workers {
        request.concurrency = workers;
    }

    let report = BackupOrchestrator::new(ctx)
        .run(&request)
        .await
        .context("Backup failed")?;

    let metadata = &report.snapshot.metadata;
    println!("Backup {} ({})", metadata.id, metadata.kind);
    println!("  file: {}", report.path.display());
    if let Some(summary) = &report.summary {
        println!("  size: {}", format_bytes(summary.file_size_bytes));
    }
    println!(
        "  tables: {} successful, {} failed, {} changed, {} unchanged",
        metadata.successful_tables,
        metadata.failed_tables.len(),
        metadata.changed_count(),
        metadata.unchanged_count()
    );
    println!("  rows: {} ({} stored)", metadata.total_rows, metadata.stored_rows);
    if !report.prune.deleted.is_empty() {
        println!("  pruned {} old backup(s)", report.prune.deleted.len());
    }

    if !report.is_complete() {
        anyhow::bail!(
            "{} table(s) failed: {}",
            report.failed_tables().len(),
            report.failed_tables().join(", ")
        );
    }
    Ok(())
}
