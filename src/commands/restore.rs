//! Restore command implementation

use std::io::{self, BufRead, Write};

use anyhow::{Context as _, Result};
use remote_table_backup::constants::RESTORE_CONFIRMATION;
use remote_table_backup::models::{format_bytes, SnapshotListing};
use remote_table_backup::{Context, Lineage, RestoreOptions, RestoreOrchestrator, SafetyMode};

use super::common::print_restore_report;
use crate::cli::RestoreArgs;

/// Execute the restore command
pub async fn execute(args: &RestoreArgs, ctx: &Context) -> Result<()> {
    let snapshot = match (&args.snapshot, args.interactive) {
        (Some(snapshot), false) => snapshot.clone(),
        _ => {
            let listings = ctx
                .backups
                .list_detailed()
                .context("Failed to list backups")?;
            let stdin = io::stdin();
            match select_snapshot(&listings, &mut stdin.lock(), &mut io::stdout())? {
                Some(id) => id,
                None => {
                    println!("Restore cancelled");
                    return Ok(());
                }
            }
        }
    };

    let mut options = RestoreOptions::from_config(&ctx.config);
    options.show_progress = !args.no_progress;
    if args.unsafe_skip_safety {
        options.safety = SafetyMode::Unsafe;
    }
    if let Some(workers) = args.workers {
        options.concurrency = workers;
    }

    let report = RestoreOrchestrator::new(ctx)
        .restore(Lineage::Backups, &snapshot, &options)
        .await;
    print_restore_report(&report);
    report.into_result().context("Restore failed")?;
    Ok(())
}

/// Show the backup timeline, read a numbered choice and the confirmation
///
/// Returns `None` when the user quits or does not confirm.
fn select_snapshot(
    listings: &[SnapshotListing],
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<Option<String>> {
    if listings.is_empty() {
        anyhow::bail!("No backups available for restore");
    }

    writeln!(out, "{}", "=".repeat(80))?;
    writeln!(out, "AVAILABLE BACKUPS (Timeline)")?;
    writeln!(out, "{}", "=".repeat(80))?;
    writeln!(
        out,
        "{:<4} {:<20} {:<12} {:<12} {:<10} {:<12}",
        "#", "Date/Time", "Type", "Size", "Changed", "Rows"
    )?;
    writeln!(out, "{}", "-".repeat(80))?;
    for (index, listing) in listings.iter().enumerate() {
        writeln!(
            out,
            "{:<4} {:<20} {:<12} {:<12} {:<10} {:<12}",
            index + 1,
            listing.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            listing.kind.to_string().to_uppercase(),
            format_bytes(listing.size_bytes),
            listing.changed_count,
            listing.total_rows
        )?;
    }
    writeln!(out, "{}", "=".repeat(80))?;

    write!(out, "Select backup to restore (1-{}) or 'q' to quit: ", listings.len())?;
    out.flush()?;
    let choice = read_line(input)?;
    if choice.eq_ignore_ascii_case("q") {
        return Ok(None);
    }
    let index: usize = choice
        .parse()
        .with_context(|| format!("Invalid selection: {:?}", choice))?;
    let Some(selected) = index.checked_sub(1).and_then(|i| listings.get(i)) else {
        anyhow::bail!("Invalid selection: {}", index);
    };

    writeln!(out, "WARNING: restoring {} will overwrite existing data", selected.file_name)?;
    write!(out, "Type {} to continue: ", RESTORE_CONFIRMATION)?;
    out.flush()?;
    if read_line(input)? != RESTORE_CONFIRMATION {
        return Ok(None);
    }
    Ok(Some(selected.id.clone()))
}

fn read_line(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}
