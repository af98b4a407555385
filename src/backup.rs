//! Backup orchestration
//!
//! A run fetches every configured table, compares it with the nearest
//! materialized content reachable from the latest snapshot, and persists a
//! new snapshot that stores rows only for tables whose fingerprint moved.
//! Tables are independent: a failed fetch marks that table and the run goes on.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use crate::chain::{ChainResolver, Resolved};
use crate::config::Config;
use crate::detector::{self, ChangeReason};
use crate::error::{EngineError, Result};
use crate::fetcher::fetch_all_rows;
use crate::models::{BackupSummary, Row, Snapshot, SnapshotKind, SnapshotMetadata, TableEntry};
use crate::pool::{progress_bar, WorkerPool};
use crate::remote::RemoteStore;
use crate::store::{Lineage, PruneReport, SnapshotStore};
use crate::Context;

/// Parameters of one backup run
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub lineage: Lineage,
    pub tables: Vec<String>,
    /// Ignore the previous snapshot and materialize every table
    pub force_full: bool,
    pub concurrency: usize,
    pub compress: bool,
    pub show_progress: bool,
    pub purpose: Option<String>,
}

impl BackupRequest {
    pub fn regular(config: &Config) -> Self {
        Self {
            lineage: Lineage::Backups,
            tables: config.tables.clone(),
            force_full: false,
            concurrency: config.backup_workers,
            compress: config.compress,
            show_progress: false,
            purpose: None,
        }
    }

    /// Forced-full snapshot into the safety lineage
    pub fn safety(config: &Config, purpose: &str) -> Self {
        Self {
            lineage: Lineage::Safety,
            tables: config.tables.clone(),
            force_full: true,
            concurrency: config.backup_workers,
            compress: true,
            show_progress: false,
            purpose: Some(purpose.to_string()),
        }
    }

    /// Add tables not yet covered, keeping the configured order first
    pub fn covering<'t>(mut self, tables: impl IntoIterator<Item = &'t String>) -> Self {
        for table in tables {
            if !self.tables.contains(table) {
                self.tables.push(table.clone());
            }
        }
        self
    }
}

#[derive(Debug)]
pub struct BackupReport {
    pub snapshot: Snapshot,
    pub path: PathBuf,
    /// Written for the regular lineage only
    pub summary: Option<BackupSummary>,
    pub prune: PruneReport,
    pub elapsed: Duration,
}

impl BackupReport {
    pub fn id(&self) -> &str {
        self.snapshot.id()
    }

    pub fn failed_tables(&self) -> &[String] {
        &self.snapshot.metadata.failed_tables
    }

    pub fn is_complete(&self) -> bool {
        self.failed_tables().is_empty()
    }
}

/// Per-run aggregates; one mutex guards these and the progress bar
#[derive(Default)]
struct Tally {
    entries: BTreeMap<String, TableEntry>,
    total_rows: usize,
    stored_rows: usize,
    successful: usize,
    failed: Vec<String>,
    changed: Vec<String>,
    unchanged: Vec<String>,
    progress: Option<ProgressBar>,
}

impl Tally {
    fn record(&mut self, table: String, entry: TableEntry, fetched_rows: usize) {
        match &entry {
            TableEntry::Materialized(rows) => {
                self.successful += 1;
                self.total_rows += fetched_rows;
                self.stored_rows += rows.len();
                self.changed.push(table.clone());
            }
            TableEntry::Unchanged { .. } => {
                self.successful += 1;
                self.total_rows += fetched_rows;
                self.unchanged.push(table.clone());
            }
            TableEntry::Failed { .. } => self.failed.push(table.clone()),
        }
        if let Some(pb) = &self.progress {
            pb.inc(1);
            pb.set_message(table.clone());
        }
        self.entries.insert(table, entry);
    }
}

fn lock(tally: &Mutex<Tally>) -> MutexGuard<'_, Tally> {
    tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct BackupOrchestrator<'a> {
    ctx: &'a Context,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Run one backup and persist its snapshot
    ///
    /// Returns `EngineError::Cancelled` without writing anything if the
    /// context's token fires before every table was dispatched.
    pub async fn run(&self, request: &BackupRequest) -> Result<BackupReport> {
        let started = Instant::now();
        let store = self
            .ctx
            .store(request.lineage)
            .with_compression(request.compress);
        let tables = request.tables.clone();

        let reference = if request.force_full || request.lineage == Lineage::Safety {
            None
        } else {
            let latest = store.clone();
            tokio::task::spawn_blocking(move || latest.latest())
                .await??
                .map(Arc::new)
        };

        let baselines = match &reference {
            Some(reference) => {
                tracing::info!(
                    "Starting incremental backup of {} tables against {}",
                    tables.len(),
                    reference.id()
                );
                resolve_baselines(&store, Arc::clone(reference), tables.clone()).await?
            }
            None => {
                tracing::info!("Starting full backup of {} tables", tables.len());
                HashMap::new()
            }
        };

        let (id, created_at) = store.next_id();
        let pool = WorkerPool::new(request.concurrency, self.ctx.cancel.clone());
        let tally = Mutex::new(Tally {
            progress: progress_bar(tables.len(), request.show_progress),
            ..Tally::default()
        });

        let remote = self.ctx.remote.as_ref();
        let page_size = self.ctx.config.page_size;
        let id_column = self.ctx.config.id_column.as_str();
        let reference_id = reference.as_ref().map(|r| r.id());
        let baselines = &baselines;
        let shared = &tally;

        let outcome = pool
            .run(tables.clone(), |table: String| async move {
                let baseline = baselines.get(&table).map(Vec::as_slice);
                let (entry, fetched) =
                    backup_table(remote, &table, page_size, id_column, baseline, reference_id)
                        .await;
                lock(shared).record(table, entry, fetched);
            })
            .await;

        let mut tally = tally.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pb) = tally.progress.take() {
            pb.finish_and_clear();
        }
        if outcome.cancelled() {
            tracing::warn!(
                "Backup cancelled with {} table(s) not processed; nothing was saved",
                outcome.not_dispatched
            );
            return Err(EngineError::Cancelled);
        }

        tally.failed.sort();
        tally.changed.sort();
        tally.unchanged.sort();

        let kind = match (request.lineage, &reference) {
            (Lineage::Safety, _) => SnapshotKind::Safety,
            (Lineage::Backups, Some(_)) => SnapshotKind::Incremental,
            (Lineage::Backups, None) => SnapshotKind::Full,
        };
        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                id,
                created_at,
                kind,
                previous_snapshot_id: reference.as_ref().map(|r| r.id().to_string()),
                total_tables: tables.len(),
                tables,
                purpose: request.purpose.clone(),
                total_rows: tally.total_rows,
                stored_rows: tally.stored_rows,
                successful_tables: tally.successful,
                failed_tables: tally.failed,
                changed_tables: tally.changed,
                unchanged_tables: tally.unchanged,
                compressed: store.compresses(),
                max_workers: pool.concurrency(),
            },
            data: tally.entries,
        };

        let report = self.persist(store, snapshot, started).await?;
        log_summary(&report);
        Ok(report)
    }

    async fn persist(&self, store: SnapshotStore, snapshot: Snapshot, started: Instant) -> Result<BackupReport> {
        let summaries = self.ctx.summaries.clone();
        let keep = self.ctx.config.keep_count;

        let (snapshot, path, summary, prune) = tokio::task::spawn_blocking(
            move || -> Result<(Snapshot, PathBuf, Option<BackupSummary>, PruneReport)> {
                let path = store.save(&snapshot)?;
                if store.lineage() == Lineage::Safety {
                    return Ok((snapshot, path, None, PruneReport::default()));
                }

                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                let summary = BackupSummary::from_metadata(&snapshot.metadata, &file_name, size);
                if let Err(e) = summaries.write_backup_summary(snapshot.id(), &summary) {
                    tracing::warn!("Error writing summary for {}: {}", snapshot.id(), e);
                }

                let prune = match store.prune(keep) {
                    Ok(prune) => prune,
                    Err(e) => {
                        tracing::warn!("Error pruning old snapshots: {}", e);
                        PruneReport::default()
                    }
                };
                for deleted in &prune.deleted {
                    summaries.remove_backup_summary(deleted);
                }
                Ok((snapshot, path, Some(summary), prune))
            },
        )
        .await??;

        Ok(BackupReport {
            snapshot,
            path,
            summary,
            prune,
            elapsed: started.elapsed(),
        })
    }
}

/// Comparison rows per table: the nearest materialized ancestor content
///
/// Tables whose chain ends in a failed entry or cannot be resolved get no
/// baseline and are backed up in full.
async fn resolve_baselines(
    store: &SnapshotStore,
    reference: Arc<Snapshot>,
    tables: Vec<String>,
) -> Result<HashMap<String, Vec<Row>>> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || -> Result<HashMap<String, Vec<Row>>> {
        let mut resolver = ChainResolver::new(store)?;
        let mut baselines = HashMap::new();
        for table in tables {
            if reference.entry(&table).is_none() {
                continue;
            }
            match resolver.resolve(&reference, &table) {
                Ok(Resolved::Rows { rows, .. }) => {
                    baselines.insert(table, rows);
                }
                Ok(Resolved::Failed { origin, .. }) => {
                    tracing::info!("{}: previous backup {} failed, taking it in full", table, origin);
                }
                Err(e) => tracing::warn!("{}: no usable baseline, taking it in full: {}", table, e),
            }
        }
        Ok(baselines)
    })
    .await?
}

async fn backup_table(
    remote: &dyn RemoteStore,
    table: &str,
    page_size: usize,
    id_column: &str,
    baseline: Option<&[Row]>,
    reference_id: Option<&str>,
) -> (TableEntry, usize) {
    let rows = match fetch_all_rows(remote, table, page_size).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("Error backing up table {}: {}", table, e);
            return (
                TableEntry::Failed {
                    error_message: e.to_string(),
                },
                0,
            );
        }
    };

    let fetched = rows.len();
    let classification = detector::classify(&rows, baseline, id_column);
    match (classification.changed, reference_id) {
        (false, Some(reference)) => {
            tracing::info!("{}: unchanged ({} rows)", table, fetched);
            (
                TableEntry::Unchanged {
                    reference_snapshot_id: reference.to_string(),
                    content_hash: classification.hash,
                },
                fetched,
            )
        }
        _ => {
            if classification.reason == Some(ChangeReason::ContentDiffers) {
                tracing::info!(
                    "{}: changed, {} rows (+{} -{})",
                    table,
                    fetched,
                    classification.added_count.unwrap_or(0),
                    classification.removed_count.unwrap_or(0)
                );
            } else {
                tracing::info!("{}: {} rows", table, fetched);
            }
            (TableEntry::Materialized(rows), fetched)
        }
    }
}

fn log_summary(report: &BackupReport) {
    let metadata = &report.snapshot.metadata;
    tracing::info!(
        "Backup {} ({}) completed in {:.1}s: {:?}",
        metadata.id,
        metadata.kind,
        report.elapsed.as_secs_f64(),
        report.path
    );
    tracing::info!(
        "Tables: {} successful, {} failed, {} changed, {} unchanged",
        metadata.successful_tables,
        metadata.failed_tables.len(),
        metadata.changed_count(),
        metadata.unchanged_count()
    );
    tracing::info!(
        "Rows: {} fetched, {} stored",
        metadata.total_rows,
        metadata.stored_rows
    );
    if !metadata.failed_tables.is_empty() {
        tracing::warn!("Failed tables: {}", metadata.failed_tables.join(", "));
    }
}
