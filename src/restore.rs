//! Restore orchestration and rollback
//!
//! A restore walks a fixed sequence of stages:
//! START, SAFETY_BACKUP, VALIDATE, RECORD_BASELINE, RESOLVE_CHAIN,
//! WRITE_BACK, VERIFY and DONE, with FAILED reachable from any of them.
//! Nothing is written to the remote store before the safety snapshot exists
//! (unless the caller opted out) and the snapshot document validated. A
//! restore log is written on every exit path once the restore has started.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use indicatif::ProgressBar;
use serde_json::Value;

use crate::backup::{BackupOrchestrator, BackupRequest};
use crate::chain::{ChainResolver, Resolved};
use crate::config::Config;
use crate::constants::{
    MAX_ERROR_DETAILS_PER_BATCH, MAX_ERROR_DETAIL_CHARS, PURPOSE_PRE_RESTORE, PURPOSE_PRE_ROLLBACK,
    ROLLBACK_CONFIRMATION,
};
use crate::error::{EngineError, Result};
use crate::models::{RestoreLog, RestoreStage, Row, Snapshot, TableRestoreResult, VerificationWarning};
use crate::pool::{progress_bar, WorkerPool};
use crate::remote::{RemoteStore, WriteOutcome};
use crate::store::Lineage;
use crate::validation::validate_document;
use crate::Context;

/// Whether a restore must first capture a rollback point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyMode {
    Required,
    /// Skip the safety snapshot; the restore cannot be rolled back
    Unsafe,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub safety: SafetyMode,
    /// Batch writes in flight; 1 writes sequentially
    pub concurrency: usize,
    pub show_progress: bool,
}

impl RestoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            safety: SafetyMode::Required,
            concurrency: config.restore_workers,
            show_progress: false,
        }
    }
}

/// Outcome of one restore: the log is always present, even on failure
#[derive(Debug)]
pub struct RestoreReport {
    pub log: RestoreLog,
    pub log_path: Option<PathBuf>,
    pub error: Option<EngineError>,
}

impl RestoreReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<RestoreLog> {
        match self.error {
            None => Ok(self.log),
            Some(e) => Err(e),
        }
    }
}

#[derive(Debug)]
pub struct RollbackReport {
    pub pre_rollback_snapshot_id: String,
    pub restore: RestoreReport,
}

impl RollbackReport {
    pub fn succeeded(&self) -> bool {
        self.restore.succeeded()
    }
}

/// One unit of write-back work
struct Batch {
    table: String,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct BatchResult {
    inserted: usize,
    updated: usize,
    errors: usize,
    error_details: Vec<String>,
}

impl BatchResult {
    fn error(&mut self, message: &str) {
        self.errors += 1;
        if self.error_details.len() < MAX_ERROR_DETAILS_PER_BATCH {
            self.error_details
                .push(message.chars().take(MAX_ERROR_DETAIL_CHARS).collect());
        }
    }
}

/// Per-table write counters and the progress bar, under one mutex
#[derive(Default)]
struct WriteTally {
    results: BTreeMap<String, TableRestoreResult>,
    progress: Option<ProgressBar>,
}

impl WriteTally {
    fn merge(&mut self, table: &str, batch: BatchResult) {
        let result = self.results.entry(table.to_string()).or_default();
        result.inserted += batch.inserted;
        result.updated += batch.updated;
        result.errors += batch.errors;
        result.error_details.extend(batch.error_details);
        if let Some(pb) = &self.progress {
            pb.inc(1);
            pb.set_message(table.to_string());
        }
    }
}

fn lock(tally: &Mutex<WriteTally>) -> MutexGuard<'_, WriteTally> {
    tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn safety_error(e: EngineError) -> EngineError {
    match e {
        EngineError::Cancelled => EngineError::Cancelled,
        other => EngineError::SafetyBackupFailure(other.to_string()),
    }
}

pub struct RestoreOrchestrator<'a> {
    ctx: &'a Context,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Restore a snapshot of `lineage`, given by id or file name
    pub async fn restore(&self, lineage: Lineage, reference: &str, options: &RestoreOptions) -> RestoreReport {
        self.restore_with(lineage, reference, options, None).await
    }

    /// Roll the store back to a safety snapshot
    ///
    /// `confirmation` must be the literal `ROLLBACK`. The current state is
    /// captured as a fresh safety snapshot first; the restore itself then
    /// runs without taking another one.
    pub async fn rollback(
        &self,
        safety_reference: &str,
        confirmation: &str,
        options: &RestoreOptions,
    ) -> Result<RollbackReport> {
        if confirmation != ROLLBACK_CONFIRMATION {
            tracing::warn!("Rollback cancelled: confirmation not given");
            return Err(EngineError::RollbackNotConfirmed);
        }
        let target = self.ctx.safety.resolve_id(safety_reference)?;
        tracing::info!("Rolling back to safety snapshot {}", target);

        let covering = {
            let store = self.ctx.safety.clone();
            let id = target.clone();
            let document = tokio::task::spawn_blocking(move || store.load_document(&id)).await??;
            document_tables(&document)
        };
        let pre_rollback = self
            .safety_snapshot(PURPOSE_PRE_ROLLBACK, &covering, options.show_progress)
            .await?;
        tracing::info!("Pre-rollback safety snapshot created: {}", pre_rollback);

        let options = RestoreOptions {
            safety: SafetyMode::Unsafe,
            ..options.clone()
        };
        let restore = self
            .restore_with(
                Lineage::Safety,
                &target,
                &options,
                Some(pre_rollback.clone()),
            )
            .await;

        Ok(RollbackReport {
            pre_rollback_snapshot_id: pre_rollback,
            restore,
        })
    }

    async fn restore_with(
        &self,
        lineage: Lineage,
        reference: &str,
        options: &RestoreOptions,
        prior_safety: Option<String>,
    ) -> RestoreReport {
        let concurrency = options.concurrency.max(1);
        let mut log = RestoreLog::new(reference, concurrency, options.safety == SafetyMode::Unsafe);
        log.safety_snapshot_id = prior_safety;

        let result = self.execute(lineage, reference, options, &mut log).await;
        log.completed_at = Some(Utc::now());
        let error = match result {
            Ok(()) => {
                log.stage = RestoreStage::Done;
                tracing::info!(
                    "Restore of {} completed: {} inserted, {} updated, {} errors",
                    log.snapshot_id,
                    log.total_inserted,
                    log.total_updated,
                    log.total_errors
                );
                None
            }
            Err(e) => {
                tracing::error!("Restore of {} failed during {}: {}", log.snapshot_id, log.stage, e);
                log.failed_at = Some(log.stage);
                log.stage = RestoreStage::Failed;
                log.cancelled = matches!(e, EngineError::Cancelled);
                log.error = Some(e.to_string());
                Some(e)
            }
        };
        if let Some(safety) = &log.safety_snapshot_id {
            tracing::info!("Safety snapshot for rollback: {}", safety);
        }

        let summaries = self.ctx.summaries.clone();
        let written = log.clone();
        let log_path = match tokio::task::spawn_blocking(move || summaries.write_restore_log(&written)).await {
            Ok(Ok(path)) => {
                tracing::info!("Restore log written to {:?}", path);
                Some(path)
            }
            Ok(Err(e)) => {
                tracing::error!("Error writing restore log: {}", e);
                None
            }
            Err(e) => {
                tracing::error!("Error writing restore log: {}", e);
                None
            }
        };

        RestoreReport { log, log_path, error }
    }

    fn enter(&self, log: &mut RestoreLog, stage: RestoreStage) -> Result<()> {
        if self.ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        log.stage = stage;
        tracing::info!("Restore stage {}", stage);
        Ok(())
    }

    async fn execute(
        &self,
        lineage: Lineage,
        reference: &str,
        options: &RestoreOptions,
        log: &mut RestoreLog,
    ) -> Result<()> {
        let config = &self.ctx.config;
        let store = self.ctx.store(lineage).clone();

        self.enter(log, RestoreStage::Start)?;
        let snapshot_id = store.resolve_id(reference)?;
        log.snapshot_id = snapshot_id.clone();

        let document = {
            let store = store.clone();
            let id = snapshot_id.clone();
            tokio::task::spawn_blocking(move || store.load_document(&id)).await??
        };

        self.enter(log, RestoreStage::SafetyBackup)?;
        match options.safety {
            SafetyMode::Required => {
                let safety = self
                    .safety_snapshot(PURPOSE_PRE_RESTORE, &document_tables(&document), options.show_progress)
                    .await?;
                tracing::info!("Safety backup created: {}", safety);
                log.safety_snapshot_id = Some(safety);
            }
            SafetyMode::Unsafe => {
                if log.safety_snapshot_id.is_none() {
                    tracing::warn!("Safety backup skipped; this restore cannot be rolled back");
                }
            }
        }

        self.enter(log, RestoreStage::Validate)?;
        let warnings = validate_document(&document, config).into_result()?;
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }
        log.validation_warnings = warnings;
        let snapshot: Snapshot = serde_json::from_value(document)?;
        let tables: Vec<String> = snapshot.data.keys().cloned().collect();

        self.enter(log, RestoreStage::RecordBaseline)?;
        for table in &tables {
            let count = self.count_or_zero(table).await;
            log.before_counts.insert(table.clone(), count);
        }

        self.enter(log, RestoreStage::ResolveChain)?;
        let resolved = {
            let store = store.clone();
            let tables = tables.clone();
            tokio::task::spawn_blocking(move || -> Result<BTreeMap<String, Result<Resolved>>> {
                let mut resolver = ChainResolver::new(store)?;
                Ok(resolver.resolve_all(&snapshot, &tables))
            })
            .await??
        };

        let mut plan: Vec<(String, Vec<Row>)> = Vec::new();
        for (table, resolution) in resolved {
            match resolution {
                Ok(Resolved::Rows { origin, rows }) => {
                    if origin != snapshot_id {
                        tracing::info!("{}: {} rows resolved from {}", table, rows.len(), origin);
                    }
                    plan.push((table, rows));
                }
                Ok(Resolved::Failed { origin, message }) => {
                    tracing::error!("Skipping {}: backup {} failed for it: {}", table, origin, message);
                    log.record_failure(&table, "backup_failed", Some(format!("{}: {}", origin, message)));
                }
                Err(e) => {
                    tracing::error!("Skipping {}: {}", table, e);
                    log.record_failure(&table, e.reason(), Some(e.to_string()));
                }
            }
        }

        self.enter(log, RestoreStage::WriteBack)?;
        let mut results: BTreeMap<String, TableRestoreResult> = BTreeMap::new();
        let mut batches: Vec<Batch> = Vec::new();
        for (table, rows) in plan {
            let rows = strip_columns(rows, config.excluded_columns_for(&table));
            results.insert(
                table.clone(),
                TableRestoreResult {
                    expected_rows: rows.len(),
                    ..TableRestoreResult::default()
                },
            );
            for chunk in rows.chunks(config.batch_size.max(1)) {
                batches.push(Batch {
                    table: table.clone(),
                    rows: chunk.to_vec(),
                });
            }
        }
        let pool = WorkerPool::new(options.concurrency, self.ctx.cancel.clone());
        tracing::info!(
            "Writing {} tables in {} batches with {} worker(s)",
            results.len(),
            batches.len(),
            pool.concurrency()
        );

        let tally = Mutex::new(WriteTally {
            results,
            progress: progress_bar(batches.len(), options.show_progress),
        });
        let remote = self.ctx.remote.as_ref();
        let id_column = config.id_column.as_str();
        let shared = &tally;

        let outcome = pool
            .run(batches, |batch: Batch| async move {
                let result = write_batch(remote, &batch.table, id_column, &batch.rows).await;
                lock(shared).merge(&batch.table, result);
            })
            .await;

        let mut tally = tally.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pb) = tally.progress.take() {
            pb.finish_and_clear();
        }
        log.tables_restored = tally.results;
        log.tally_totals();
        for (table, result) in &log.tables_restored {
            if result.errors > 0 {
                tracing::warn!("{}: {} row(s) could not be written", table, result.errors);
            }
        }
        if outcome.cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.enter(log, RestoreStage::Verify)?;
        let tolerance = config.verify_tolerance;
        let expected: Vec<(String, usize)> = log
            .tables_restored
            .iter()
            .map(|(table, result)| (table.clone(), result.expected_rows))
            .collect();
        for (table, expected_rows) in expected {
            let actual = self.count_or_zero(&table).await;
            log.after_counts.insert(table.clone(), actual);
            if (actual as f64) < tolerance * expected_rows as f64 {
                tracing::warn!(
                    "{}: {} rows after restore, expected {}",
                    table,
                    actual,
                    expected_rows
                );
                log.verification_warnings.push(VerificationWarning {
                    table,
                    expected: expected_rows,
                    actual,
                });
            }
        }

        Ok(())
    }

    /// Take a complete safety snapshot of the configured tables plus `covering`
    ///
    /// A snapshot with any failed table is not a usable rollback point and
    /// is deleted before the failure is returned.
    async fn safety_snapshot(&self, purpose: &str, covering: &[String], show_progress: bool) -> Result<String> {
        let mut request = BackupRequest::safety(&self.ctx.config, purpose).covering(covering);
        request.show_progress = show_progress;
        let safety = BackupOrchestrator::new(self.ctx)
            .run(&request)
            .await
            .map_err(safety_error)?;
        if safety.is_complete() {
            return Ok(safety.id().to_string());
        }

        let store = self.ctx.safety.clone();
        let id = safety.id().to_string();
        match tokio::task::spawn_blocking(move || store.remove(&id)).await {
            Ok(Ok(_)) => tracing::warn!("Removed incomplete safety snapshot {}", safety.id()),
            Ok(Err(e)) => tracing::error!("Error removing incomplete safety snapshot {}: {}", safety.id(), e),
            Err(e) => tracing::error!("Error removing incomplete safety snapshot {}: {}", safety.id(), e),
        }
        Err(EngineError::SafetyBackupFailure(format!(
            "tables failed: {}",
            safety.failed_tables().join(", ")
        )))
    }

    async fn count_or_zero(&self, table: &str) -> u64 {
        match self.ctx.remote.count_rows(table).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Could not count rows of {}: {}", table, e);
                0
            }
        }
    }
}

/// Tables a snapshot document covers: its metadata list, then any extra data keys
fn document_tables(document: &Value) -> Vec<String> {
    let mut tables: Vec<String> = document
        .pointer("/metadata/tables")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(|name| name.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if let Some(data) = document.get("data").and_then(Value::as_object) {
        for table in data.keys() {
            if !tables.contains(table) {
                tables.push(table.clone());
            }
        }
    }
    tables
}

/// Drop columns that must never be written
fn strip_columns(rows: Vec<Row>, excluded: &[String]) -> Vec<Row> {
    if excluded.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|mut row| {
            for column in excluded {
                row.remove(column);
            }
            row
        })
        .collect()
}

/// Write one batch, escalating bulk upsert, then per-row upsert, then update
async fn write_batch(remote: &dyn RemoteStore, table: &str, id_column: &str, rows: &[Row]) -> BatchResult {
    let mut result = BatchResult::default();

    match remote.upsert_batch(table, rows).await {
        WriteOutcome::Ok => {
            result.inserted = rows.len();
            return result;
        }
        failure => tracing::debug!(
            "Bulk upsert of {} rows into {} failed, retrying row by row: {}",
            rows.len(),
            table,
            failure.message().unwrap_or_default()
        ),
    }

    for row in rows {
        match remote.upsert_batch(table, std::slice::from_ref(row)).await {
            WriteOutcome::Ok => result.inserted += 1,
            WriteOutcome::DuplicateKey(message) => {
                match row.get(id_column).filter(|id| !id.is_null()) {
                    Some(id) => match remote.update_row(table, id_column, id, row).await {
                        WriteOutcome::Ok => result.updated += 1,
                        failure => result.error(failure.message().unwrap_or_default()),
                    },
                    None => result.error(&format!(
                        "duplicate key on a row without {}: {}",
                        id_column, message
                    )),
                }
            }
            WriteOutcome::GeneratedColumnConflict(message) | WriteOutcome::Other(message) => {
                result.error(&message)
            }
        }
    }

    result
}
