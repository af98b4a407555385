use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stages of one restore invocation, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    Start,
    SafetyBackup,
    Validate,
    RecordBaseline,
    ResolveChain,
    WriteBack,
    Verify,
    Done,
    Failed,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStage::Start => "START",
            RestoreStage::SafetyBackup => "SAFETY_BACKUP",
            RestoreStage::Validate => "VALIDATE",
            RestoreStage::RecordBaseline => "RECORD_BASELINE",
            RestoreStage::ResolveChain => "RESOLVE_CHAIN",
            RestoreStage::WriteBack => "WRITE_BACK",
            RestoreStage::Verify => "VERIFY",
            RestoreStage::Done => "DONE",
            RestoreStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Write counters for one restored table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRestoreResult {
    pub expected_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

/// A table that was not written back, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFailure {
    pub table: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Post-restore count below the tolerated share of the expected count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationWarning {
    pub table: String,
    pub expected: usize,
    pub actual: u64,
}

/// Audit record of one restore invocation, written on success and failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreLog {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub snapshot_id: String,
    pub safety_snapshot_id: Option<String>,
    pub safety_skipped: bool,
    pub max_workers: usize,
    pub stage: RestoreStage,
    /// Stage that was running when the restore failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<RestoreStage>,
    pub before_counts: BTreeMap<String, u64>,
    pub after_counts: BTreeMap<String, u64>,
    pub tables_restored: BTreeMap<String, TableRestoreResult>,
    pub tables_failed: Vec<TableFailure>,
    pub total_inserted: usize,
    pub total_updated: usize,
    pub total_errors: usize,
    pub validation_warnings: Vec<String>,
    pub verification_warnings: Vec<VerificationWarning>,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl RestoreLog {
    pub fn new(snapshot_id: &str, max_workers: usize, safety_skipped: bool) -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            snapshot_id: snapshot_id.to_string(),
            safety_snapshot_id: None,
            safety_skipped,
            max_workers,
            stage: RestoreStage::Start,
            failed_at: None,
            before_counts: BTreeMap::new(),
            after_counts: BTreeMap::new(),
            tables_restored: BTreeMap::new(),
            tables_failed: Vec::new(),
            total_inserted: 0,
            total_updated: 0,
            total_errors: 0,
            validation_warnings: Vec::new(),
            verification_warnings: Vec::new(),
            cancelled: false,
            error: None,
        }
    }

    pub fn record_failure(&mut self, table: &str, reason: &str, detail: Option<String>) {
        self.tables_failed.push(TableFailure {
            table: table.to_string(),
            reason: reason.to_string(),
            detail,
        });
    }

    /// Recompute totals from the per-table results
    pub fn tally_totals(&mut self) {
        self.total_inserted = self.tables_restored.values().map(|r| r.inserted).sum();
        self.total_updated = self.tables_restored.values().map(|r| r.updated).sum();
        self.total_errors = self.tables_restored.values().map(|r| r.errors).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_totals() {
        let mut log = RestoreLog::new("s1", 1, false);
        log.tables_restored.insert(
            "users".to_string(),
            TableRestoreResult {
                expected_rows: 3,
                inserted: 2,
                updated: 1,
                errors: 0,
                error_details: Vec::new(),
            },
        );
        log.tables_restored.insert(
            "orders".to_string(),
            TableRestoreResult {
                expected_rows: 2,
                inserted: 1,
                updated: 0,
                errors: 1,
                error_details: vec!["boom".to_string()],
            },
        );
        log.tally_totals();

        assert_eq!(log.total_inserted, 3);
        assert_eq!(log.total_updated, 1);
        assert_eq!(log.total_errors, 1);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let value = serde_json::to_value(RestoreStage::RecordBaseline).unwrap();
        assert_eq!(value, serde_json::json!("record_baseline"));
        assert_eq!(RestoreStage::RecordBaseline.to_string(), "RECORD_BASELINE");
    }
}
