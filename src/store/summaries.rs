use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{BACKUP_SUMMARY_PREFIX, RESTORE_LOG_PREFIX, SNAPSHOT_ID_FORMAT};
use crate::error::Result;
use crate::models::{BackupSummary, RestoreLog};

use super::codec::write_atomic;

/// Summary artifacts: one per backup run, one per restore invocation
#[derive(Debug, Clone)]
pub struct SummaryStore {
    dir: PathBuf,
}

impl SummaryStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn backup_summary_path(&self, snapshot_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}.json", BACKUP_SUMMARY_PREFIX, snapshot_id))
    }

    pub fn write_backup_summary(&self, snapshot_id: &str, summary: &BackupSummary) -> Result<PathBuf> {
        let path = self.backup_summary_path(snapshot_id);
        write_atomic(&path, &serde_json::to_vec_pretty(summary)?)?;
        Ok(path)
    }

    /// Remove the summary of a pruned snapshot; returns whether one existed
    pub fn remove_backup_summary(&self, snapshot_id: &str) -> bool {
        let path = self.backup_summary_path(snapshot_id);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!("Error deleting summary {:?}: {}", path, e);
                false
            }
        }
    }

    pub fn write_restore_log(&self, log: &RestoreLog) -> Result<PathBuf> {
        let stamp = log.started_at.format(SNAPSHOT_ID_FORMAT);
        let path = self
            .dir
            .join(format!("{}{}.json", RESTORE_LOG_PREFIX, stamp));
        write_atomic(&path, &serde_json::to_vec_pretty(log)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_log_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let summaries = SummaryStore::open(dir.path()).unwrap();
        let mut log = RestoreLog::new("20260101_000000_000", 2, false);
        log.validation_warnings.push("Critical table 'users' not found in backup".to_string());

        let path = summaries.write_restore_log(&log).unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with(RESTORE_LOG_PREFIX));

        let loaded: RestoreLog = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded, log);
    }

    #[test]
    fn test_remove_missing_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summaries = SummaryStore::open(dir.path()).unwrap();
        assert!(!summaries.remove_backup_summary("nope"));
    }
}
