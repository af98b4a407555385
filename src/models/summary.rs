use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::{SnapshotKind, SnapshotMetadata};

/// Per-run backup summary written next to the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub backup_file: String,
    pub backup_date: DateTime<Utc>,
    pub backup_type: SnapshotKind,
    pub total_tables: usize,
    pub successful_tables: usize,
    pub failed_tables: usize,
    pub unchanged_tables: usize,
    pub changed_tables: usize,
    pub total_rows: usize,
    pub file_size_bytes: u64,
    pub compressed: bool,
    pub max_workers: usize,
}

impl BackupSummary {
    pub fn from_metadata(metadata: &SnapshotMetadata, backup_file: &str, file_size_bytes: u64) -> Self {
        Self {
            backup_file: backup_file.to_string(),
            backup_date: metadata.created_at,
            backup_type: metadata.kind,
            total_tables: metadata.total_tables,
            successful_tables: metadata.successful_tables,
            failed_tables: metadata.failed_tables.len(),
            unchanged_tables: metadata.unchanged_count(),
            changed_tables: metadata.changed_count(),
            total_rows: metadata.total_rows,
            file_size_bytes,
            compressed: metadata.compressed,
            max_workers: metadata.max_workers,
        }
    }
}

/// One line of a snapshot listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotListing {
    pub id: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub kind: SnapshotKind,
    pub size_bytes: u64,
    pub changed_count: usize,
    pub total_rows: usize,
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
