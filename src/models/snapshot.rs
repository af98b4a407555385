use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row record: column name -> value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Kind of backup run that produced a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Full,
    Incremental,
    Safety,
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SnapshotKind::Full => "full",
            SnapshotKind::Incremental => "incremental",
            SnapshotKind::Safety => "safety",
        };
        f.write_str(name)
    }
}

/// Backup state of one table within one snapshot
///
/// On disk a materialized entry is a plain row list; the other two variants
/// are objects tagged with `_unchanged` or `_backup_failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredEntry", into = "StoredEntry")]
pub enum TableEntry {
    Materialized(Vec<Row>),
    Unchanged {
        reference_snapshot_id: String,
        content_hash: String,
    },
    Failed {
        error_message: String,
    },
}

impl TableEntry {
    pub fn is_failed(&self) -> bool {
        matches!(self, TableEntry::Failed { .. })
    }

    /// Rows stored directly in this entry (None for markers)
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            TableEntry::Materialized(rows) => Some(rows),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Rows(Vec<Row>),
    Marker(EntryMarker),
}

#[derive(Default, Serialize, Deserialize)]
struct EntryMarker {
    #[serde(rename = "_unchanged", default, skip_serializing_if = "is_false")]
    unchanged: bool,
    #[serde(
        rename = "_reference_backup",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    reference_backup: Option<String>,
    #[serde(rename = "_hash", default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(rename = "_backup_failed", default, skip_serializing_if = "is_false")]
    backup_failed: bool,
    #[serde(rename = "_error", default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl TryFrom<StoredEntry> for TableEntry {
    type Error = String;

    fn try_from(stored: StoredEntry) -> Result<Self, Self::Error> {
        match stored {
            StoredEntry::Rows(rows) => Ok(TableEntry::Materialized(rows)),
            StoredEntry::Marker(marker) if marker.backup_failed => Ok(TableEntry::Failed {
                error_message: marker.error.unwrap_or_default(),
            }),
            StoredEntry::Marker(marker) if marker.unchanged => {
                let reference_snapshot_id = marker
                    .reference_backup
                    .ok_or_else(|| "unchanged marker without _reference_backup".to_string())?;
                Ok(TableEntry::Unchanged {
                    reference_snapshot_id,
                    content_hash: marker.hash.unwrap_or_default(),
                })
            }
            StoredEntry::Marker(_) => {
                Err("table entry is neither a row list nor a known marker".to_string())
            }
        }
    }
}

impl From<TableEntry> for StoredEntry {
    fn from(entry: TableEntry) -> Self {
        match entry {
            TableEntry::Materialized(rows) => StoredEntry::Rows(rows),
            TableEntry::Unchanged {
                reference_snapshot_id,
                content_hash,
            } => StoredEntry::Marker(EntryMarker {
                unchanged: true,
                reference_backup: Some(reference_snapshot_id),
                hash: Some(content_hash),
                ..EntryMarker::default()
            }),
            TableEntry::Failed { error_message } => StoredEntry::Marker(EntryMarker {
                backup_failed: true,
                error: Some(error_message),
                ..EntryMarker::default()
            }),
        }
    }
}

/// Snapshot metadata section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(rename = "timestamp")]
    pub id: String,
    #[serde(rename = "backup_date")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "backup_type")]
    pub kind: SnapshotKind,
    #[serde(rename = "previous_backup", default)]
    pub previous_snapshot_id: Option<String>,
    pub tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default)]
    pub total_tables: usize,
    /// Rows fetched from the store across all successful tables
    #[serde(default)]
    pub total_rows: usize,
    /// Rows physically stored in this snapshot
    #[serde(default)]
    pub stored_rows: usize,
    #[serde(default)]
    pub successful_tables: usize,
    #[serde(default)]
    pub failed_tables: Vec<String>,
    #[serde(default)]
    pub changed_tables: Vec<String>,
    #[serde(default)]
    pub unchanged_tables: Vec<String>,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub max_workers: usize,
}

impl SnapshotMetadata {
    pub fn changed_count(&self) -> usize {
        self.changed_tables.len()
    }

    pub fn unchanged_count(&self) -> usize {
        self.unchanged_tables.len()
    }
}

/// One persisted backup run across all tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub data: BTreeMap<String, TableEntry>,
}

impl Snapshot {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn entry(&self, table: &str) -> Option<&TableEntry> {
        self.data.get(table)
    }
}
