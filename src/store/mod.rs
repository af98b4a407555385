//! Snapshot persistence
//!
//! Each lineage is one directory of `<prefix><id>.json[.gz]` files. Ids are
//! fixed-width timestamps, so sorting file ids sorts snapshots by age.

pub mod codec;
pub mod summaries;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::constants::{SAFETY_FILE_PREFIX, SNAPSHOT_FILE_PREFIX, SNAPSHOT_ID_FORMAT};
use crate::error::{EngineError, Result};
use crate::models::{Snapshot, SnapshotListing, SnapshotMetadata, TableEntry};

use codec::{write_atomic, Container};

pub use summaries::SummaryStore;

/// Which family of snapshots a store holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lineage {
    Backups,
    Safety,
}

impl Lineage {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Lineage::Backups => SNAPSHOT_FILE_PREFIX,
            Lineage::Safety => SAFETY_FILE_PREFIX,
        }
    }
}

/// A snapshot file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub id: String,
    pub path: PathBuf,
}

/// Outcome of retention pruning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    /// (surviving snapshot, table, deleted reference) triples
    pub dangling_references: Vec<(String, String, String)>,
}

#[derive(Deserialize)]
struct MetadataOnly {
    metadata: SnapshotMetadata,
}

/// Directory-backed store for one snapshot lineage
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    lineage: Lineage,
    container: Container,
    last_issued: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl SnapshotStore {
    /// Open (creating if needed) the directory of a lineage
    ///
    /// Safety snapshots are always written compressed.
    pub fn open(dir: impl AsRef<Path>, lineage: Lineage, compress: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            tracing::info!("Creating snapshot directory {:?}", dir);
            fs::create_dir_all(&dir)?;
        }
        let compress = compress || lineage == Lineage::Safety;
        Ok(Self {
            dir,
            lineage,
            container: Container::new(compress),
            last_issued: Arc::new(Mutex::new(None)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lineage(&self) -> Lineage {
        self.lineage
    }

    pub fn compresses(&self) -> bool {
        self.container == Container::Gzip
    }

    /// Copy of this store writing with a different container
    ///
    /// Compression of safety snapshots cannot be turned off.
    pub fn with_compression(&self, compress: bool) -> Self {
        let mut store = self.clone();
        store.container = Container::new(compress || self.lineage == Lineage::Safety);
        store
    }

    /// Issue a new snapshot id, strictly greater than any issued before
    pub fn next_id(&self) -> (String, DateTime<Utc>) {
        let mut last = self
            .last_issued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Utc::now();
        let issued = match *last {
            Some(previous) if now.format(SNAPSHOT_ID_FORMAT).to_string()
                <= previous.format(SNAPSHOT_ID_FORMAT).to_string() =>
            {
                previous + Duration::milliseconds(1)
            }
            _ => now,
        };
        *last = Some(issued);
        (issued.format(SNAPSHOT_ID_FORMAT).to_string(), issued)
    }

    pub fn file_name(&self, id: &str) -> String {
        format!(
            "{}{}{}",
            self.lineage.file_prefix(),
            id,
            self.container.extension()
        )
    }

    /// Snapshot id encoded in a file name of this lineage
    pub fn id_from_file_name(&self, file_name: &str) -> Option<String> {
        let rest = file_name.strip_prefix(self.lineage.file_prefix())?;
        let id = rest
            .strip_suffix(Container::Gzip.extension())
            .or_else(|| rest.strip_suffix(Container::Plain.extension()))?;
        (!id.is_empty()).then(|| id.to_string())
    }

    /// Find the file for a snapshot given by id or by file name
    pub fn locate(&self, reference: &str) -> Option<PathBuf> {
        let id = self
            .id_from_file_name(reference)
            .unwrap_or_else(|| reference.to_string());
        [Container::Plain, Container::Gzip]
            .iter()
            .map(|container| {
                self.dir.join(format!(
                    "{}{}{}",
                    self.lineage.file_prefix(),
                    id,
                    container.extension()
                ))
            })
            .find(|path| path.is_file())
    }

    /// Normalize a reference (id or file name) to the stored id
    pub fn resolve_id(&self, reference: &str) -> Result<String> {
        let path = self
            .locate(reference)
            .ok_or_else(|| EngineError::SnapshotNotFound(reference.to_string()))?;
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| self.id_from_file_name(name))
            .ok_or_else(|| EngineError::SnapshotNotFound(reference.to_string()))
    }

    /// All snapshot files of this lineage, newest first
    pub fn list(&self) -> Result<Vec<StoredSnapshot>> {
        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(id) = self.id_from_file_name(name) {
                found.insert(id, entry.path());
            }
        }

        Ok(found
            .into_iter()
            .rev()
            .map(|(id, path)| StoredSnapshot { id, path })
            .collect())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Persist a snapshot under its id; returns the written path
    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let path = self.dir.join(self.file_name(snapshot.id()));
        let document = serde_json::to_vec_pretty(snapshot)?;
        let encoded = self.container.encode(&document)?;
        write_atomic(&path, &encoded)?;
        tracing::debug!("Wrote snapshot {} ({} bytes)", snapshot.id(), encoded.len());
        Ok(path)
    }

    /// Delete a snapshot file; `false` when there was none
    pub fn remove(&self, reference: &str) -> Result<bool> {
        match self.locate(reference) {
            Some(path) => {
                fs::remove_file(&path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read_bytes(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self
            .locate(reference)
            .ok_or_else(|| EngineError::SnapshotNotFound(reference.to_string()))?;
        let raw = fs::read(&path)?;
        Ok(Container::for_path(&path).decode(&raw)?)
    }

    /// Raw JSON document of a snapshot, before structural validation
    pub fn load_document(&self, reference: &str) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.read_bytes(reference)?)?)
    }

    pub fn load(&self, reference: &str) -> Result<Snapshot> {
        Ok(serde_json::from_slice(&self.read_bytes(reference)?)?)
    }

    /// Most recent readable snapshot, if any
    ///
    /// An unreadable newest file is reported and treated as absent so the
    /// next backup falls back to a full one.
    pub fn latest(&self) -> Result<Option<Snapshot>> {
        let Some(newest) = self.list()?.into_iter().next() else {
            return Ok(None);
        };
        match self.load(&newest.id) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!("Error reading latest snapshot {}: {}", newest.id, e);
                Ok(None)
            }
        }
    }

    /// Listing with metadata of every snapshot, newest first
    pub fn list_detailed(&self) -> Result<Vec<SnapshotListing>> {
        let mut listings = Vec::new();
        for stored in self.list()? {
            let size_bytes = fs::metadata(&stored.path).map(|m| m.len()).unwrap_or(0);
            let file_name = stored
                .path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let metadata = match self
                .read_bytes(&stored.id)
                .and_then(|bytes| Ok(serde_json::from_slice::<MetadataOnly>(&bytes)?))
            {
                Ok(doc) => doc.metadata,
                Err(e) => {
                    tracing::warn!("Skipping unreadable snapshot {}: {}", file_name, e);
                    continue;
                }
            };
            listings.push(SnapshotListing {
                id: stored.id,
                file_name,
                created_at: metadata.created_at,
                kind: metadata.kind,
                size_bytes,
                changed_count: metadata.changed_count(),
                total_rows: metadata.total_rows,
            });
        }
        Ok(listings)
    }

    /// Delete all but the newest `keep` snapshots
    ///
    /// Pruning is purely count based. Afterwards the oldest survivor is
    /// checked for `Unchanged` markers pointing at a deleted snapshot; those
    /// chains are now broken and are reported, not repaired.
    pub fn prune(&self, keep: usize) -> Result<PruneReport> {
        let snapshots = self.list()?;
        let mut report = PruneReport::default();
        if snapshots.len() <= keep {
            return Ok(report);
        }

        for stored in &snapshots[keep..] {
            match fs::remove_file(&stored.path) {
                Ok(()) => report.deleted.push(stored.id.clone()),
                Err(e) => tracing::warn!("Error deleting {:?}: {}", stored.path, e),
            }
        }

        if keep > 0 && !report.deleted.is_empty() {
            let deleted: HashSet<&str> = report.deleted.iter().map(String::as_str).collect();
            let oldest_survivor = &snapshots[keep - 1];
            match self.load(&oldest_survivor.id) {
                Ok(snapshot) => {
                    for (table, entry) in &snapshot.data {
                        if let TableEntry::Unchanged {
                            reference_snapshot_id,
                            ..
                        } = entry
                        {
                            if deleted.contains(reference_snapshot_id.as_str()) {
                                report.dangling_references.push((
                                    oldest_survivor.id.clone(),
                                    table.clone(),
                                    reference_snapshot_id.clone(),
                                ));
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(
                    "Could not check references of {} after pruning: {}",
                    oldest_survivor.id,
                    e
                ),
            }
        }

        if !report.deleted.is_empty() {
            tracing::info!("Cleaned up {} old snapshot(s)", report.deleted.len());
        }
        for (snapshot, table, reference) in &report.dangling_references {
            tracing::warn!(
                "Snapshot {} table {} references pruned snapshot {}; that chain is now broken",
                snapshot,
                table,
                reference
            );
        }
        Ok(report)
    }
}
