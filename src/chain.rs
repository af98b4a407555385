//! Backup chain resolution
//!
//! Follows `Unchanged` markers back through earlier snapshots until the
//! table's rows are found. Loaded ancestors are cached for the lifetime of
//! one resolver, so resolving many tables reads each ancestor once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::models::{Row, Snapshot, TableEntry};
use crate::store::SnapshotStore;

/// Effective content of a table after walking its chain
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Rows { origin: String, rows: Vec<Row> },
    /// The chain ends in a failed backup; never treated as empty
    Failed { origin: String, message: String },
}

pub struct ChainResolver {
    store: SnapshotStore,
    cache: HashMap<String, Arc<Snapshot>>,
    max_hops: usize,
}

impl ChainResolver {
    pub fn new(store: SnapshotStore) -> Result<Self> {
        let max_hops = store.count()? + 1;
        Ok(Self {
            store,
            cache: HashMap::new(),
            max_hops,
        })
    }

    /// Number of ancestor snapshots loaded so far
    pub fn cached_snapshots(&self) -> usize {
        self.cache.len()
    }

    fn ancestor(&mut self, id: &str, table: &str) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.cache.get(id) {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = self.store.load(id).map_err(|e| EngineError::ChainBroken {
            table: table.to_string(),
            reason: format!("referenced snapshot {} is missing or unreadable: {}", id, e),
        })?;
        let snapshot = Arc::new(snapshot);
        self.cache.insert(id.to_string(), Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn resolve(&mut self, snapshot: &Snapshot, table: &str) -> Result<Resolved> {
        let mut visited: HashSet<String> = HashSet::from([snapshot.id().to_string()]);
        let mut holder: Option<Arc<Snapshot>> = None;
        let mut hops = 0;

        loop {
            let current: &Snapshot = holder.as_deref().unwrap_or(snapshot);
            let entry = current
                .entry(table)
                .ok_or_else(|| EngineError::ChainBroken {
                    table: table.to_string(),
                    reason: format!("snapshot {} has no entry for the table", current.id()),
                })?;

            let reference = match entry {
                TableEntry::Materialized(rows) => {
                    return Ok(Resolved::Rows {
                        origin: current.id().to_string(),
                        rows: rows.clone(),
                    });
                }
                TableEntry::Failed { error_message } => {
                    return Ok(Resolved::Failed {
                        origin: current.id().to_string(),
                        message: error_message.clone(),
                    });
                }
                TableEntry::Unchanged {
                    reference_snapshot_id,
                    ..
                } => reference_snapshot_id.clone(),
            };

            if !visited.insert(reference.clone()) || hops >= self.max_hops {
                return Err(EngineError::ChainCycle {
                    table: table.to_string(),
                    snapshot_id: reference,
                });
            }
            hops += 1;
            holder = Some(self.ancestor(&reference, table)?);
        }
    }

    /// Resolve several tables of one snapshot, sharing the ancestor cache
    pub fn resolve_all(
        &mut self,
        snapshot: &Snapshot,
        tables: &[String],
    ) -> BTreeMap<String, Result<Resolved>> {
        tables
            .iter()
            .map(|table| (table.clone(), self.resolve(snapshot, table)))
            .collect()
    }
}
