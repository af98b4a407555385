use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteError, RemoteStore, WriteOutcome};
use crate::models::Row;

/// In-process store keyed by an identifier column
///
/// Upserts replace the columns of the row with the same identifier, or
/// append when no such row exists. Failure injection hooks let callers
/// exercise every branch of the restore fallback chain:
/// - bulk rejection applies to `upsert_batch` calls with more than one row
/// - row rejection applies to `upsert_batch` calls with exactly one row
pub struct InMemoryStore {
    id_column: String,
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    failing_fetches: Mutex<HashSet<String>>,
    failing_counts: Mutex<HashSet<String>>,
    rejected_bulk: Mutex<HashSet<String>>,
    rejected_rows: Mutex<HashMap<String, WriteOutcome>>,
    fetch_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryStore {
    pub fn new(id_column: &str) -> Self {
        Self {
            id_column: id_column.to_string(),
            tables: Mutex::new(BTreeMap::new()),
            failing_fetches: Mutex::new(HashSet::new()),
            failing_counts: Mutex::new(HashSet::new()),
            rejected_bulk: Mutex::new(HashSet::new()),
            rejected_rows: Mutex::new(HashMap::new()),
            fetch_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    /// Replace the contents of a table
    pub fn set_table(&self, table: &str, rows: Vec<Row>) {
        guard(&self.tables).insert(table.to_string(), rows);
    }

    /// Current contents of a table (empty when unknown)
    pub fn rows(&self, table: &str) -> Vec<Row> {
        guard(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn fail_fetches(&self, table: &str) {
        guard(&self.failing_fetches).insert(table.to_string());
    }

    pub fn restore_fetches(&self, table: &str) {
        guard(&self.failing_fetches).remove(table);
    }

    pub fn fail_counts(&self, table: &str) {
        guard(&self.failing_counts).insert(table.to_string());
    }

    pub fn reject_bulk_upserts(&self, table: &str) {
        guard(&self.rejected_bulk).insert(table.to_string());
    }

    pub fn reject_row_upserts(&self, table: &str, outcome: WriteOutcome) {
        guard(&self.rejected_rows).insert(table.to_string(), outcome);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn apply_upsert(&self, table: &str, rows: &[Row]) {
        let mut tables = guard(&self.tables);
        let existing = tables.entry(table.to_string()).or_default();
        for row in rows {
            let position = row.get(&self.id_column).and_then(|id| {
                existing
                    .iter()
                    .position(|current| current.get(&self.id_column) == Some(id))
            });
            match position {
                Some(index) => {
                    for (column, value) in row {
                        existing[index].insert(column.clone(), value.clone());
                    }
                }
                None => existing.push(row.clone()),
            }
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn fetch_page(
        &self,
        table: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Row>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if guard(&self.failing_fetches).contains(table) {
            return Err(RemoteError::Unavailable(format!(
                "relation \"{}\" is unavailable",
                table
            )));
        }

        let tables = guard(&self.tables);
        let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(rows.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn upsert_batch(&self, table: &str, rows: &[Row]) -> WriteOutcome {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if rows.len() > 1 && guard(&self.rejected_bulk).contains(table) {
            return WriteOutcome::Other("bulk upsert rejected".to_string());
        }
        if rows.len() == 1 {
            if let Some(outcome) = guard(&self.rejected_rows).get(table) {
                return outcome.clone();
            }
        }

        self.apply_upsert(table, rows);
        WriteOutcome::Ok
    }

    async fn update_row(&self, table: &str, id_column: &str, id: &Value, row: &Row) -> WriteOutcome {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut tables = guard(&self.tables);
        let Some(existing) = tables.get_mut(table) else {
            return WriteOutcome::Other(format!("relation \"{}\" does not exist", table));
        };

        match existing
            .iter_mut()
            .find(|current| current.get(id_column) == Some(id))
        {
            Some(current) => {
                for (column, value) in row {
                    current.insert(column.clone(), value.clone());
                }
                WriteOutcome::Ok
            }
            None => WriteOutcome::Other(format!("no row in {} with {} = {}", table, id_column, id)),
        }
    }

    async fn count_rows(&self, table: &str) -> Result<u64, RemoteError> {
        if guard(&self.failing_counts).contains(table) {
            return Err(RemoteError::Unavailable(format!("count failed for {}", table)));
        }
        Ok(guard(&self.tables).get(table).map_or(0, |rows| rows.len() as u64))
    }
}
