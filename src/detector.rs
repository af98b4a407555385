//! Content fingerprints and change classification for table row sets

use std::collections::HashSet;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::Row;

/// Why a table was considered changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    NoPreviousBackup,
    ContentDiffers,
}

/// Result of comparing a table's current rows against its baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub changed: bool,
    pub hash: String,
    pub reason: Option<ChangeReason>,
    pub added_count: Option<usize>,
    pub removed_count: Option<usize>,
    pub current_count: usize,
    pub previous_count: Option<usize>,
}

/// Deterministic JSON text: object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &Row, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key], out);
    }
    out.push('}');
}

fn canonical_row(row: &Row) -> String {
    let mut out = String::new();
    write_object(row, &mut out);
    out
}

/// Identifier of a row as text, if present and non-null
fn row_identifier(row: &Row, id_column: &str) -> Option<String> {
    match row.get(id_column) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Order-independent SHA-256 fingerprint of a row set
///
/// Rows are sorted by identifier, ties and identifier-less rows by their
/// canonical text, so storage-side ordering never affects the result.
pub fn fingerprint(rows: &[Row], id_column: &str) -> String {
    let mut keyed: Vec<(Option<String>, String)> = rows
        .iter()
        .map(|row| (row_identifier(row, id_column), canonical_row(row)))
        .collect();
    keyed.sort();

    let mut hasher = Sha256::new();
    hasher.update(b"[");
    for (i, (_, text)) in keyed.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(text.as_bytes());
    }
    hasher.update(b"]");
    hex::encode(hasher.finalize())
}

/// Classify `current` against the baseline rows of an earlier snapshot
///
/// `None` as baseline (first backup, forced full, unusable previous entry)
/// is always a change.
pub fn classify(current: &[Row], baseline: Option<&[Row]>, id_column: &str) -> Classification {
    let hash = fingerprint(current, id_column);

    let Some(previous) = baseline else {
        return Classification {
            changed: true,
            hash,
            reason: Some(ChangeReason::NoPreviousBackup),
            added_count: None,
            removed_count: None,
            current_count: current.len(),
            previous_count: None,
        };
    };

    if fingerprint(previous, id_column) == hash {
        return Classification {
            changed: false,
            hash,
            reason: None,
            added_count: None,
            removed_count: None,
            current_count: current.len(),
            previous_count: Some(previous.len()),
        };
    }

    let current_ids: HashSet<String> = current
        .iter()
        .filter_map(|row| row_identifier(row, id_column))
        .collect();
    let previous_ids: HashSet<String> = previous
        .iter()
        .filter_map(|row| row_identifier(row, id_column))
        .collect();

    Classification {
        changed: true,
        hash,
        reason: Some(ChangeReason::ContentDiffers),
        added_count: Some(current_ids.difference(&previous_ids).count()),
        removed_count: Some(previous_ids.difference(&current_ids).count()),
        current_count: current.len(),
        previous_count: Some(previous.len()),
    }
}
