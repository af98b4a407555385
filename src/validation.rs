//! Structural checks on a snapshot document before anything is written

use serde_json::Value;

use crate::config::Config;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Fatal: the restore must not start
    pub errors: Vec<String>,
    /// Logged; the restore proceeds
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Warnings on success, `EngineError::Validation` otherwise
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(EngineError::Validation(self.errors))
        }
    }
}

/// Validate a raw snapshot document
pub fn validate_document(document: &Value, config: &Config) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(root) = document.as_object() else {
        report.errors.push("Backup is not a JSON object".to_string());
        return report;
    };

    if !root.get("metadata").map(Value::is_object).unwrap_or(false) {
        report.errors.push("Missing metadata in backup".to_string());
    }
    let data = match root.get("data").and_then(Value::as_object) {
        Some(data) => data,
        None => {
            report.errors.push("Missing data in backup".to_string());
            return report;
        }
    };

    for table in &config.critical_tables {
        if !data.contains_key(table) {
            report
                .warnings
                .push(format!("Critical table missing from backup: {}", table));
        }
    }

    let id_column = config.id_column.as_str();
    for (table, entry) in data {
        match entry {
            Value::Object(marker) => {
                if marker.get("_backup_failed").and_then(Value::as_bool) == Some(true) {
                    report
                        .warnings
                        .push(format!("Table {} was recorded as failed in this backup", table));
                }
            }
            Value::Array(rows) if !rows.is_empty() => {
                if config
                    .excluded_columns_for(table)
                    .iter()
                    .any(|column| column == id_column)
                {
                    continue;
                }
                let missing = rows
                    .iter()
                    .filter(|row| row.get(id_column).map(Value::is_null).unwrap_or(true))
                    .count();
                if missing > 0 {
                    report.warnings.push(format!(
                        "Table {}: {} of {} rows lack the {} field",
                        table,
                        missing,
                        rows.len(),
                        id_column
                    ));
                }
            }
            _ => {}
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config() -> Config {
        let mut config = Config::new(".", vec!["users".to_string(), "allotments".to_string()]);
        config.critical_tables = vec!["users".to_string(), "payments".to_string()];
        config.excluded_columns =
            BTreeMap::from([("allotments".to_string(), vec!["id".to_string()])]);
        config
    }

    #[test]
    fn test_missing_sections_are_errors() {
        let report = validate_document(&json!({"metadata": {}}), &config());
        assert_eq!(report.errors, vec!["Missing data in backup"]);

        let report = validate_document(&json!({"data": {}}), &config());
        assert_eq!(report.errors, vec!["Missing metadata in backup"]);

        let report = validate_document(&json!([1, 2]), &config());
        assert!(!report.is_valid());
        assert!(matches!(report.into_result(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let document = json!({
            "metadata": {"timestamp": "20260101_000000_000"},
            "data": {
                "users": [{"id": 1}, {"name": "no id"}],
                "allotments": [{"name": "id excluded"}],
                "orders": {"_backup_failed": true, "_error": "timeout"},
            }
        });
        let report = validate_document(&document, &config());

        assert!(report.is_valid());
        assert_eq!(
            report.warnings,
            vec![
                "Critical table missing from backup: payments".to_string(),
                "Table orders was recorded as failed in this backup".to_string(),
                "Table users: 1 of 2 rows lack the id field".to_string(),
            ]
        );
    }

    #[test]
    fn test_markers_and_empty_tables_are_clean() {
        let document = json!({
            "metadata": {},
            "data": {
                "users": {"_unchanged": true, "_reference_backup": "s1", "_hash": "h"},
                "payments": [],
            }
        });
        let report = validate_document(&document, &config());
        assert_eq!(report, ValidationReport::default());
    }
}
