use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::constants::*;

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub remote_url: String,
    pub remote_key: String,
    pub root_dir: PathBuf,
    pub tables: Vec<String>,
    pub id_column: String,
    pub critical_tables: Vec<String>,
    /// table -> columns never written during restore
    pub excluded_columns: BTreeMap<String, Vec<String>>,
    pub page_size: usize,
    pub batch_size: usize,
    pub keep_count: usize,
    pub backup_workers: usize,
    pub restore_workers: usize,
    pub compress: bool,
    pub verify_tolerance: f64,
    pub request_timeout_secs: u64,
}

impl Config {
    /// Configuration with every tunable at its default
    pub fn new(root_dir: impl Into<PathBuf>, tables: Vec<String>) -> Self {
        Self {
            remote_url: String::new(),
            remote_key: String::new(),
            root_dir: root_dir.into(),
            tables,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            critical_tables: Vec::new(),
            excluded_columns: BTreeMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            keep_count: DEFAULT_KEEP_COUNT,
            backup_workers: DEFAULT_BACKUP_WORKERS,
            restore_workers: DEFAULT_RESTORE_WORKERS,
            compress: true,
            verify_tolerance: DEFAULT_VERIFY_TOLERANCE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote_url = lookup("REMOTE_STORE_URL").ok_or("REMOTE_STORE_URL must be set")?;
        let remote_key = lookup("REMOTE_STORE_KEY").ok_or("REMOTE_STORE_KEY must be set")?;
        let root_dir = PathBuf::from(lookup("BACKUP_ROOT").unwrap_or_else(|| ".".to_string()));

        let tables = match (lookup("TABLES"), lookup("SCHEMA_FILE")) {
            (Some(list), _) => split_list(&list),
            (None, Some(schema)) => tables_from_schema_file(Path::new(&schema))
                .map_err(|e| format!("Cannot read SCHEMA_FILE {}: {}", schema, e))?,
            (None, None) => return Err("TABLES or SCHEMA_FILE must be set".to_string()),
        };
        if tables.is_empty() {
            return Err("No tables configured".to_string());
        }

        let excluded_columns = match lookup("EXCLUDED_COLUMNS") {
            Some(pairs) => parse_excluded_columns(&pairs)?,
            None => BTreeMap::new(),
        };

        let config = Config {
            remote_url,
            remote_key,
            root_dir,
            tables,
            id_column: lookup("ID_COLUMN").unwrap_or_else(|| DEFAULT_ID_COLUMN.to_string()),
            critical_tables: lookup("CRITICAL_TABLES")
                .map(|list| split_list(&list))
                .unwrap_or_default(),
            excluded_columns,
            page_size: parse_var(&lookup, "PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            batch_size: parse_var(&lookup, "BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            keep_count: parse_var(&lookup, "KEEP_COUNT", DEFAULT_KEEP_COUNT)?,
            backup_workers: parse_var(&lookup, "BACKUP_WORKERS", DEFAULT_BACKUP_WORKERS)?,
            restore_workers: parse_var(&lookup, "RESTORE_WORKERS", DEFAULT_RESTORE_WORKERS)?,
            compress: parse_bool(&lookup, "COMPRESS", true)?,
            verify_tolerance: parse_var(&lookup, "VERIFY_TOLERANCE", DEFAULT_VERIFY_TOLERANCE)?,
            request_timeout_secs: parse_var(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject sizes, worker counts and tolerances the engine cannot run with
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("PAGE_SIZE", self.page_size),
            ("BATCH_SIZE", self.batch_size),
            ("KEEP_COUNT", self.keep_count),
            ("BACKUP_WORKERS", self.backup_workers),
            ("RESTORE_WORKERS", self.restore_workers),
        ] {
            if value == 0 {
                return Err(format!("{} must be at least 1", name));
            }
        }
        if !(self.verify_tolerance > 0.0 && self.verify_tolerance <= 1.0) {
            return Err("VERIFY_TOLERANCE must be in (0, 1]".to_string());
        }
        Ok(())
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root_dir.join(BACKUPS_DIR)
    }

    pub fn safety_dir(&self) -> PathBuf {
        self.root_dir.join(SAFETY_BACKUPS_DIR)
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.root_dir.join(SUMMARIES_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root_dir.join(LOGS_DIR)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE)
    }

    /// Columns stripped from rows of `table` before writing
    pub fn excluded_columns_for(&self, table: &str) -> &[String] {
        self.excluded_columns
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn split_list(list: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !items.iter().any(|existing| existing == item) {
            items.push(item.to_string());
        }
    }
    items
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| format!("Invalid {}", name)),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, name: &str, default: bool) -> Result<bool, String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|raw| raw.trim().to_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(format!("Invalid {}", name)),
        },
    }
}

/// Parse `table.column` pairs separated by commas
pub fn parse_excluded_columns(pairs: &str) -> Result<BTreeMap<String, Vec<String>>, String> {
    let mut excluded: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in pairs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (table, column) = pair
            .split_once('.')
            .filter(|(table, column)| !table.is_empty() && !column.is_empty())
            .ok_or_else(|| format!("Invalid EXCLUDED_COLUMNS entry: {}", pair))?;
        excluded
            .entry(table.to_string())
            .or_default()
            .push(column.to_string());
    }
    Ok(excluded)
}

/// Table names declared as `CREATE TABLE public.<name>`, first-seen order
pub fn tables_from_schema(schema: &str) -> Vec<String> {
    static CREATE_TABLE: OnceLock<Regex> = OnceLock::new();
    let pattern = CREATE_TABLE.get_or_init(|| {
        Regex::new(r"(?i)CREATE TABLE (?:IF NOT EXISTS )?public\.([A-Za-z0-9_]+)")
            .unwrap_or_else(|e| panic!("invalid table pattern: {}", e))
    });

    let mut tables: Vec<String> = Vec::new();
    for captures in pattern.captures_iter(schema) {
        let name = &captures[1];
        if !tables.iter().any(|t| t == name) {
            tables.push(name.to_string());
        }
    }
    tables
}

/// Read a schema file and list its tables
pub fn tables_from_schema_file(path: &Path) -> std::io::Result<Vec<String>> {
    Ok(tables_from_schema(&fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("REMOTE_STORE_URL", "http://localhost:54321"),
        ("REMOTE_STORE_KEY", "service-key"),
        ("TABLES", "users, orders,users"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(lookup_from(&REQUIRED)).unwrap();
        assert_eq!(config.tables, vec!["users", "orders"]);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.keep_count, 288);
        assert_eq!(config.restore_workers, 1);
        assert!(config.compress);
        assert_eq!(config.backups_dir(), PathBuf::from("./backups"));
    }

    #[test]
    fn test_missing_required() {
        let err = Config::from_vars(lookup_from(&[("TABLES", "users")])).unwrap_err();
        assert_eq!(err, "REMOTE_STORE_URL must be set");

        let err = Config::from_vars(lookup_from(&REQUIRED[..2])).unwrap_err();
        assert_eq!(err, "TABLES or SCHEMA_FILE must be set");
    }

    #[test]
    fn test_invalid_numbers() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("PAGE_SIZE", "lots"));
        assert_eq!(
            Config::from_vars(lookup_from(&vars)).unwrap_err(),
            "Invalid PAGE_SIZE"
        );

        let mut vars = REQUIRED.to_vec();
        vars.push(("BACKUP_WORKERS", "0"));
        assert_eq!(
            Config::from_vars(lookup_from(&vars)).unwrap_err(),
            "BACKUP_WORKERS must be at least 1"
        );

        let mut vars = REQUIRED.to_vec();
        vars.push(("VERIFY_TOLERANCE", "1.5"));
        assert!(Config::from_vars(lookup_from(&vars)).is_err());
    }

    #[test]
    fn test_excluded_columns() {
        let excluded = parse_excluded_columns("bookings.booking_number, allotments.id,bookings.total").unwrap();
        assert_eq!(excluded["bookings"], vec!["booking_number", "total"]);
        assert_eq!(excluded["allotments"], vec!["id"]);
        assert!(parse_excluded_columns("no_dot").is_err());

        let mut config = Config::new(".", vec!["bookings".to_string()]);
        config.excluded_columns = excluded;
        assert_eq!(config.excluded_columns_for("bookings").len(), 2);
        assert!(config.excluded_columns_for("users").is_empty());
    }

    #[test]
    fn test_tables_from_schema() {
        let schema = "\
CREATE TABLE public.users (id uuid primary key);
create table public.orders (id int);
CREATE TABLE IF NOT EXISTS public.items (id int);
CREATE TABLE public.users (id uuid);
CREATE TABLE audit.events (id int);";
        assert_eq!(tables_from_schema(schema), vec!["users", "orders", "items"]);
    }

    #[test]
    fn test_schema_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("query.sql");
        fs::write(&schema_path, "CREATE TABLE public.packages (id int);").unwrap();
        let schema = schema_path.to_string_lossy().to_string();

        let config = Config::from_vars(lookup_from(&[
            ("REMOTE_STORE_URL", "http://localhost"),
            ("REMOTE_STORE_KEY", "k"),
            ("SCHEMA_FILE", schema.as_str()),
        ]))
        .unwrap();
        assert_eq!(config.tables, vec!["packages"]);
    }

    #[test]
    fn test_bool_parsing() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("COMPRESS", "no"));
        assert!(!Config::from_vars(lookup_from(&vars)).unwrap().compress);
    }
}
