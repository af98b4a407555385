/// Rows requested per page when reading a table from the remote store
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Rows written per bulk upsert during restore
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Snapshots kept by retention pruning
/// 288 = 24 hours of backups at a 5-minute cadence
pub const DEFAULT_KEEP_COUNT: usize = 288;

/// Parallel table fetches during backup
pub const DEFAULT_BACKUP_WORKERS: usize = 5;

/// Parallel batch writes during restore (sequential by default)
pub const DEFAULT_RESTORE_WORKERS: usize = 1;

/// Post-restore row count below this share of the expected count is flagged
pub const DEFAULT_VERIFY_TOLERANCE: f64 = 0.9;

/// Timeout applied to every remote store request
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Row identifier column used for sorting, diffing and update fallback
pub const DEFAULT_ID_COLUMN: &str = "id";

/// Token the caller must supply before a rollback runs
pub const ROLLBACK_CONFIRMATION: &str = "ROLLBACK";

/// Token an interactive restore asks for before overwriting the store
pub const RESTORE_CONFIRMATION: &str = "YES";

/// Error details kept per restored batch
pub const MAX_ERROR_DETAILS_PER_BATCH: usize = 5;

/// Characters kept from a single write error message
pub const MAX_ERROR_DETAIL_CHARS: usize = 200;

// =============================================================================
// Directory and file layout
// =============================================================================

pub const BACKUPS_DIR: &str = "backups";
pub const SAFETY_BACKUPS_DIR: &str = "safety_backups";
pub const SUMMARIES_DIR: &str = "summaries";
pub const LOGS_DIR: &str = "logs";
pub const LOG_FILE: &str = "backup.log";

pub const SNAPSHOT_FILE_PREFIX: &str = "snapshot_";
pub const SAFETY_FILE_PREFIX: &str = "safety_";
pub const BACKUP_SUMMARY_PREFIX: &str = "backup_summary_";
pub const RESTORE_LOG_PREFIX: &str = "restore_log_";

/// chrono format of snapshot ids; fixed width so string order is time order
pub const SNAPSHOT_ID_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

// =============================================================================
// Safety snapshot purposes
// =============================================================================

pub const PURPOSE_PRE_RESTORE: &str = "pre_restore_snapshot";
pub const PURPOSE_PRE_ROLLBACK: &str = "pre_rollback_snapshot";

// =============================================================================
// Remote store error classification
// =============================================================================

/// PostgreSQL SQLSTATE for unique violations
pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL SQLSTATE for writes into a generated column
pub const SQLSTATE_GENERATED_ALWAYS: &str = "428C9";
