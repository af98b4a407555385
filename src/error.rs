use thiserror::Error;

use crate::remote::RemoteError;

/// Engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to fetch table {table}: {source}")]
    Fetch {
        table: String,
        #[source]
        source: RemoteError,
    },

    #[error("Backup chain broken for table {table}: {reason}")]
    ChainBroken { table: String, reason: String },

    #[error("Backup chain for table {table} cycles through snapshot {snapshot_id}")]
    ChainCycle { table: String, snapshot_id: String },

    #[error("Backup validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Safety backup failed, restore cancelled: {0}")]
    SafetyBackupFailure(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Rollback not confirmed")]
    RollbackNotConfirmed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Short machine-readable reason recorded in restore logs
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Fetch { .. } => "fetch_failed",
            EngineError::ChainBroken { .. } => "chain_broken",
            EngineError::ChainCycle { .. } => "chain_cycle",
            EngineError::Validation(_) => "validation_failed",
            EngineError::SafetyBackupFailure(_) => "safety_backup_failed",
            EngineError::SnapshotNotFound(_) => "snapshot_not_found",
            EngineError::RollbackNotConfirmed => "rollback_not_confirmed",
            EngineError::Cancelled => "cancelled",
            EngineError::Config(_) => "config",
            EngineError::Io(_) => "io",
            EngineError::Json(_) => "serialization",
            EngineError::TaskJoin(_) => "task_join",
        }
    }
}

/// Result type alias for engine results
pub type Result<T> = std::result::Result<T, EngineError>;
