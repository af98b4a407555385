pub mod restore_log;
pub mod snapshot;
pub mod summary;

pub use restore_log::{RestoreLog, RestoreStage, TableFailure, TableRestoreResult, VerificationWarning};
pub use snapshot::{Row, Snapshot, SnapshotKind, SnapshotMetadata, TableEntry};
pub use summary::{format_bytes, BackupSummary, SnapshotListing};
