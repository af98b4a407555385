//! Remote Table Backup Library
//!
//! Incremental snapshots of a remote tabular store, chained by content
//! hash, with safety snapshots and rollback around every restore.

pub mod backup;
pub mod chain;
pub mod config;
pub mod constants;
pub mod detector;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod pool;
pub mod remote;
pub mod restore;
pub mod store;
pub mod validation;

pub use backup::{BackupOrchestrator, BackupReport, BackupRequest};
pub use config::Config;
pub use error::{EngineError, Result};
pub use pool::CancellationToken;
pub use remote::{RemoteStore, WriteOutcome};
pub use restore::{RestoreOptions, RestoreOrchestrator, RestoreReport, RollbackReport, SafetyMode};
pub use store::{Lineage, SnapshotStore, SummaryStore};

use std::sync::Arc;

/// Engine state shared by the backup and restore orchestrators
#[derive(Clone)]
pub struct Context {
    pub config: Config,
    pub remote: Arc<dyn RemoteStore>,
    pub backups: SnapshotStore,
    pub safety: SnapshotStore,
    pub summaries: SummaryStore,
    pub cancel: CancellationToken,
}

impl Context {
    /// Open the snapshot directories under the configured root
    pub fn new(config: Config, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        config.validate().map_err(EngineError::Config)?;
        let backups = SnapshotStore::open(config.backups_dir(), Lineage::Backups, config.compress)?;
        let safety = SnapshotStore::open(config.safety_dir(), Lineage::Safety, true)?;
        let summaries = SummaryStore::open(config.summaries_dir())?;
        Ok(Self {
            config,
            remote,
            backups,
            safety,
            summaries,
            cancel: CancellationToken::new(),
        })
    }

    pub fn store(&self, lineage: Lineage) -> &SnapshotStore {
        match lineage {
            Lineage::Backups => &self.backups,
            Lineage::Safety => &self.safety,
        }
    }
}
