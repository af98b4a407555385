//! Remote tabular store client boundary
//!
//! The engine only talks to the store through [`RemoteStore`]. Reads return a
//! typed `Result`; writes return a classified [`WriteOutcome`] so the restore
//! fallback chain can switch on it.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::constants::{SQLSTATE_GENERATED_ALWAYS, SQLSTATE_UNIQUE_VIOLATION};
use crate::models::Row;

pub use http::HttpRemoteStore;
pub use memory::InMemoryStore;

/// Errors raised at the remote store boundary
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Unavailable(String),
}

/// Classified result of one write attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    DuplicateKey(String),
    GeneratedColumnConflict(String),
    Other(String),
}

impl WriteOutcome {
    /// Classify a store error by SQLSTATE code or message text
    pub fn classify(code: Option<&str>, message: &str) -> Self {
        let lower = message.to_lowercase();
        if code == Some(SQLSTATE_UNIQUE_VIOLATION)
            || lower.contains("duplicate")
            || message.contains(SQLSTATE_UNIQUE_VIOLATION)
        {
            WriteOutcome::DuplicateKey(message.to_string())
        } else if code == Some(SQLSTATE_GENERATED_ALWAYS)
            || lower.contains("generated")
            || message.contains(SQLSTATE_GENERATED_ALWAYS)
        {
            WriteOutcome::GeneratedColumnConflict(message.to_string())
        } else {
            WriteOutcome::Other(message.to_string())
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, WriteOutcome::Ok)
    }

    /// Error message carried by a failed outcome
    pub fn message(&self) -> Option<&str> {
        match self {
            WriteOutcome::Ok => None,
            WriteOutcome::DuplicateKey(msg)
            | WriteOutcome::GeneratedColumnConflict(msg)
            | WriteOutcome::Other(msg) => Some(msg),
        }
    }
}

/// Operations the engine needs from the remote tabular store
///
/// Implementations must be Send + Sync; units of work call them concurrently.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read up to `limit` rows starting at `offset`; a short page ends the table
    async fn fetch_page(&self, table: &str, offset: usize, limit: usize)
        -> Result<Vec<Row>, RemoteError>;

    /// Insert or update rows keyed by primary key
    async fn upsert_batch(&self, table: &str, rows: &[Row]) -> WriteOutcome;

    /// Update the row whose `id_column` equals `id`
    async fn update_row(&self, table: &str, id_column: &str, id: &Value, row: &Row)
        -> WriteOutcome;

    /// Current number of rows in the table
    async fn count_rows(&self, table: &str) -> Result<u64, RemoteError>;
}
