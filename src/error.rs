//! Error types for call synchronization
//!
//! Errors are classified by how the synchronizer treats them:
//! - Transport / NotFound / Storage: counted against the item, batch continues
//! - MalformedInput: the list entry is not a real item and is skipped silently
//!
//! Only a Transport error from the top-level list call aborts a cycle.

use thiserror::Error;

use crate::db::DbError;

/// Error taxonomy shared by the source adapter, normalizer and synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Malformed input: {0}")]
    MalformedInput(String),
}

impl SyncError {
    /// Returns true if the error should count against the batch error total.
    ///
    /// Malformed list entries are dropped without being counted.
    pub fn counts_as_error(&self) -> bool {
        !matches!(self, SyncError::MalformedInput(_))
    }

    /// Short machine-readable label, used in logs and `sync_runs`.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => "transport",
            SyncError::NotFound(_) => "not_found",
            SyncError::Storage(_) => "storage",
            SyncError::MalformedInput(_) => "malformed_input",
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Storage(DbError::Sqlite(err))
    }
}
