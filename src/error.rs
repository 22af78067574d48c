//! Error types for the segsync state synchronization client.

use crate::types::{StateUri, TxId};
use std::path::PathBuf;
use thiserror::Error;

/// Local storage errors (session persistence).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found for state URI: {0}")]
    SessionNotFound(StateUri),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Synchronization errors.
///
/// `Transient` is isolated per file and retried on the next cycle.
/// `Conflict` drives the single fallback commit. `Validation` fails only
/// the offending transaction. None of these terminate the watch loop.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transient I/O error: {0}")]
    Transient(String),

    #[error("Commit conflict for {state_uri}: parents {parents:?} rejected by peer")]
    Conflict {
        state_uri: StateUri,
        parents: Vec<TxId>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether a failed commit attempt should be recovered with the single
    /// fallback transaction. Network failures during a commit are recovered
    /// the same way as an explicit parent rejection.
    pub fn is_commit_recoverable(&self) -> bool {
        matches!(self, SyncError::Conflict { .. } | SyncError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_recoverable() {
        let err = SyncError::Conflict {
            state_uri: StateUri::new("demo.local/video"),
            parents: vec![TxId::GENESIS],
        };
        assert!(err.is_commit_recoverable());
        assert!(SyncError::Transient("connection reset".into()).is_commit_recoverable());
        assert!(!SyncError::Validation("empty path".into()).is_commit_recoverable());
    }

    #[test]
    fn test_storage_error_wraps_into_sync_error() {
        let storage = StorageError::Backend("tree unavailable".into());
        let err: SyncError = storage.into();
        assert!(matches!(err, SyncError::Storage(_)));
    }
}
