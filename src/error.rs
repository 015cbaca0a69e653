//! Error types for mirror and backup operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while synchronizing a bucket prefix.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// The storage provider rejected or failed a listing or download request.
    #[error("Storage request failed: {0}")]
    Network(String),

    /// A downloaded object does not have the size the listing reported.
    #[error("Size mismatch for {key}: expected {expected} bytes, got {actual} bytes")]
    Integrity {
        /// Object key.
        key: String,
        /// Size reported by the provider.
        expected: u64,
        /// Size found on disk after the download.
        actual: u64,
    },

    /// Metadata document or text log could not be written.
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// Missing bucket, credentials or other start-up settings.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Object key would resolve outside of the mirror root.
    #[error("Refusing to mirror unsafe object key: {0}")]
    UnsafeKey(String),
}

impl SyncError {
    /// Whether the per-object retry loop should try again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::Integrity { .. } | SyncError::IoError(_)
        )
    }
}
