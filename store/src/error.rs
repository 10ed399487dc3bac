//! Error types for the on-disk stores.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while persisting cache entries or checkpoints.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to create a storage directory.
    #[error("failed to create directory: {0}")]
    CreateDirectory(String),

    /// Failed to read a stored file.
    #[error("failed to read file: {0}")]
    ReadFile(String),

    /// Failed to write a stored file.
    #[error("failed to write file: {0}")]
    WriteFile(String),

    /// Failed to delete a stored file.
    #[error("failed to delete file: {0}")]
    DeleteFile(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation needs a checkpoint that has not been initialized or loaded.
    #[error("no active checkpoint: {0}")]
    NoCheckpoint(String),
}
