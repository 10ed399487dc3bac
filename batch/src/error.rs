//! Error types for batch runs.

use lectern_council::CouncilError;
use lectern_provider::ProviderError;
use lectern_store::StoreError;
use thiserror::Error;

/// Result type alias for batch operations.
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors that stop a batch from starting or finishing.
///
/// Individual unit failures never surface here; they are recorded in the
/// checkpoint and reported as failed results.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Checkpoint or cache storage failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A provider could not be built.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A council could not be built.
    #[error("council error: {0}")]
    Council(#[from] CouncilError),

    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A batch task panicked or was aborted.
    #[error("task failed: {0}")]
    Join(String),
}
