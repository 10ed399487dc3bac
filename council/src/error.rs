//! Error types for council construction.

use lectern_provider::ProviderError;
use thiserror::Error;

/// Result type alias for council setup.
pub type Result<T> = std::result::Result<T, CouncilError>;

/// Errors raised while building a council.
///
/// Extraction failures are reported as [`ProviderError`]s, not as this type.
#[derive(Error, Debug)]
pub enum CouncilError {
    /// Invalid configuration.
    #[error("invalid council configuration: {0}")]
    Config(String),

    /// A member provider could not be built.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}
