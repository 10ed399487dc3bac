//! Document text retrieval.

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::types::ContentRef;

/// Turns a content reference into plain text.
///
/// Converting PDFs, EPUBs and the like is the implementor's business; the
/// pipeline only needs text or a `ContentUnavailable` error.
#[async_trait]
pub trait DocumentTextProvider: Send + Sync {
    /// Get the text of the referenced document.
    async fn get_text(&self, content: &ContentRef) -> Result<String>;
}

/// Reads UTF-8 text files as-is.
#[derive(Debug, Clone, Default)]
pub struct PlainTextProvider;

impl PlainTextProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentTextProvider for PlainTextProvider {
    async fn get_text(&self, content: &ContentRef) -> Result<String> {
        let text = fs::read_to_string(content.path()).await.map_err(|e| {
            ProviderError::content_unavailable(format!("{}: {e}", content.path().display()))
        })?;
        debug!("Read {} chars from {}", text.len(), content.path().display());
        Ok(text)
    }
}
