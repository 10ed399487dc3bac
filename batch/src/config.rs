//! Configuration for batch runs.

use std::path::{Path, PathBuf};

use lectern_council::{Council, CouncilConfig};
use lectern_provider::{ProviderRegistry, ProviderSettings, RetryConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::Backend;
use crate::error::{BatchError, Result};

/// Settings for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Where cached results are stored.
    pub cache_dir: PathBuf,

    /// Where checkpoints and result snapshots are stored.
    pub checkpoint_dir: PathBuf,

    /// Name of the checkpoint file (without extension).
    pub checkpoint_id: String,

    /// Concurrent units. `1` runs sequentially in submission order.
    pub concurrency: usize,

    /// Persist the checkpoint and snapshot after this many completions.
    pub checkpoint_every: usize,

    /// Units whose text is shorter than this are skipped.
    pub min_text_chars: usize,

    /// Continue from an existing checkpoint instead of starting over.
    pub resume: bool,

    /// Consult and fill the result cache.
    pub use_cache: bool,

    /// Retry behavior for provider calls.
    pub retry: RetryConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let root = dirs::cache_dir().unwrap_or_default().join("lectern");
        Self {
            cache_dir: root.join("results"),
            checkpoint_dir: root.join("checkpoints"),
            checkpoint_id: "default".to_string(),
            concurrency: 1,
            checkpoint_every: 10,
            min_text_chars: 100,
            resume: true,
            use_cache: true,
            retry: RetryConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Keep every file under one directory.
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.cache_dir = root.join("results");
        self.checkpoint_dir = root.join("checkpoints");
        self
    }

    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = id.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every;
        self
    }

    pub fn with_min_text_chars(mut self, min: usize) -> Self {
        self.min_text_chars = min;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Path of the result snapshot written next to the checkpoint.
    pub fn snapshot_path(&self) -> PathBuf {
        self.checkpoint_dir
            .join(format!("{}.results.json", self.checkpoint_id))
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_every == 0 {
            return Err(BatchError::Config(
                "checkpoint_every must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_id.is_empty()
            || self.checkpoint_id.contains(std::path::is_separator)
        {
            return Err(BatchError::Config(format!(
                "invalid checkpoint id: {:?}",
                self.checkpoint_id
            )));
        }
        self.retry.validate().map_err(BatchError::Config)
    }
}

/// Everything needed to run a pipeline, as read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch: BatchConfig,

    /// Single provider, used when no council is configured.
    pub provider: Option<ProviderSettings>,

    /// Multi-provider council.
    pub council: Option<CouncilConfig>,
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.batch.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            BatchError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded pipeline configuration from {}", path.display());
        Ok(config)
    }

    /// Build the extraction backend. A council with members wins over a
    /// single provider.
    pub fn backend(&self, registry: &ProviderRegistry) -> Result<Backend> {
        if let Some(council) = self.council.as_ref().filter(|c| !c.members.is_empty()) {
            let council = Council::from_config(council.clone(), registry)?;
            return Ok(Backend::council(council));
        }
        match &self.provider {
            Some(settings) => Ok(Backend::Single(registry.build(settings)?)),
            None => Err(BatchError::Config(
                "no provider or council configured".to_string(),
            )),
        }
    }
}
