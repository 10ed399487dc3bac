//! Extraction providers.
//!
//! Concrete backends (Anthropic, OpenAI, ...) live outside this workspace. The
//! pipeline depends only on the [`Provider`] trait; a [`ProviderRegistry`]
//! builds providers from configuration keyed by [`ProviderKind`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderErrorKind, Result};
use crate::types::{ExtractionRequest, ExtractionResult};

/// Trait for extraction backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the name of this provider instance.
    fn name(&self) -> &str;

    /// Which backend family this provider belongs to.
    fn kind(&self) -> ProviderKind;

    /// Run one extraction.
    ///
    /// An `Ok` result always carries a payload; failures are reported as
    /// [`ProviderError`] so that the retry policy can classify them.
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult>;

    /// Estimated cost in USD of extracting a text of the given length.
    fn estimate_cost(&self, text_length: usize) -> f64;
}

/// The closed set of supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI Chat Completions / Responses API.
    OpenAi,
    /// Google Gemini API.
    Gemini,
    /// Local Ollama server.
    Ollama,
    /// Scripted in-process provider.
    Mock,
}

impl ProviderKind {
    /// The configuration name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "open_ai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "mock" => Ok(Self::Mock),
            other => Err(ProviderError::new(
                ProviderErrorKind::InvalidRequest,
                format!("unknown provider kind: {other}"),
            )),
        }
    }
}

/// Settings handed to a provider builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Backend family.
    pub kind: ProviderKind,

    /// Instance name; defaults to the kind's name.
    #[serde(default)]
    pub name: Option<String>,

    /// Model identifier passed to the backend.
    #[serde(default)]
    pub model: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Backend-specific options.
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl ProviderSettings {
    /// Create settings for a kind with everything else defaulted.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            name: None,
            model: None,
            api_key_env: None,
            options: HashMap::new(),
        }
    }

    /// Set the instance name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The instance name, falling back to the kind.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.as_str().to_string())
    }
}

type Builder = Box<dyn Fn(&ProviderSettings) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Factory that turns [`ProviderSettings`] into providers.
///
/// Builders are registered explicitly per kind by the embedding application.
#[derive(Default)]
pub struct ProviderRegistry {
    builders: HashMap<ProviderKind, Builder>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the builder for a kind, replacing any previous one.
    pub fn register<F>(&mut self, kind: ProviderKind, builder: F)
    where
        F: Fn(&ProviderSettings) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        debug!("Registered provider builder for {kind}");
        self.builders.insert(kind, Box::new(builder));
    }

    /// Whether a builder exists for the kind.
    pub fn supports(&self, kind: ProviderKind) -> bool {
        self.builders.contains_key(&kind)
    }

    /// Build a provider from settings.
    pub fn build(&self, settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
        let builder = self.builders.get(&settings.kind).ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::InvalidRequest,
                format!("no provider registered for kind {}", settings.kind),
            )
        })?;
        builder(settings)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}
