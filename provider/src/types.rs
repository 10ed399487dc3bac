//! Core data model shared by every stage of the pipeline.

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

/// A structured extraction. Its shape is defined by the prompt, not by the pipeline.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Reference to the source content of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    /// Path of the source document.
    pub path: PathBuf,
}

impl ContentRef {
    /// Create a reference to a file on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The referenced path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time and size of the referenced file.
    ///
    /// Only file metadata is read, never the contents.
    pub async fn stat(&self) -> Result<ContentStat> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            ProviderError::content_unavailable(format!("{}: {e}", self.path.display()))
        })?;

        let modified_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());

        Ok(ContentStat {
            modified_nanos,
            size: metadata.len(),
        })
    }
}

/// Cheap change-detection metadata for a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentStat {
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_nanos: u128,

    /// Size in bytes.
    pub size: u64,
}

/// One document submitted for extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionUnit {
    /// Stable identifier of the item (e.g. a bibliographic key).
    pub unit_id: String,

    /// Source content, or `None` when the item has nothing to extract from.
    pub content: Option<ContentRef>,

    /// Title of the item.
    pub title: String,

    /// Author names.
    #[serde(default)]
    pub authors: Vec<String>,

    /// Publication year, if known.
    pub year: Option<i32>,

    /// Item type (journal article, book, report, ...).
    #[serde(default)]
    pub item_type: String,

    /// Model the extraction targets.
    pub model: String,

    /// Version of the prompt used for extraction.
    pub prompt_version: String,
}

impl ExtractionUnit {
    /// Create a unit with the required identity fields.
    pub fn new(
        unit_id: impl Into<String>,
        title: impl Into<String>,
        model: impl Into<String>,
        prompt_version: impl Into<String>,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            content: None,
            title: title.into(),
            authors: Vec::new(),
            year: None,
            item_type: String::new(),
            model: model.into(),
            prompt_version: prompt_version.into(),
        }
    }

    /// Set the source content.
    pub fn with_content(mut self, path: impl Into<PathBuf>) -> Self {
        self.content = Some(ContentRef::new(path));
        self
    }

    /// Set the authors.
    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    /// Set the publication year.
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Set the item type.
    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    /// Build the provider-facing request for this unit.
    pub fn request(&self, text: impl Into<String>) -> ExtractionRequest {
        ExtractionRequest {
            unit_id: self.unit_id.clone(),
            title: self.title.clone(),
            authors: self.authors.clone(),
            year: self.year,
            item_type: self.item_type.clone(),
            text: text.into(),
            model: self.model.clone(),
        }
    }
}

/// What a provider receives for one extraction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub unit_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub item_type: String,
    pub text: String,
    pub model: String,
}

/// Outcome of extracting one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Unit this result belongs to.
    pub unit_id: String,

    /// Whether extraction produced a payload.
    pub success: bool,

    /// The structured extraction, present on success.
    pub payload: Option<Payload>,

    /// Failure detail, present on failure.
    pub error: Option<String>,

    /// Wall time spent producing the result, in milliseconds.
    pub duration_ms: u64,

    /// Model (or council) that produced the result.
    pub model_used: String,

    /// Prompt tokens consumed.
    pub input_tokens: u64,

    /// Completion tokens produced.
    pub output_tokens: u64,

    /// When the result was produced.
    pub timestamp: DateTime<Utc>,

    /// Set when the result was served from the result cache.
    #[serde(default)]
    pub cached: bool,

    /// Set when the unit was skipped for lack of content.
    #[serde(default)]
    pub skipped: bool,
}

impl ExtractionResult {
    /// Create a successful result.
    pub fn success(
        unit_id: impl Into<String>,
        payload: Payload,
        model_used: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            success: true,
            payload: Some(payload),
            error: None,
            duration_ms: duration_ms(duration),
            model_used: model_used.into(),
            input_tokens: 0,
            output_tokens: 0,
            timestamp: Utc::now(),
            cached: false,
            skipped: false,
        }
    }

    /// Create a failed result.
    pub fn failure(unit_id: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            unit_id: unit_id.into(),
            success: false,
            payload: None,
            error: Some(error.into()),
            duration_ms: duration_ms(duration),
            model_used: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            timestamp: Utc::now(),
            cached: false,
            skipped: false,
        }
    }

    /// Create a result for a unit that was skipped.
    pub fn skipped(unit_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::failure(unit_id, reason, Duration::ZERO)
        }
    }

    /// Record token usage.
    pub fn with_tokens(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    /// Mark the result as served from cache.
    pub fn into_cached(mut self) -> Self {
        self.cached = true;
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
