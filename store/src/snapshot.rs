//! Accumulated output of a batch, persisted next to its checkpoint.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use lectern_provider::ExtractionResult;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fs::{read_json, remove_if_exists, write_json_atomic};

/// Successful results keyed by unit id, in first-seen order.
///
/// A newer result for the same unit replaces the older one in place.
#[derive(Debug)]
pub struct ResultSnapshot {
    path: PathBuf,
    results: IndexMap<String, ExtractionResult>,
}

impl ResultSnapshot {
    /// Create an empty snapshot that will be saved to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            results: IndexMap::new(),
        }
    }

    /// Load the snapshot at `path`. Missing or unreadable files give an empty snapshot.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let mut snapshot = Self::new(path);
        match read_json::<Vec<ExtractionResult>>(&snapshot.path).await {
            Ok(Some(results)) => {
                for result in results {
                    snapshot.insert(result);
                }
                debug!(
                    "Loaded {} results from {}",
                    snapshot.len(),
                    snapshot.path.display()
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable snapshot {}: {e}", snapshot.path.display()),
        }
        snapshot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a result. Unsuccessful results are ignored; returns whether it was kept.
    pub fn insert(&mut self, result: ExtractionResult) -> bool {
        if !result.success {
            return false;
        }
        self.results.insert(result.unit_id.clone(), result);
        true
    }

    pub fn get(&self, unit_id: &str) -> Option<&ExtractionResult> {
        self.results.get(unit_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results in first-seen order.
    pub fn results(&self) -> impl Iterator<Item = &ExtractionResult> {
        self.results.values()
    }

    /// Write the snapshot atomically.
    pub async fn save(&self) -> Result<()> {
        let results: Vec<&ExtractionResult> = self.results.values().collect();
        write_json_atomic(&self.path, &results).await
    }

    /// Empty the snapshot and delete its file.
    pub async fn clear(&mut self) -> Result<()> {
        self.results.clear();
        remove_if_exists(&self.path).await?;
        Ok(())
    }
}
