//! Durable batch progress for resumable runs.
//!
//! A [`CheckpointState`] records the outcome of every unit seen so far. It
//! moves through [`CheckpointPhase`]s:
//!
//! ```text
//! NotStarted ──initialize──► Initialized ──start/complete──► InProgress ⇄ Paused
//! ```
//!
//! Each unit id has at most one outcome (processed, failed or skipped), and
//! `processed_count == success_count + failed_count + skipped_count` holds
//! after every mutation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use lectern_provider::{ExtractionUnit, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::fs::{ensure_dir, read_json, remove_if_exists, write_json_atomic};

/// Lifecycle phase of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    /// No checkpoint exists.
    #[default]
    NotStarted,
    /// Created, no unit started yet.
    Initialized,
    /// Units are being processed.
    InProgress,
    /// Saved at a stopping point; a later run resumes from here.
    Paused,
}

/// A unit whose extraction failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub unit_id: String,
    pub error_message: String,
    /// Stable error code, e.g. `rate_limited` or `parse`.
    pub error_type: String,
    pub timestamp: DateTime<Utc>,
    /// How many times the unit failed again after its first failure.
    pub retry_count: u32,
}

/// Snapshot of batch progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Identifier of the checkpoint file.
    pub checkpoint_id: String,

    /// Identifier of the run that created this state.
    pub run_id: Uuid,

    pub phase: CheckpointPhase,

    pub total_items: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,

    /// Unit currently being extracted, if any. Only one unit is tracked, so
    /// concurrent runs leave this unset.
    pub current_item: Option<String>,

    /// Units extracted successfully.
    pub processed_ids: IndexSet<String>,

    /// Units that failed, in first-failure order.
    pub failed_items: IndexMap<String, FailedItem>,

    /// Units skipped for lack of content.
    pub skipped_ids: IndexSet<String>,

    /// Caller-supplied run metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    /// Create a fresh state with every counter at zero.
    pub fn new(
        checkpoint_id: impl Into<String>,
        total_items: usize,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            checkpoint_id: checkpoint_id.into(),
            run_id: Uuid::new_v4(),
            phase: CheckpointPhase::Initialized,
            total_items,
            processed_count: 0,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            current_item: None,
            processed_ids: IndexSet::new(),
            failed_items: IndexMap::new(),
            skipped_ids: IndexSet::new(),
            metadata,
            started_at: now,
            updated_at: now,
        }
    }

    /// Mark a unit as in flight.
    pub fn start_item(&mut self, unit_id: &str) {
        self.current_item = Some(unit_id.to_string());
        self.phase = CheckpointPhase::InProgress;
    }

    /// Record the outcome of an extraction.
    ///
    /// A unit that fails again keeps its existing [`FailedItem`] with
    /// `retry_count` incremented. Any other earlier outcome is un-counted
    /// before the new one is recorded.
    pub fn complete_item(&mut self, unit_id: &str, success: bool, error: Option<&ProviderError>) {
        self.clear_current(unit_id);
        self.phase = CheckpointPhase::InProgress;

        if !success {
            if let Some(existing) = self.failed_items.get_mut(unit_id) {
                existing.retry_count += 1;
                existing.timestamp = Utc::now();
                if let Some(error) = error {
                    existing.error_message = error.message.clone();
                    existing.error_type = error.code().to_string();
                }
                debug!("{unit_id} failed again (retry {})", existing.retry_count);
                return;
            }
        }

        self.forget(unit_id);
        self.processed_count += 1;

        if success {
            self.success_count += 1;
            self.processed_ids.insert(unit_id.to_string());
        } else {
            let (error_message, error_type) = error.map_or_else(
                || ("unknown error".to_string(), "other".to_string()),
                |e| (e.message.clone(), e.code().to_string()),
            );
            self.failed_count += 1;
            self.failed_items.insert(
                unit_id.to_string(),
                FailedItem {
                    unit_id: unit_id.to_string(),
                    error_message,
                    error_type,
                    timestamp: Utc::now(),
                    retry_count: 0,
                },
            );
        }
    }

    /// Record a unit skipped for lack of extractable content.
    pub fn skip_item(&mut self, unit_id: &str, reason: &str) {
        self.clear_current(unit_id);
        self.phase = CheckpointPhase::InProgress;
        self.forget(unit_id);
        self.processed_count += 1;
        self.skipped_count += 1;
        self.skipped_ids.insert(unit_id.to_string());
        debug!("Skipped {unit_id}: {reason}");
    }

    /// Drop failure records so the units become pending again.
    ///
    /// `None` clears every failure. Returns the number of records removed.
    pub fn clear_failed(&mut self, unit_ids: Option<&[String]>) -> usize {
        let before = self.failed_items.len();
        match unit_ids {
            Some(ids) => {
                for id in ids {
                    self.failed_items.shift_remove(id);
                }
            }
            None => self.failed_items.clear(),
        }
        let removed = before - self.failed_items.len();
        self.failed_count = self.failed_count.saturating_sub(removed);
        self.processed_count = self.processed_count.saturating_sub(removed);
        removed
    }

    pub fn is_processed(&self, unit_id: &str) -> bool {
        self.processed_ids.contains(unit_id)
    }

    pub fn is_failed(&self, unit_id: &str) -> bool {
        self.failed_items.contains_key(unit_id)
    }

    pub fn is_skipped(&self, unit_id: &str) -> bool {
        self.skipped_ids.contains(unit_id)
    }

    /// Whether the unit has any recorded outcome.
    pub fn is_done(&self, unit_id: &str) -> bool {
        self.is_processed(unit_id) || self.is_failed(unit_id) || self.is_skipped(unit_id)
    }

    /// Units without a recorded outcome, in input order.
    pub fn pending<'a>(&self, units: &'a [ExtractionUnit]) -> Vec<&'a ExtractionUnit> {
        units.iter().filter(|u| !self.is_done(&u.unit_id)).collect()
    }

    /// Fraction of `total_items` with an outcome, in `[0, 1]`.
    pub fn progress_fraction(&self) -> f64 {
        if self.total_items == 0 {
            return 1.0;
        }
        (self.processed_count as f64 / self.total_items as f64).min(1.0)
    }

    /// Whether the counters agree with each other and with the id sets, and
    /// no id has more than one outcome.
    pub fn is_consistent(&self) -> bool {
        let counters_match = self.processed_count
            == self.success_count + self.failed_count + self.skipped_count
            && self.success_count == self.processed_ids.len()
            && self.failed_count == self.failed_items.len()
            && self.skipped_count == self.skipped_ids.len();
        let disjoint = !self
            .processed_ids
            .iter()
            .any(|id| self.failed_items.contains_key(id) || self.skipped_ids.contains(id))
            && !self.failed_items.keys().any(|id| self.skipped_ids.contains(id));
        counters_match && disjoint
    }

    /// Counters without the id sets.
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            run_id: self.run_id,
            total_items: self.total_items,
            processed: self.processed_count,
            success: self.success_count,
            failed: self.failed_count,
            skipped: self.skipped_count,
            progress: self.progress_fraction(),
        }
    }

    fn clear_current(&mut self, unit_id: &str) {
        if self.current_item.as_deref() == Some(unit_id) {
            self.current_item = None;
        }
    }

    /// Remove any outcome recorded for `unit_id`, adjusting counters.
    fn forget(&mut self, unit_id: &str) {
        if self.processed_ids.shift_remove(unit_id) {
            self.success_count = self.success_count.saturating_sub(1);
            self.processed_count = self.processed_count.saturating_sub(1);
        }
        if self.failed_items.shift_remove(unit_id).is_some() {
            self.failed_count = self.failed_count.saturating_sub(1);
            self.processed_count = self.processed_count.saturating_sub(1);
        }
        if self.skipped_ids.shift_remove(unit_id) {
            self.skipped_count = self.skipped_count.saturating_sub(1);
            self.processed_count = self.processed_count.saturating_sub(1);
        }
    }
}

/// Checkpoint counters for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub run_id: Uuid,
    pub total_items: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub progress: f64,
}

/// Persists one [`CheckpointState`] as `<dir>/<checkpoint_id>.checkpoint.json`.
#[derive(Debug)]
pub struct CheckpointStore {
    checkpoint_id: String,
    path: PathBuf,
    state: Option<CheckpointState>,
}

impl CheckpointStore {
    /// Open the store, creating `dir` if needed. Nothing is loaded yet.
    pub async fn open(dir: impl AsRef<Path>, checkpoint_id: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref();
        ensure_dir(dir).await?;
        let checkpoint_id = checkpoint_id.into();
        let path = dir.join(format!("{checkpoint_id}.checkpoint.json"));
        Ok(Self {
            checkpoint_id,
            path,
            state: None,
        })
    }

    /// Path of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory state, if initialized or loaded.
    pub fn state(&self) -> Option<&CheckpointState> {
        self.state.as_ref()
    }

    pub fn phase(&self) -> CheckpointPhase {
        self.state
            .as_ref()
            .map_or(CheckpointPhase::NotStarted, |s| s.phase)
    }

    /// Start a new run, discarding any in-memory state, and persist it.
    pub async fn initialize(
        &mut self,
        total_items: usize,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<&CheckpointState> {
        let state = CheckpointState::new(&self.checkpoint_id, total_items, metadata);
        info!(
            "Initialized checkpoint {} (run {}) for {total_items} items",
            self.checkpoint_id, state.run_id
        );
        let state = self.state.insert(state);
        write_json_atomic(&self.path, state).await?;
        Ok(state)
    }

    /// Load the last saved state. Missing or unreadable files yield `None`.
    pub async fn load(&mut self) -> Option<&CheckpointState> {
        match read_json::<CheckpointState>(&self.path).await {
            Ok(Some(state)) => {
                if !state.is_consistent() {
                    warn!(
                        "Checkpoint {} has inconsistent counters; ignoring it",
                        self.path.display()
                    );
                    return None;
                }
                info!(
                    "Loaded checkpoint {}: {}/{} processed",
                    self.checkpoint_id, state.processed_count, state.total_items
                );
                Some(&*self.state.insert(state))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {e}", self.path.display());
                None
            }
        }
    }

    fn state_mut(&mut self) -> Result<&mut CheckpointState> {
        self.state
            .as_mut()
            .ok_or_else(|| StoreError::NoCheckpoint(self.checkpoint_id.clone()))
    }

    /// Update the expected number of items, e.g. when resuming with a new unit list.
    pub fn set_total_items(&mut self, total_items: usize) -> Result<()> {
        self.state_mut()?.total_items = total_items;
        Ok(())
    }

    /// Mark a unit as in flight. Not persisted.
    pub fn start_item(&mut self, unit_id: &str) -> Result<()> {
        self.state_mut()?.start_item(unit_id);
        Ok(())
    }

    /// See [`CheckpointState::complete_item`].
    pub fn complete_item(
        &mut self,
        unit_id: &str,
        success: bool,
        error: Option<&ProviderError>,
    ) -> Result<()> {
        self.state_mut()?.complete_item(unit_id, success, error);
        Ok(())
    }

    /// See [`CheckpointState::skip_item`].
    pub fn skip_item(&mut self, unit_id: &str, reason: &str) -> Result<()> {
        self.state_mut()?.skip_item(unit_id, reason);
        Ok(())
    }

    /// See [`CheckpointState::clear_failed`].
    pub fn clear_failed(&mut self, unit_ids: Option<&[String]>) -> Result<usize> {
        let removed = self.state_mut()?.clear_failed(unit_ids);
        info!("Cleared {removed} failed items for retry");
        Ok(removed)
    }

    /// Persist the current state, replacing the file atomically.
    pub async fn save(&mut self) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Err(StoreError::NoCheckpoint(self.checkpoint_id.clone()));
        };
        state.updated_at = Utc::now();
        write_json_atomic(&self.path, state).await?;
        debug!(
            "Saved checkpoint {}: {}/{}",
            state.checkpoint_id, state.processed_count, state.total_items
        );
        Ok(())
    }

    /// Save and mark the run as paused.
    pub async fn pause(&mut self) -> Result<()> {
        let state = self.state_mut()?;
        state.phase = CheckpointPhase::Paused;
        state.current_item = None;
        self.save().await
    }

    /// Delete the persisted state and forget the in-memory one.
    pub async fn reset(&mut self) -> Result<()> {
        self.state = None;
        if remove_if_exists(&self.path).await? {
            info!("Reset checkpoint {}", self.checkpoint_id);
        }
        Ok(())
    }

    pub fn is_processed(&self, unit_id: &str) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_processed(unit_id))
    }

    pub fn is_failed(&self, unit_id: &str) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_failed(unit_id))
    }

    pub fn is_skipped(&self, unit_id: &str) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_skipped(unit_id))
    }

    pub fn is_done(&self, unit_id: &str) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_done(unit_id))
    }

    /// Units without a recorded outcome. Every unit is pending without state.
    pub fn pending<'a>(&self, units: &'a [ExtractionUnit]) -> Vec<&'a ExtractionUnit> {
        match &self.state {
            Some(state) => state.pending(units),
            None => units.iter().collect(),
        }
    }

    pub fn progress_fraction(&self) -> f64 {
        self.state
            .as_ref()
            .map_or(0.0, CheckpointState::progress_fraction)
    }
}
