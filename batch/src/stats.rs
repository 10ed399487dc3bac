//! Run statistics, progress events and the final report.

use std::sync::Arc;
use std::time::Duration;

use lectern_store::CheckpointSummary;
use serde::{Deserialize, Serialize};

/// Aggregate counters for one run.
///
/// After a full pass `successful + failed + skipped + cached + resumed == total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Units submitted to the run.
    pub total: usize,
    /// Units extracted by the backend in this run.
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Units served from the result cache.
    pub cached: usize,
    /// Units already recorded in a resumed checkpoint.
    pub resumed: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl BatchStats {
    /// Units that reached an outcome in this run.
    pub fn completed(&self) -> usize {
        self.successful + self.failed + self.skipped + self.cached
    }
}

/// How one unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    Success,
    Cached,
    Failed,
    Skipped,
}

/// Reported to the progress callback after each completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub unit_id: String,
    pub outcome: UnitOutcome,
    /// Completions so far in this run.
    pub completed: usize,
    /// Units this run set out to process.
    pub pending: usize,
    pub stats: BatchStats,
}

/// Progress callback. Calls are serialized.
pub type ProgressCallback = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

/// Summary of a finished or cancelled run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub stats: BatchStats,
    pub checkpoint: Option<CheckpointSummary>,
    /// The run stopped before every pending unit was processed.
    pub cancelled: bool,
    pub duration: Duration,
}

impl BatchReport {
    /// Process exit code: non-zero only when a full pass left failures.
    pub fn exit_code(&self) -> i32 {
        if !self.cancelled && self.stats.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Dry-run cost estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Units that would be sent to the backend.
    pub billable_units: usize,
    /// Units answered by the cache.
    pub cached_units: usize,
    /// Units without readable content.
    pub skipped_units: usize,
    /// Units already done according to the checkpoint.
    pub resumed_units: usize,
    /// Content bytes of the billable units.
    pub total_bytes: u64,
    /// Estimated cost in USD.
    pub total_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(failed: usize, cancelled: bool) -> BatchReport {
        BatchReport {
            stats: BatchStats {
                total: 3,
                successful: 3 - failed,
                failed,
                ..BatchStats::default()
            },
            checkpoint: None,
            cancelled,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(report(0, false).exit_code(), 0);
        assert_eq!(report(1, false).exit_code(), 1);
        assert_eq!(report(1, true).exit_code(), 0);
    }
}
