//! Batch orchestration: cache lookup, extraction, checkpointing.
//!
//! Each unit goes through:
//!
//! 1. skip if it has no readable content
//! 2. serve from the [`ResultCache`] when its fingerprint is cached
//! 3. read its text, skipping it when the text is too short
//! 4. extract through the [`Backend`], retrying transient provider errors
//! 5. cache the result and record the outcome in the checkpoint
//!
//! Outcomes are recorded under one lock that owns the statistics, the
//! checkpoint and the result snapshot. Every `checkpoint_every` completions
//! (and when the run ends or is cancelled) the checkpoint and snapshot are
//! written to disk. A unit's failure never stops the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use lectern_provider::{
    DocumentTextProvider, ExtractionResult, ExtractionUnit, ProviderError, RetryPolicy,
};
use lectern_store::{
    CheckpointState, CheckpointStore, Fingerprint, ResultCache, ResultSnapshot,
};
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::BatchConfig;
use crate::error::{BatchError, Result};
use crate::stats::{
    BatchProgress, BatchReport, BatchStats, CostEstimate, ProgressCallback, UnitOutcome,
};

/// Per-run options.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Overrides [`BatchConfig::concurrency`] when set.
    pub concurrency: Option<usize>,

    pub progress: Option<ProgressCallback>,

    /// Cancelling stops workers from taking new units. In-flight units finish.
    pub cancel: CancellationToken,

    /// Clear recorded failures so those units run again.
    pub retry_failed: bool,

    /// Clear the result cache before running.
    pub force: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&BatchProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_retry_failed(mut self, retry_failed: bool) -> Self {
        self.retry_failed = retry_failed;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("concurrency", &self.concurrency)
            .field("progress", &self.progress.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("retry_failed", &self.retry_failed)
            .field("force", &self.force)
            .finish()
    }
}

/// A running batch.
///
/// Results arrive on [`BatchRun::results`] as units complete: in submission
/// order when sequential, in completion order otherwise. Dropping the stream
/// does not stop the run.
pub struct BatchRun {
    results: ReceiverStream<ExtractionResult>,
    handle: JoinHandle<BatchReport>,
}

impl BatchRun {
    /// The stream of completed results.
    pub fn results(&mut self) -> &mut ReceiverStream<ExtractionResult> {
        &mut self.results
    }

    /// Wait for the run to end, discarding unread results.
    pub async fn finish(self) -> Result<BatchReport> {
        drop(self.results);
        self.handle
            .await
            .map_err(|e| BatchError::Join(e.to_string()))
    }

    /// Wait for the run to end, keeping every result.
    pub async fn collect(mut self) -> Result<(Vec<ExtractionResult>, BatchReport)> {
        let mut results = Vec::new();
        while let Some(result) = self.results.next().await {
            results.push(result);
        }
        let report = self.finish().await?;
        Ok((results, report))
    }
}

/// Drives batches of units through cache, backend and checkpoint.
pub struct BatchOrchestrator {
    config: BatchConfig,
    text_provider: Arc<dyn DocumentTextProvider>,
    cache: Option<ResultCache>,
    retry: RetryPolicy,
}

impl BatchOrchestrator {
    /// Create an orchestrator, opening the cache directory if caching is on.
    pub async fn new(
        config: BatchConfig,
        text_provider: Arc<dyn DocumentTextProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = if config.use_cache {
            Some(ResultCache::open(&config.cache_dir).await?)
        } else {
            None
        };
        let retry = RetryPolicy::new(config.retry.clone());
        Ok(Self {
            config,
            text_provider,
            cache,
            retry,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    async fn checkpoint_store(&self) -> Result<CheckpointStore> {
        Ok(CheckpointStore::open(&self.config.checkpoint_dir, &self.config.checkpoint_id).await?)
    }

    /// The last saved checkpoint, if any.
    pub async fn load_checkpoint(&self) -> Result<Option<CheckpointState>> {
        let mut store = self.checkpoint_store().await?;
        Ok(store.load().await.cloned())
    }

    /// Delete the checkpoint and result snapshot so the next run starts over.
    pub async fn reset(&self) -> Result<()> {
        self.checkpoint_store().await?.reset().await?;
        ResultSnapshot::new(self.config.snapshot_path())
            .clear()
            .await?;
        Ok(())
    }

    /// Start processing `units` against `backend`.
    ///
    /// Units already recorded in a resumed checkpoint are not processed
    /// again. Errors are returned only when the run cannot start.
    pub async fn run(
        &self,
        units: Vec<ExtractionUnit>,
        backend: Backend,
        options: RunOptions,
    ) -> Result<BatchRun> {
        let concurrency = options
            .concurrency
            .unwrap_or(self.config.concurrency)
            .max(1);

        let mut checkpoint = self.checkpoint_store().await?;
        let resumed = if self.config.resume {
            checkpoint.load().await.is_some()
        } else {
            checkpoint.reset().await?;
            false
        };

        let snapshot = if resumed {
            checkpoint.set_total_items(units.len())?;
            if options.retry_failed {
                checkpoint.clear_failed(None)?;
            }
            ResultSnapshot::load(self.config.snapshot_path()).await
        } else {
            let mut metadata = serde_json::Map::new();
            metadata.insert("backend".to_string(), json!(backend.name()));
            metadata.insert("concurrency".to_string(), json!(concurrency));
            checkpoint.initialize(units.len(), metadata).await?;
            let mut snapshot = ResultSnapshot::new(self.config.snapshot_path());
            snapshot.clear().await?;
            snapshot
        };

        if options.force {
            if let Some(cache) = &self.cache {
                cache.clear().await?;
            }
        }

        let pending: Vec<ExtractionUnit> = checkpoint
            .pending(&units)
            .into_iter()
            .cloned()
            .collect();
        info!(
            "Starting batch of {} units against {}: {} pending, concurrency {concurrency}{}",
            units.len(),
            backend.name(),
            pending.len(),
            if resumed { " (resumed)" } else { "" }
        );

        let stats = BatchStats {
            total: units.len(),
            resumed: units.len() - pending.len(),
            ..BatchStats::default()
        };

        let (tx, rx) = mpsc::channel(concurrency * 2);
        let ctx = Arc::new(RunContext {
            backend,
            text_provider: Arc::clone(&self.text_provider),
            cache: self.cache.clone(),
            retry: self.retry.clone(),
            min_text_chars: self.config.min_text_chars,
            checkpoint_every: self.config.checkpoint_every,
            track_current: concurrency == 1,
            progress: options.progress,
            tx,
            pending: pending.len(),
            ledger: Mutex::new(Ledger {
                stats,
                checkpoint,
                snapshot,
                completed: 0,
                since_save: 0,
            }),
        });

        let cancel = options.cancel;
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            if concurrency == 1 {
                run_sequential(&ctx, pending, &cancel).await;
            } else {
                run_pool(&ctx, pending, concurrency, &cancel).await;
            }
            ctx.finish(start.elapsed()).await
        });

        Ok(BatchRun {
            results: ReceiverStream::new(rx),
            handle,
        })
    }

    /// Estimate the cost of running `units` from their content sizes.
    ///
    /// Reads file metadata only. Units the checkpoint already holds and
    /// units the cache would answer cost nothing.
    pub async fn estimate_cost(&self, units: &[ExtractionUnit], backend: &Backend) -> CostEstimate {
        let mut checkpoint = self.checkpoint_store().await.ok();
        if let Some(store) = checkpoint.as_mut() {
            if self.config.resume {
                store.load().await;
            }
        }

        let mut estimate = CostEstimate::default();
        for unit in units {
            if checkpoint.as_ref().is_some_and(|c| c.is_done(&unit.unit_id)) {
                estimate.resumed_units += 1;
                continue;
            }
            let Some(content) = &unit.content else {
                estimate.skipped_units += 1;
                continue;
            };
            let Ok(stat) = content.stat().await else {
                estimate.skipped_units += 1;
                continue;
            };
            if let Some(cache) = &self.cache {
                let fingerprint = Fingerprint::from_parts(stat, &unit.model, &unit.prompt_version);
                if cache.get(&unit.unit_id, &fingerprint).await.is_some() {
                    estimate.cached_units += 1;
                    continue;
                }
            }
            estimate.billable_units += 1;
            estimate.total_bytes += stat.size;
            let length = usize::try_from(stat.size).unwrap_or(usize::MAX);
            estimate.total_cost += backend.estimate_cost(length);
        }

        info!(
            "Estimated ${:.2} for {} units ({} cached, {} skipped, {} already done)",
            estimate.total_cost,
            estimate.billable_units,
            estimate.cached_units,
            estimate.skipped_units,
            estimate.resumed_units
        );
        estimate
    }
}

/// State shared by every task of one run.
struct RunContext {
    backend: Backend,
    text_provider: Arc<dyn DocumentTextProvider>,
    cache: Option<ResultCache>,
    retry: RetryPolicy,
    min_text_chars: usize,
    checkpoint_every: usize,
    /// Record the in-flight unit in the checkpoint (sequential runs only).
    track_current: bool,
    progress: Option<ProgressCallback>,
    tx: mpsc::Sender<ExtractionResult>,
    pending: usize,
    ledger: Mutex<Ledger>,
}

/// Everything mutated by more than one worker.
struct Ledger {
    stats: BatchStats,
    checkpoint: CheckpointStore,
    snapshot: ResultSnapshot,
    completed: usize,
    since_save: usize,
}

impl Ledger {
    /// Best-effort save of the checkpoint and snapshot.
    async fn persist(&mut self, pause: bool) {
        let saved = if pause {
            self.checkpoint.pause().await
        } else {
            self.checkpoint.save().await
        };
        if let Err(e) = saved {
            warn!("Failed to save checkpoint: {e}");
        }
        if let Err(e) = self.snapshot.save().await {
            warn!("Failed to save result snapshot: {e}");
        }
        self.since_save = 0;
    }
}

enum Outcome {
    Skipped(String),
    Cached(ExtractionResult),
    Extracted(ExtractionResult),
    Failed(ProviderError, Duration),
}

async fn run_sequential(ctx: &RunContext, pending: Vec<ExtractionUnit>, cancel: &CancellationToken) {
    for unit in pending {
        if cancel.is_cancelled() {
            break;
        }
        ctx.process(unit).await;
    }
}

async fn run_pool(
    ctx: &Arc<RunContext>,
    pending: Vec<ExtractionUnit>,
    concurrency: usize,
    cancel: &CancellationToken,
) {
    let (work_tx, work_rx) = async_channel::unbounded();
    for unit in pending {
        if work_tx.send(unit).await.is_err() {
            break;
        }
    }
    work_tx.close();

    let workers: Vec<_> = (0..concurrency)
        .map(|worker| {
            let ctx = Arc::clone(ctx);
            let work_rx = work_rx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let unit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        unit = work_rx.recv() => match unit {
                            Ok(unit) => unit,
                            Err(_) => break,
                        },
                    };
                    ctx.process(unit).await;
                }
                debug!("Worker {worker} finished");
            })
        })
        .collect();

    for joined in join_all(workers).await {
        if let Err(e) = joined {
            warn!("Batch worker failed: {e}");
        }
    }
}

impl RunContext {
    async fn process(&self, unit: ExtractionUnit) {
        if self.track_current {
            if let Err(e) = self.ledger.lock().await.checkpoint.start_item(&unit.unit_id) {
                warn!("Checkpoint not updated for {}: {e}", unit.unit_id);
            }
        }
        let outcome = self.extract(&unit).await;
        self.record(&unit.unit_id, outcome).await;
    }

    async fn extract(&self, unit: &ExtractionUnit) -> Outcome {
        let Some(content) = &unit.content else {
            return Outcome::Skipped("no content".to_string());
        };
        let stat = match content.stat().await {
            Ok(stat) => stat,
            Err(e) => return Outcome::Skipped(e.message),
        };
        let fingerprint = Fingerprint::from_parts(stat, &unit.model, &unit.prompt_version);

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&unit.unit_id, &fingerprint).await {
                return Outcome::Cached(entry.result.into_cached());
            }
        }

        let text = match self.text_provider.get_text(content).await {
            Ok(text) => text,
            Err(e) => return Outcome::Skipped(e.message),
        };
        let chars = text.trim().chars().count();
        if chars < self.min_text_chars {
            return Outcome::Skipped(format!(
                "text too short ({chars} < {} chars)",
                self.min_text_chars
            ));
        }

        let start = Instant::now();
        let request = unit.request(text);
        let unit_id = unit.unit_id.as_str();
        let extracted = self.backend.extract(&request, &self.retry).await;

        match extracted {
            Ok(result) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.set(unit_id, &fingerprint, &result).await {
                        warn!("Failed to cache result for {unit_id}: {e}");
                    }
                }
                Outcome::Extracted(result)
            }
            Err(err) => Outcome::Failed(err, start.elapsed()),
        }
    }

    async fn record(&self, unit_id: &str, outcome: Outcome) {
        let (result, unit_outcome) = {
            let mut ledger = self.ledger.lock().await;
            let ledger = &mut *ledger;

            let (result, unit_outcome, recorded) = match outcome {
                Outcome::Skipped(reason) => {
                    debug!("Skipping {unit_id}: {reason}");
                    ledger.stats.skipped += 1;
                    let recorded = ledger.checkpoint.skip_item(unit_id, &reason);
                    (
                        ExtractionResult::skipped(unit_id, reason),
                        UnitOutcome::Skipped,
                        recorded,
                    )
                }
                Outcome::Cached(result) => {
                    debug!("Served {unit_id} from cache");
                    ledger.stats.cached += 1;
                    ledger.snapshot.insert(result.clone());
                    let recorded = ledger.checkpoint.complete_item(unit_id, true, None);
                    (result, UnitOutcome::Cached, recorded)
                }
                Outcome::Extracted(result) => {
                    debug!("Extracted {unit_id} in {}ms", result.duration_ms);
                    ledger.stats.successful += 1;
                    ledger.stats.input_tokens += result.input_tokens;
                    ledger.stats.output_tokens += result.output_tokens;
                    ledger.snapshot.insert(result.clone());
                    let recorded = ledger.checkpoint.complete_item(unit_id, true, None);
                    (result, UnitOutcome::Success, recorded)
                }
                Outcome::Failed(err, duration) => {
                    warn!("Extraction failed for {unit_id}: {err}");
                    ledger.stats.failed += 1;
                    let recorded = ledger.checkpoint.complete_item(unit_id, false, Some(&err));
                    (
                        ExtractionResult::failure(unit_id, err.to_string(), duration),
                        UnitOutcome::Failed,
                        recorded,
                    )
                }
            };
            if let Err(e) = recorded {
                warn!("Checkpoint not updated for {unit_id}: {e}");
            }

            ledger.completed += 1;
            ledger.since_save += 1;
            if ledger.since_save >= self.checkpoint_every {
                ledger.persist(false).await;
            }

            if let Some(progress) = &self.progress {
                progress(&BatchProgress {
                    unit_id: unit_id.to_string(),
                    outcome: unit_outcome,
                    completed: ledger.completed,
                    pending: self.pending,
                    stats: ledger.stats.clone(),
                });
            }
            (result, unit_outcome)
        };

        if self.tx.send(result).await.is_err() {
            debug!("Result stream closed; dropped {unit_outcome:?} result for {unit_id}");
        }
    }

    async fn finish(&self, duration: Duration) -> BatchReport {
        let mut ledger = self.ledger.lock().await;
        let cancelled = ledger.completed < self.pending;
        ledger.persist(true).await;

        let stats = ledger.stats.clone();
        if cancelled {
            info!(
                "Batch cancelled after {}/{} units; checkpoint saved",
                ledger.completed, self.pending
            );
        } else {
            info!(
                "Batch finished in {duration:?}: {} succeeded, {} cached, {} failed, {} skipped, {} from checkpoint",
                stats.successful, stats.cached, stats.failed, stats.skipped, stats.resumed
            );
        }

        BatchReport {
            stats,
            checkpoint: ledger.checkpoint.state().map(CheckpointState::summary),
            cancelled,
            duration,
        }
    }
}
