//! Scripted provider for tests and dry runs.
//!
//! # Examples
//!
//! ```
//! use lectern_provider::{ExtractionUnit, MockProvider, Provider};
//! use serde_json::json;
//!
//! # async fn example() {
//! let provider = MockProvider::new("mock")
//!     .with_payload(json!({"thesis": "Caching works."}).as_object().cloned().unwrap());
//!
//! let unit = ExtractionUnit::new("u1", "Title", "model", "v1");
//! let result = provider.extract(&unit.request("text")).await.unwrap();
//! assert_eq!(result.payload.unwrap()["thesis"], "Caching works.");
//! assert_eq!(provider.call_count(), 1);
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{ProviderError, Result};
use crate::parse::parse_payload;
use crate::provider::{Provider, ProviderKind};
use crate::types::{ExtractionRequest, ExtractionResult, Payload};

#[derive(Debug, Default)]
struct Script {
    payloads: HashMap<String, Payload>,
    raw_responses: HashMap<String, String>,
    queued_failures: HashMap<String, VecDeque<ProviderError>>,
    permanent_failures: HashMap<String, ProviderError>,
    calls: Vec<String>,
}

/// In-process provider that returns scripted payloads and errors.
///
/// Clones share the same script and call counter.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    kind: ProviderKind,
    default_payload: Payload,
    latency: Option<Duration>,
    cost_per_char: f64,
    script: Arc<Mutex<Script>>,
    call_count: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create a provider that answers every unit with an empty payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Mock,
            default_payload: Payload::new(),
            latency: None,
            cost_per_char: 0.0,
            script: Arc::new(Mutex::new(Script::default())),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report a different provider kind.
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Payload returned for units without a specific script.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.default_payload = payload;
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Cost estimate per character of input text.
    pub fn with_cost_per_char(mut self, cost_per_char: f64) -> Self {
        self.cost_per_char = cost_per_char;
        self
    }

    /// Return `payload` for `unit_id`.
    pub fn set_payload(&self, unit_id: impl Into<String>, payload: Payload) {
        self.script().payloads.insert(unit_id.into(), payload);
    }

    /// Answer `unit_id` with raw model text instead of a payload.
    ///
    /// The text goes through [`parse_payload`], so malformed output surfaces
    /// as a parse error carrying the raw response.
    pub fn set_raw_response(&self, unit_id: impl Into<String>, raw: impl Into<String>) {
        self.script().raw_responses.insert(unit_id.into(), raw.into());
    }

    /// Fail the next `times` calls for `unit_id` with `error`, then succeed.
    pub fn fail_times(&self, unit_id: impl Into<String>, error: ProviderError, times: usize) {
        let mut script = self.script();
        let queue = script.queued_failures.entry(unit_id.into()).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Fail every call for `unit_id` with `error`.
    pub fn fail_always(&self, unit_id: impl Into<String>, error: ProviderError) {
        self.script()
            .permanent_failures
            .insert(unit_id.into(), error);
    }

    /// Stop failing calls for `unit_id`.
    pub fn clear_failures(&self, unit_id: &str) {
        let mut script = self.script();
        script.queued_failures.remove(unit_id);
        script.permanent_failures.remove(unit_id);
    }

    /// Total number of `extract` calls.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Number of `extract` calls for one unit.
    pub fn calls_for(&self, unit_id: &str) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|id| id.as_str() == unit_id)
            .count()
    }

    /// Unit ids in call order.
    pub fn call_log(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    /// Reset the call counter and log.
    pub fn reset_calls(&self) {
        self.call_count.store(0, Ordering::SeqCst);
        self.script().calls.clear();
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
        let start = Instant::now();
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.script().calls.push(request.unit_id.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let raw = {
            let mut script = self.script();
            if let Some(err) = script.permanent_failures.get(&request.unit_id) {
                return Err(err.clone());
            }
            if let Some(err) = script
                .queued_failures
                .get_mut(&request.unit_id)
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            match script.raw_responses.get(&request.unit_id) {
                Some(raw) => raw.clone(),
                None => {
                    let payload = script
                        .payloads
                        .get(&request.unit_id)
                        .unwrap_or(&self.default_payload);
                    serde_json::to_string(payload)
                        .map_err(|e| ProviderError::other(format!("unserializable payload: {e}")))?
                }
            }
        };

        let payload = parse_payload(&raw)?;
        let output_chars = raw.len();
        Ok(ExtractionResult::success(
            &request.unit_id,
            payload,
            format!("{}:{}", self.name, request.model),
            start.elapsed(),
        )
        .with_tokens(
            request.text.len().div_ceil(4) as u64,
            output_chars.div_ceil(4) as u64,
        ))
    }

    fn estimate_cost(&self, text_length: usize) -> f64 {
        text_length as f64 * self.cost_per_char
    }
}
