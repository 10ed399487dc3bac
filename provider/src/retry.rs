//! Retry policy for transient provider failures.
//!
//! Classification is a pure function of the error: the kind decides, and only
//! errors of kind [`ProviderErrorKind::Other`] fall back to message matching.
//! Back-off for attempt `i` is `min(base * 2^i, max)` scaled by a jitter
//! factor drawn from `[0.5, 1.0)`, raised to the provider's retry hint when
//! one is given.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderErrorKind, Result};

/// Message fragments that mark an otherwise unclassified error as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "429",
    "500",
    "502",
    "503",
    "504",
    "overloaded",
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "temporarily unavailable",
];

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Expected to succeed if tried again.
    Transient,
    /// Retrying will not help.
    Fatal,
}

/// Classify an error as transient or fatal.
pub fn classify(error: &ProviderError) -> Retryability {
    match error.kind {
        ProviderErrorKind::RateLimited
        | ProviderErrorKind::Connection
        | ProviderErrorKind::Timeout
        | ProviderErrorKind::ServerUnavailable => Retryability::Transient,
        ProviderErrorKind::Other => {
            let message = error.message.to_ascii_lowercase();
            if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
                Retryability::Transient
            } else {
                Retryability::Fatal
            }
        }
        ProviderErrorKind::Authentication
        | ProviderErrorKind::InvalidRequest
        | ProviderErrorKind::QuotaExceeded
        | ProviderErrorKind::Parse
        | ProviderErrorKind::ContentUnavailable
        | ProviderErrorKind::CouncilInsufficient => Retryability::Fatal,
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,

    /// Delay before the first retry, in seconds.
    pub base_delay_secs: f64,

    /// Upper bound on the exponential delay, in seconds.
    pub max_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 2.0,
            max_delay_secs: 60.0,
        }
    }
}

impl RetryConfig {
    /// Set the number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base and maximum delays.
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_secs = base.as_secs_f64();
        self.max_delay_secs = max.as_secs_f64();
        self
    }

    /// Check that the delays are usable.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.base_delay_secs.is_finite() && self.base_delay_secs >= 0.0) {
            return Err("base_delay_secs must be a non-negative number".to_string());
        }
        if !(self.max_delay_secs.is_finite() && self.max_delay_secs >= self.base_delay_secs) {
            return Err("max_delay_secs must be at least base_delay_secs".to_string());
        }
        Ok(())
    }
}

/// Runs async operations under exponential back-off with jitter.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(RetryConfig::default().with_max_retries(0))
    }

    /// The policy's configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry `attempt` (0-indexed), with fresh jitter.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let jitter = rand::rng().random_range(0.5..1.0);
        self.delay_with_jitter(attempt, hint, jitter)
    }

    fn delay_with_jitter(&self, attempt: u32, hint: Option<Duration>, jitter: f64) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let exponential = self.config.base_delay_secs * 2f64.powi(exponent);
        let computed = exponential.min(self.config.max_delay_secs) * jitter;
        let secs = match hint {
            Some(hint) => computed.max(hint.as_secs_f64()),
            None => computed,
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Run `op`, retrying transient failures.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with(op, |_, _, _| {}).await
    }

    /// Run `op`, retrying transient failures and reporting each retry to
    /// `on_retry` as `(error, attempt_index, delay)` before sleeping.
    ///
    /// Fatal errors and the final transient error are returned unchanged.
    pub async fn execute_with<T, F, Fut, R>(&self, mut op: F, on_retry: R) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        R: Fn(&ProviderError, u32, Duration),
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if classify(&err) == Retryability::Fatal {
                debug!("Fatal {} error, not retrying: {}", err.code(), err.message);
                return Err(err);
            }

            if attempt >= self.config.max_retries {
                warn!(
                    "Giving up after {} attempts: {err}",
                    self.config.max_retries + 1
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt, err.retry_after);
            warn!(
                "Transient {} error (retry {}/{}), waiting {delay:?}: {}",
                err.code(),
                attempt + 1,
                self.config.max_retries,
                err.message
            );
            on_retry(&err, attempt, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
