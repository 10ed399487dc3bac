//! Error types for provider calls.
//!
//! Provider failures are values, not panics: every failure carries a
//! [`ProviderErrorKind`] that the retry classifier inspects.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// The category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The provider throttled the request (HTTP 429 or equivalent).
    RateLimited,
    /// The connection could not be established or was reset.
    Connection,
    /// The request timed out.
    Timeout,
    /// The provider reported a 5xx or an overloaded condition.
    ServerUnavailable,
    /// Credentials were rejected.
    Authentication,
    /// The request was malformed.
    InvalidRequest,
    /// The account quota is exhausted and no retry hint was given.
    QuotaExceeded,
    /// The provider answered but the structured output could not be parsed.
    Parse,
    /// The source document could not be read.
    ContentUnavailable,
    /// Too few council members produced a usable answer.
    CouncilInsufficient,
    /// Anything else. Classified by message.
    Other,
}

impl ProviderErrorKind {
    /// Short, stable code for logs and checkpoint records.
    pub fn code(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::ServerUnavailable => "server_unavailable",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Parse => "parse",
            Self::ContentUnavailable => "content_unavailable",
            Self::CouncilInsufficient => "council_insufficient",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed provider call.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// What went wrong.
    pub kind: ProviderErrorKind,

    /// Human-readable detail.
    pub message: String,

    /// Provider-specified wait before retrying, if any.
    pub retry_after: Option<Duration>,

    /// The raw model output, kept for parse failures.
    pub raw_response: Option<String>,
}

impl ProviderError {
    /// Create an error of the given kind.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            raw_response: None,
        }
    }

    /// Attach a provider retry hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// A rate-limit error with the provider's retry hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ProviderErrorKind::RateLimited, message)
        }
    }

    /// A timeout error.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ProviderErrorKind::Timeout,
            format!("timed out after {after:?}"),
        )
    }

    /// A parse error that keeps the raw response for diagnosis.
    pub fn parse(message: impl Into<String>, raw_response: impl Into<String>) -> Self {
        let message: String = message.into();
        let raw_response = raw_response.into();
        Self {
            message: format!("{message}; raw response: {raw_response}"),
            raw_response: Some(raw_response),
            ..Self::new(ProviderErrorKind::Parse, "")
        }
    }

    /// The source document could not be read.
    pub fn content_unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::ContentUnavailable, message)
    }

    /// Too few council members answered; carries every member's error.
    pub fn council_insufficient(errors: &[String]) -> Self {
        Self::new(
            ProviderErrorKind::CouncilInsufficient,
            format!("insufficient council responses: [{}]", errors.join("; ")),
        )
    }

    /// Any other failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message)
    }

    /// Short, stable code for this error's kind.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}
