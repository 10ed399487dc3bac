//! # Lectern Provider
//!
//! The data model and backend capability shared by the extraction pipeline.
//!
//! ## Features
//!
//! - **Data Model**: Units, requests and results passed between pipeline stages
//! - **Provider Trait**: One interface for every extraction backend
//! - **Retry Policy**: Transient/fatal classification and jittered back-off
//! - **Payload Parsing**: Tolerant JSON extraction from model output
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Lectern Provider                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ExtractionUnit ──► ExtractionRequest ──► Provider::extract  │
//! │       │                                        │             │
//! │       ▼                                        ▼             │
//! │  DocumentTextProvider        RetryPolicy ──► ExtractionResult│
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod mock;
pub mod parse;
pub mod provider;
pub mod retry;
pub mod text;
pub mod types;

pub use error::{ProviderError, ProviderErrorKind, Result};
pub use mock::MockProvider;
pub use parse::parse_payload;
pub use provider::{Provider, ProviderKind, ProviderRegistry, ProviderSettings};
pub use retry::{RetryConfig, RetryPolicy, Retryability, classify};
pub use text::{DocumentTextProvider, PlainTextProvider};
pub use types::{
    ContentRef, ContentStat, ExtractionRequest, ExtractionResult, ExtractionUnit, Payload,
};
