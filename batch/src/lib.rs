//! # Lectern Batch
//!
//! Runs extraction over many units with caching, retries and resumable
//! checkpoints.
//!
//! ```text
//!  units ──► BatchOrchestrator ──► ResultCache ──hit──────────────┐
//!                 │                     │ miss                    │
//!                 │                     ▼                         ▼
//!                 │        DocumentTextProvider ──► Backend ──► results stream
//!                 │                                (provider      │
//!                 │                                 or council)   │
//!                 └──────────────► CheckpointStore ◄──────────────┘
//! ```
//!
//! A [`Backend`] is either one provider or a council. [`PipelineConfig`]
//! reads both the batch settings and the backend from one TOML file.

pub mod backend;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod stats;

pub use backend::Backend;
pub use config::{BatchConfig, PipelineConfig};
pub use error::{BatchError, Result};
pub use orchestrator::{BatchOrchestrator, BatchRun, RunOptions};
pub use stats::{
    BatchProgress, BatchReport, BatchStats, CostEstimate, ProgressCallback, UnitOutcome,
};
