//! # Lectern Store
//!
//! On-disk state for the extraction pipeline:
//!
//! - [`ResultCache`]: successful results keyed by unit id and [`Fingerprint`]
//! - [`CheckpointStore`]: per-run progress so interrupted batches resume
//! - [`ResultSnapshot`]: accumulated output written alongside each checkpoint
//!
//! Every file is written to a temp sibling and renamed into place. Sharing
//! one directory between concurrent processes is not supported.

pub mod cache;
pub mod checkpoint;
pub mod error;
pub mod fingerprint;
mod fs;
pub mod snapshot;

pub use cache::{CacheEntry, CacheStats, ResultCache};
pub use checkpoint::{
    CheckpointPhase, CheckpointState, CheckpointStore, CheckpointSummary, FailedItem,
};
pub use error::{Result, StoreError};
pub use fingerprint::{FINGERPRINT_LEN, Fingerprint, compute_fingerprint};
pub use snapshot::ResultSnapshot;
