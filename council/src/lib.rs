//! # Lectern Council
//!
//! Multi-provider consensus extraction. A [`Council`] sends the same
//! request to every enabled member, each under its own timeout, and merges
//! the successful payloads field by field according to a [`MergeSchema`].
//!
//! The consensus confidence combines the share of members that answered
//! with how much their answers overlap:
//!
//! ```text
//! confidence = 0.6 * response_rate + 0.4 * agreement
//! ```

pub mod agreement;
pub mod config;
pub mod council;
pub mod error;
pub mod merge;

pub use agreement::{agreement_score, consensus_confidence, jaccard};
pub use config::{CouncilConfig, CouncilMember, MemberConfig};
pub use council::{
    CONSENSUS_KEY, Council, CouncilResult, ProviderResponse, consensus_confidence_of,
};
pub use error::{CouncilError, Result};
pub use merge::{FieldStrategy, MergeSchema};
