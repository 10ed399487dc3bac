//! Cheap change detection for extraction units.

use std::fmt;

use lectern_provider::{ContentStat, ExtractionUnit};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Identity of the inputs that determine a unit's extraction.
///
/// Two units with equal fingerprints are expected to produce the same
/// extraction: same file metadata, same model, same prompt version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive a fingerprint from file metadata and the extraction settings.
    pub fn from_parts(stat: ContentStat, model: &str, prompt_version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}:{}:{model}:{prompt_version}",
            stat.modified_nanos, stat.size
        ));
        let digest = hasher.finalize();
        let mut hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex.truncate(FINGERPRINT_LEN);
        Self(hex)
    }

    /// The fingerprint as hex.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a unit from its content's metadata. Never reads the file body.
///
/// Returns `None` when the unit has no content or the content cannot be
/// stat'ed.
pub async fn compute_fingerprint(unit: &ExtractionUnit) -> Option<Fingerprint> {
    let content = unit.content.as_ref()?;
    let stat = content.stat().await.ok()?;
    Some(Fingerprint::from_parts(
        stat,
        &unit.model,
        &unit.prompt_version,
    ))
}
