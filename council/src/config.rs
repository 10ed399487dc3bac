//! Council configuration.

use std::sync::Arc;
use std::time::Duration;

use lectern_provider::{Provider, ProviderSettings};
use serde::{Deserialize, Serialize};

use crate::error::{CouncilError, Result};
use crate::merge::MergeSchema;

/// Configuration for one council member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Provider to build for this member.
    #[serde(flatten)]
    pub provider: ProviderSettings,

    /// Weight in weighted-average fields.
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_weight() -> f64 {
    1.0
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_enabled() -> bool {
    true
}

impl MemberConfig {
    pub fn new(provider: ProviderSettings) -> Self {
        Self {
            provider,
            weight: default_weight(),
            timeout_secs: default_timeout_secs(),
            enabled: default_enabled(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Configuration for the council.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Successful responses needed for a merged consensus.
    pub min_responses: usize,

    /// Accept a single response (at reduced confidence) when fewer than
    /// `min_responses` members succeed.
    pub fallback_to_single: bool,

    /// Query members concurrently rather than one after another.
    pub parallel: bool,

    /// Per-field merge strategies.
    pub merge_schema: MergeSchema,

    /// Fields whose value sets are compared for the agreement score.
    pub agreement_fields: Vec<String>,

    /// Member providers.
    pub members: Vec<MemberConfig>,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            min_responses: 2,
            fallback_to_single: true,
            parallel: true,
            merge_schema: MergeSchema::standard(),
            agreement_fields: vec!["keywords".to_string()],
            members: Vec::new(),
        }
    }
}

impl CouncilConfig {
    pub fn with_member(mut self, member: MemberConfig) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_min_responses(mut self, min_responses: usize) -> Self {
        self.min_responses = min_responses;
        self
    }

    pub fn with_fallback_to_single(mut self, fallback: bool) -> Self {
        self.fallback_to_single = fallback;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_merge_schema(mut self, schema: MergeSchema) -> Self {
        self.merge_schema = schema;
        self
    }

    /// Check the settings that do not depend on built providers.
    pub fn validate(&self) -> Result<()> {
        if self.min_responses == 0 {
            return Err(CouncilError::Config(
                "min_responses must be at least 1".to_string(),
            ));
        }
        for member in &self.members {
            let name = member.provider.display_name();
            check_weight(&name, member.weight)?;
            if member.timeout_secs == 0 {
                return Err(CouncilError::Config(format!(
                    "member {name} has a zero timeout"
                )));
            }
        }
        Ok(())
    }
}

fn check_weight(name: &str, weight: f64) -> Result<()> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(CouncilError::Config(format!(
            "member {name} has invalid weight {weight}"
        )))
    }
}

/// A built council member.
#[derive(Clone)]
pub struct CouncilMember {
    pub provider: Arc<dyn Provider>,
    pub weight: f64,
    pub timeout: Duration,
    pub enabled: bool,
}

impl CouncilMember {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            weight: default_weight(),
            timeout: Duration::from_secs(default_timeout_secs()),
            enabled: true,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// Reject weights that cannot be averaged and zero timeouts.
    pub fn validate(&self) -> Result<()> {
        check_weight(self.name(), self.weight)?;
        if self.timeout.is_zero() {
            return Err(CouncilError::Config(format!(
                "member {} has a zero timeout",
                self.name()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CouncilMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouncilMember")
            .field("provider", &self.provider.name())
            .field("weight", &self.weight)
            .field("timeout", &self.timeout)
            .field("enabled", &self.enabled)
            .finish()
    }
}
