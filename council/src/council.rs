//! Fan a request out to several providers and merge their answers.

use std::time::{Duration, Instant};

use futures::future::join_all;
use lectern_provider::{
    ExtractionRequest, ExtractionResult, Payload, ProviderError, ProviderRegistry,
    Result as ProviderResult, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::agreement::{FALLBACK_CONFIDENCE, agreement_score, consensus_confidence};
use crate::config::{CouncilConfig, CouncilMember};
use crate::error::Result;

/// Payload key under which council metadata is attached to merged results.
pub const CONSENSUS_KEY: &str = "_consensus";

/// One member's answer to a council request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider_name: String,
    pub result: Option<ExtractionResult>,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
    pub weight: f64,
}

/// Outcome of one council extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilResult {
    pub unit_id: String,

    /// Merged payload, present on success.
    pub consensus: Option<Payload>,

    /// Every enabled member's response, in member order.
    pub provider_responses: Vec<ProviderResponse>,

    pub success: bool,

    /// Confidence in the consensus, in `[0, 1]`.
    pub consensus_confidence: f64,

    /// `"<provider>: <error>"` for every failed member.
    pub errors: Vec<String>,

    pub duration: Duration,
}

impl CouncilResult {
    /// Responses that produced a payload.
    pub fn successful_responses(&self) -> impl Iterator<Item = &ProviderResponse> {
        self.provider_responses.iter().filter(|r| r.success)
    }

    /// Convert a council outcome into a single extraction result.
    ///
    /// The consensus payload gains a `_consensus` object with the confidence
    /// and the names of the members that answered. Token counts are summed
    /// over all members. A failed council becomes a `CouncilInsufficient`
    /// error carrying every member error.
    pub fn into_extraction_result(
        self,
        model_used: impl Into<String>,
    ) -> ProviderResult<ExtractionResult> {
        let Some(mut payload) = self.consensus else {
            return Err(ProviderError::council_insufficient(&self.errors));
        };

        let answered: Vec<&str> = self
            .provider_responses
            .iter()
            .filter(|r| r.success)
            .map(|r| r.provider_name.as_str())
            .collect();
        payload.insert(
            CONSENSUS_KEY.to_string(),
            json!({
                "confidence": self.consensus_confidence,
                "providers": answered,
            }),
        );

        let (input_tokens, output_tokens) = self
            .provider_responses
            .iter()
            .filter_map(|r| r.result.as_ref())
            .fold((0, 0), |(i, o), r| (i + r.input_tokens, o + r.output_tokens));

        Ok(
            ExtractionResult::success(&self.unit_id, payload, model_used, self.duration)
                .with_tokens(input_tokens, output_tokens),
        )
    }
}

/// Queries several providers for the same unit and builds a consensus.
#[derive(Debug, Clone)]
pub struct Council {
    config: CouncilConfig,
    members: Vec<CouncilMember>,
    retry: RetryPolicy,
}

impl Council {
    /// Create a council from already built members.
    ///
    /// The `members` list of `config` is ignored.
    pub fn new(config: CouncilConfig, members: Vec<CouncilMember>) -> Result<Self> {
        config.validate()?;
        for member in &members {
            member.validate()?;
        }
        Ok(Self {
            config,
            members,
            retry: RetryPolicy::none(),
        })
    }

    /// Build every configured member through the registry.
    pub fn from_config(config: CouncilConfig, registry: &ProviderRegistry) -> Result<Self> {
        config.validate()?;
        let members = config
            .members
            .iter()
            .map(|m| -> Result<CouncilMember> {
                let provider = registry.build(&m.provider)?;
                Ok(CouncilMember::new(provider)
                    .with_weight(m.weight)
                    .with_timeout(Duration::from_secs(m.timeout_secs))
                    .with_enabled(m.enabled))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Built council with {} members ({} enabled)",
            members.len(),
            members.iter().filter(|m| m.enabled).count()
        );
        Ok(Self {
            config,
            members,
            retry: RetryPolicy::none(),
        })
    }

    /// Retry policy applied to each member call by [`Council::extract`].
    /// Members are not retried by default.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &CouncilConfig {
        &self.config
    }

    pub fn members(&self) -> &[CouncilMember] {
        &self.members
    }

    fn enabled_members(&self) -> impl Iterator<Item = &CouncilMember> {
        self.members.iter().filter(|m| m.enabled)
    }

    /// `council[a+b+c]` over the enabled members.
    pub fn name(&self) -> String {
        let names: Vec<&str> = self.enabled_members().map(CouncilMember::name).collect();
        format!("council[{}]", names.join("+"))
    }

    /// Query every enabled member and merge the successful answers.
    pub async fn extract(&self, request: &ExtractionRequest) -> CouncilResult {
        self.extract_with_retry(request, &self.retry).await
    }

    /// Like [`Council::extract`], retrying each member's transient failures
    /// under `retry`. A member only counts as failed once its retries are
    /// exhausted or it hits a fatal error.
    pub async fn extract_with_retry(
        &self,
        request: &ExtractionRequest,
        retry: &RetryPolicy,
    ) -> CouncilResult {
        let start = Instant::now();
        let members: Vec<&CouncilMember> = self.enabled_members().collect();

        let responses = if self.config.parallel {
            join_all(members.iter().map(|m| query_member(m, request, retry))).await
        } else {
            let mut responses = Vec::with_capacity(members.len());
            for member in &members {
                responses.push(query_member(member, request, retry).await);
            }
            responses
        };

        self.aggregate(&request.unit_id, responses, start.elapsed())
    }

    fn aggregate(
        &self,
        unit_id: &str,
        responses: Vec<ProviderResponse>,
        duration: Duration,
    ) -> CouncilResult {
        let mut errors: Vec<String> = responses
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| format!("{}: {e}", r.provider_name))
            })
            .collect();

        let successes: Vec<(&Payload, f64)> = responses
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| {
                r.result
                    .as_ref()
                    .and_then(|res| res.payload.as_ref())
                    .map(|p| (p, r.weight))
            })
            .collect();

        let configured = responses.len();
        let (consensus, confidence) = if configured == 0 {
            warn!("Council for {unit_id} has no enabled members");
            (None, 0.0)
        } else if successes.len() >= self.config.min_responses {
            let payloads: Vec<&Payload> = successes.iter().map(|(p, _)| *p).collect();
            let response_rate = successes.len() as f64 / configured as f64;
            let agreement = agreement_score(&payloads, &self.config.agreement_fields);
            let confidence = consensus_confidence(response_rate, agreement);
            debug!(
                "Council consensus for {unit_id}: {}/{configured} responses, agreement {agreement:.2}, confidence {confidence:.2}",
                successes.len()
            );
            (Some(self.config.merge_schema.merge(&successes)), confidence)
        } else if self.config.fallback_to_single && !successes.is_empty() {
            warn!(
                "Only {}/{configured} council responses for {unit_id}; using a single response",
                successes.len()
            );
            (Some(successes[0].0.clone()), FALLBACK_CONFIDENCE)
        } else {
            warn!(
                "Insufficient council responses for {unit_id}: {}/{configured} (need {})",
                successes.len(),
                self.config.min_responses
            );
            (None, 0.0)
        };

        if configured == 0 {
            errors.push("no enabled council members".to_string());
        }

        CouncilResult {
            unit_id: unit_id.to_string(),
            success: consensus.is_some(),
            consensus,
            provider_responses: responses,
            consensus_confidence: confidence,
            errors,
            duration,
        }
    }

    /// Sum of the enabled members' cost estimates.
    pub fn estimate_cost(&self, text_length: usize) -> f64 {
        self.enabled_members()
            .map(|m| m.provider.estimate_cost(text_length))
            .sum()
    }
}

/// Read the confidence a council attached to a merged payload.
pub fn consensus_confidence_of(payload: &Payload) -> Option<f64> {
    payload
        .get(CONSENSUS_KEY)
        .and_then(|meta| meta.get("confidence"))
        .and_then(Value::as_f64)
}

async fn query_member(
    member: &CouncilMember,
    request: &ExtractionRequest,
    retry: &RetryPolicy,
) -> ProviderResponse {
    let start = Instant::now();
    let name = member.name().to_string();

    let outcome = retry
        .execute_with(
            || attempt_member(member, request),
            |err, attempt, _| {
                debug!(
                    "Retrying council member {name} for {} (attempt {}) after {}",
                    request.unit_id,
                    attempt + 1,
                    err.code()
                );
            },
        )
        .await;

    match outcome {
        Ok(result) => {
            debug!("Council member {name} answered for {}", request.unit_id);
            ProviderResponse {
                provider_name: name,
                result: Some(result),
                success: true,
                error: None,
                duration: start.elapsed(),
                weight: member.weight,
            }
        }
        Err(err) => {
            warn!("Council member {name} failed for {}: {err}", request.unit_id);
            ProviderResponse {
                provider_name: name,
                result: None,
                success: false,
                error: Some(err.to_string()),
                duration: start.elapsed(),
                weight: member.weight,
            }
        }
    }
}

/// One call to one member, bounded by its timeout. Answers without a payload
/// are errors.
async fn attempt_member(
    member: &CouncilMember,
    request: &ExtractionRequest,
) -> ProviderResult<ExtractionResult> {
    let result = match tokio::time::timeout(member.timeout, member.provider.extract(request)).await
    {
        Ok(outcome) => outcome?,
        Err(_) => return Err(ProviderError::timeout(member.timeout)),
    };
    if result.success && result.payload.is_some() {
        Ok(result)
    } else {
        Err(ProviderError::other(
            result.error.unwrap_or_else(|| "empty response".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CouncilError;
    use lectern_provider::{ExtractionUnit, MockProvider, ProviderErrorKind, RetryConfig};
    use std::sync::Arc;
    use pretty_assertions::assert_eq;

    fn member(provider: MockProvider) -> CouncilMember {
        CouncilMember::new(Arc::new(provider))
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn request() -> ExtractionRequest {
        ExtractionUnit::new("u1", "Title", "m", "v1").request("text")
    }

    #[tokio::test]
    async fn test_fallback_to_single_response() {
        let good = MockProvider::new("good").with_payload(payload(json!({"thesis": "Only one"})));
        let bad = MockProvider::new("bad");
        bad.fail_always("u1", ProviderError::new(ProviderErrorKind::Authentication, "denied"));

        let council = Council::new(
            CouncilConfig::default()
                .with_min_responses(2)
                .with_fallback_to_single(true),
            vec![member(good), member(bad)],
        )
        .unwrap();

        let result = council.extract(&request()).await;
        assert!(result.success);
        assert_eq!(result.consensus_confidence, 0.5);
        assert_eq!(result.consensus.unwrap()["thesis"], json!("Only one"));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("bad: "));
    }

    #[tokio::test]
    async fn test_insufficient_without_fallback() {
        let good = MockProvider::new("good").with_payload(payload(json!({"thesis": "x"})));
        let bad = MockProvider::new("bad");
        bad.fail_always("u1", ProviderError::other("boom"));

        let council = Council::new(
            CouncilConfig::default().with_fallback_to_single(false),
            vec![member(good), member(bad)],
        )
        .unwrap();

        let result = council.extract(&request()).await;
        assert!(!result.success);
        let err = result.into_extraction_result(council.name()).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::CouncilInsufficient);
        assert!(err.message.contains("bad: other: boom"));
    }

    #[tokio::test]
    async fn test_consensus_confidence_from_rate_and_agreement() {
        let a = MockProvider::new("a").with_payload(payload(json!({"keywords": ["x", "y"]})));
        let b = MockProvider::new("b").with_payload(payload(json!({"keywords": ["y", "z"]})));
        let council = Council::new(CouncilConfig::default(), vec![member(a), member(b)]).unwrap();

        let result = council.extract(&request()).await;
        // response rate 1.0, agreement 1/3
        let expected = 0.6 + 0.4 / 3.0;
        assert!((result.consensus_confidence - expected).abs() < 1e-9);
        assert_eq!(result.consensus.as_ref().unwrap()["keywords"], json!(["x", "y", "z"]));

        let merged = result.into_extraction_result(council.name()).unwrap();
        assert_eq!(merged.model_used, "council[a+b]");
        let confidence = consensus_confidence_of(merged.payload.as_ref().unwrap()).unwrap();
        assert!((confidence - expected).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_timeout_counts_as_failure() {
        let fast = MockProvider::new("fast").with_payload(payload(json!({"thesis": "fast"})));
        let slow = MockProvider::new("slow").with_latency(Duration::from_secs(30));

        let council = Council::new(
            CouncilConfig::default(),
            vec![
                member(fast),
                member(slow).with_timeout(Duration::from_secs(5)),
            ],
        )
        .unwrap();

        let result = council.extract(&request()).await;
        assert!(result.success);
        assert_eq!(result.consensus_confidence, 0.5);
        let slow_response = &result.provider_responses[1];
        assert!(!slow_response.success);
        assert!(slow_response.error.as_ref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_disabled_members_are_not_called() {
        let a = MockProvider::new("a").with_cost_per_char(0.001);
        let b = MockProvider::new("b").with_cost_per_char(0.002);
        let off = MockProvider::new("off").with_cost_per_char(1.0);
        let off_handle = off.clone();

        let council = Council::new(
            CouncilConfig::default().with_parallel(false),
            vec![member(a), member(b), member(off).with_enabled(false)],
        )
        .unwrap();

        assert!((council.estimate_cost(1000) - 3.0).abs() < 1e-9);
        let result = council.extract(&request()).await;
        assert_eq!(result.provider_responses.len(), 2);
        assert_eq!(off_handle.call_count(), 0);
        assert_eq!(council.name(), "council[a+b]");
    }

    #[tokio::test]
    async fn test_transient_member_failure_is_retried() {
        let a = MockProvider::new("a").with_payload(payload(json!({"thesis": "a"})));
        let b = MockProvider::new("b").with_payload(payload(json!({"thesis": "b"})));
        let b_handle = b.clone();
        b.fail_times("u1", ProviderError::rate_limited("429", None), 1);

        let council = Council::new(
            CouncilConfig::default()
                .with_min_responses(2)
                .with_fallback_to_single(false),
            vec![member(a), member(b)],
        )
        .unwrap()
        .with_retry(RetryPolicy::new(
            RetryConfig::default().with_delays(Duration::ZERO, Duration::ZERO),
        ));

        let result = council.extract(&request()).await;
        assert!(result.success);
        assert!(result.errors.is_empty());
        assert_eq!(b_handle.calls_for("u1"), 2);
        assert_eq!(result.provider_responses.len(), 2);
    }

    #[tokio::test]
    async fn test_members_are_not_retried_by_default() {
        let a = MockProvider::new("a").with_payload(payload(json!({"thesis": "a"})));
        let b = MockProvider::new("b");
        let b_handle = b.clone();
        b.fail_times("u1", ProviderError::rate_limited("429", None), 1);

        let council = Council::new(CouncilConfig::default(), vec![member(a), member(b)]).unwrap();
        let result = council.extract(&request()).await;
        assert!(result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(b_handle.call_count(), 1);
    }

    #[test]
    fn test_direct_members_are_validated() {
        let negative = Council::new(
            CouncilConfig::default(),
            vec![member(MockProvider::new("neg")).with_weight(-1.0)],
        );
        assert!(matches!(negative, Err(CouncilError::Config(_))));

        let nan = Council::new(
            CouncilConfig::default(),
            vec![member(MockProvider::new("nan")).with_weight(f64::NAN)],
        );
        assert!(matches!(nan, Err(CouncilError::Config(_))));

        let zero = Council::new(
            CouncilConfig::default(),
            vec![member(MockProvider::new("zero")).with_timeout(Duration::ZERO)],
        );
        let err = zero.unwrap_err();
        assert!(err.to_string().contains("zero timeout"));
    }
}
