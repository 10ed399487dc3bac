//! Building councils from TOML configuration.

use std::sync::Arc;

use lectern_council::{Council, CouncilConfig, CouncilError, FieldStrategy};
use lectern_provider::{
    ExtractionUnit, MockProvider, Payload, Provider, ProviderKind, ProviderRegistry,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const CONFIG: &str = r#"
min_responses = 2
agreement_fields = ["keywords"]

[[members]]
kind = "mock"
name = "alpha"
weight = 2.0

[[members]]
kind = "mock"
name = "beta"
timeout_secs = 10

[[members]]
kind = "mock"
name = "gamma"
enabled = false
"#;

fn registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(ProviderKind::Mock, |settings| {
        let name = settings.display_name();
        let confidence = if name == "alpha" { 0.9 } else { 0.6 };
        let payload: Payload = json!({
            "thesis": format!("Thesis from {name}"),
            "keywords": ["cache", name],
            "confidence": confidence,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        Ok(Arc::new(MockProvider::new(name).with_payload(payload)) as Arc<dyn Provider>)
    });
    registry
}

#[test]
fn test_config_defaults_fill_missing_fields() {
    let config: CouncilConfig = toml::from_str(CONFIG).unwrap();
    assert_eq!(config.members.len(), 3);
    assert!(config.fallback_to_single);
    assert!(config.parallel);
    assert_eq!(config.members[1].weight, 1.0);
    assert_eq!(config.members[1].timeout_secs, 10);
    assert!(!config.members[2].enabled);
    assert_eq!(
        config.merge_schema.fields.get("keywords"),
        Some(&FieldStrategy::Union)
    );
}

#[tokio::test]
async fn test_council_from_config_merges_enabled_members() {
    let config: CouncilConfig = toml::from_str(CONFIG).unwrap();
    let council = Council::from_config(config, &registry()).unwrap();
    assert_eq!(council.name(), "council[alpha+beta]");

    let unit = ExtractionUnit::new("u1", "Title", "m", "v1");
    let result = council.extract(&unit.request("text")).await;
    assert!(result.success);
    assert_eq!(result.provider_responses.len(), 2);

    let consensus = result.consensus.clone().unwrap();
    assert_eq!(consensus["keywords"], json!(["cache", "alpha", "beta"]));
    // (0.9 * 2 + 0.6 * 1) / 3
    assert!((consensus["confidence"].as_f64().unwrap() - 0.8).abs() < 1e-9);
    assert_eq!(consensus["thesis"], json!("Thesis from alpha"));
}

#[test]
fn test_unregistered_kind_fails_to_build() {
    let config: CouncilConfig = toml::from_str(
        r#"
[[members]]
kind = "anthropic"
"#,
    )
    .unwrap();
    let err = Council::from_config(config, &registry()).unwrap_err();
    assert!(matches!(err, CouncilError::Provider(_)));
}

#[test]
fn test_zero_min_responses_is_rejected() {
    let err = Council::from_config(
        CouncilConfig::default().with_min_responses(0),
        &registry(),
    )
    .unwrap_err();
    assert!(matches!(err, CouncilError::Config(_)));
}

#[test]
fn test_zero_member_timeout_is_rejected() {
    let config: CouncilConfig = toml::from_str(
        r#"
[[members]]
kind = "mock"
name = "alpha"
timeout_secs = 0
"#,
    )
    .unwrap();
    let err = Council::from_config(config, &registry()).unwrap_err();
    assert!(matches!(err, CouncilError::Config(_)));
    assert!(err.to_string().contains("zero timeout"));
}
