//! Integration tests for checkpoint and cache persistence.

use std::time::Duration;

use lectern_provider::{ExtractionResult, ExtractionUnit, Payload, ProviderError};
use lectern_store::{CheckpointPhase, CheckpointStore, ResultCache, compute_fingerprint};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[tokio::test]
async fn test_checkpoint_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let mut store = CheckpointStore::open(dir.path(), "run").await.unwrap();
        assert_eq!(store.phase(), CheckpointPhase::NotStarted);
        store.initialize(4, serde_json::Map::new()).await.unwrap();
        assert_eq!(store.phase(), CheckpointPhase::Initialized);

        store.start_item("a").unwrap();
        store.complete_item("a", true, None).unwrap();
        store
            .complete_item("b", false, Some(&ProviderError::other("boom")))
            .unwrap();
        store.skip_item("c", "no attachment").unwrap();
        store.pause().await.unwrap();
    }

    let mut store = CheckpointStore::open(dir.path(), "run").await.unwrap();
    let state = store.load().await.unwrap().clone();
    assert_eq!(state.phase, CheckpointPhase::Paused);
    assert_eq!(state.processed_count, 3);
    assert_eq!(state.current_item, None);
    assert!(state.is_consistent());
    assert!(store.is_processed("a"));
    assert!(store.is_failed("b"));
    assert!(store.is_skipped("c"));
    assert!((store.progress_fraction() - 0.75).abs() < f64::EPSILON);

    store.reset().await.unwrap();
    assert!(store.load().await.is_none());
    assert!(!store.path().exists());
}

#[tokio::test]
async fn test_mutation_without_checkpoint_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "run").await.unwrap();
    assert!(store.complete_item("a", true, None).is_err());
    assert!(store.save().await.is_err());
}

#[tokio::test]
async fn test_unreadable_checkpoint_loads_as_none() {
    let dir = TempDir::new().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "run").await.unwrap();
    std::fs::write(store.path(), "{\"total_items\": ").unwrap();
    assert!(store.load().await.is_none());
}

#[tokio::test]
async fn test_changing_model_or_prompt_misses_cache() {
    let dir = TempDir::new().unwrap();
    let doc = dir.path().join("paper.txt");
    std::fs::write(&doc, "The full text of a paper.").unwrap();
    let cache = ResultCache::open(dir.path().join("cache")).await.unwrap();

    let unit = ExtractionUnit::new("smith2020", "On Caching", "model-a", "v1").with_content(&doc);
    let fp = compute_fingerprint(&unit).await.unwrap();

    let mut payload = Payload::new();
    payload.insert("thesis".into(), "Caches help.".into());
    let result = ExtractionResult::success("smith2020", payload, "model-a", Duration::ZERO);
    cache.set("smith2020", &fp, &result).await.unwrap();

    let same = compute_fingerprint(&unit).await.unwrap();
    assert_eq!(cache.get("smith2020", &same).await.unwrap().result, result);

    let new_model = ExtractionUnit {
        model: "model-b".into(),
        ..unit.clone()
    };
    let fp_model = compute_fingerprint(&new_model).await.unwrap();
    assert!(cache.get("smith2020", &fp_model).await.is_none());

    let new_prompt = ExtractionUnit {
        prompt_version: "v2".into(),
        ..unit
    };
    let fp_prompt = compute_fingerprint(&new_prompt).await.unwrap();
    assert!(cache.get("smith2020", &fp_prompt).await.is_none());
}

#[tokio::test]
async fn test_checkpoint_with_mismatched_failure_set_is_ignored() {
    let dir = TempDir::new().unwrap();
    let mut store = CheckpointStore::open(dir.path(), "run").await.unwrap();
    store.initialize(2, serde_json::Map::new()).await.unwrap();
    store
        .complete_item("a", false, Some(&ProviderError::other("boom")))
        .unwrap();
    store.save().await.unwrap();

    // Counters still add up, but no longer match the failed set.
    let raw = std::fs::read_to_string(store.path()).unwrap();
    let mut json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    json["failed_count"] = 0.into();
    json["processed_count"] = 0.into();
    std::fs::write(store.path(), serde_json::to_string(&json).unwrap()).unwrap();

    let mut reopened = CheckpointStore::open(dir.path(), "run").await.unwrap();
    assert!(reopened.load().await.is_none());
    assert!(reopened.clear_failed(None).is_err());
}
