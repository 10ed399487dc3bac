//! Content-addressed cache of successful extractions.
//!
//! One JSON file per `(unit_id, fingerprint)` pair. A changed file, model or
//! prompt version yields a new fingerprint and therefore a miss; stale
//! entries stay on disk until [`ResultCache::invalidate`] or
//! [`ResultCache::clear`] removes them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lectern_provider::ExtractionResult;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::fingerprint::Fingerprint;
use crate::fs::{ensure_dir, read_json, remove_if_exists, write_json_atomic};

const ENTRY_EXTENSION: &str = ".json";

/// A cached extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unit the result belongs to.
    pub unit_id: String,

    /// Fingerprint the result was computed for.
    pub fingerprint: Fingerprint,

    /// The successful result.
    pub result: ExtractionResult,

    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
}

/// Statistics about the result cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entry files.
    pub entries: usize,

    /// Total size of entry files in bytes.
    pub bytes: u64,
}

/// Directory-backed result cache.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Open a cache rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        ensure_dir(&dir).await?;
        Ok(Self { dir })
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, unit_id: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!(
            "{}-{fingerprint}{ENTRY_EXTENSION}",
            sanitize_id(unit_id)
        ))
    }

    /// Look up the entry for a unit and fingerprint.
    ///
    /// Missing, unreadable and corrupt entries are all misses.
    pub async fn get(&self, unit_id: &str, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let path = self.entry_path(unit_id, fingerprint);
        match read_json::<CacheEntry>(&path).await {
            Ok(Some(entry)) if entry.unit_id == unit_id && &entry.fingerprint == fingerprint => {
                debug!("Cache hit for {unit_id} ({fingerprint})");
                Some(entry)
            }
            Ok(Some(_)) => {
                debug!("Cache entry {} belongs to another unit", path.display());
                None
            }
            Ok(None) => {
                debug!("Cache miss for {unit_id} ({fingerprint})");
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {e}", path.display());
                None
            }
        }
    }

    /// Store a result. Failed results are not cached.
    ///
    /// Returns whether an entry was written.
    pub async fn set(
        &self,
        unit_id: &str,
        fingerprint: &Fingerprint,
        result: &ExtractionResult,
    ) -> Result<bool> {
        if !result.success {
            debug!("Not caching failed result for {unit_id}");
            return Ok(false);
        }

        let mut stored = result.clone();
        stored.cached = false;
        let entry = CacheEntry {
            unit_id: unit_id.to_string(),
            fingerprint: fingerprint.clone(),
            result: stored,
            stored_at: Utc::now(),
        };

        write_json_atomic(&self.entry_path(unit_id, fingerprint), &entry).await?;
        debug!("Cached result for {unit_id} ({fingerprint})");
        Ok(true)
    }

    /// Remove every entry. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_files().await? {
            if remove_if_exists(&path).await? {
                removed += 1;
            }
        }
        info!("Cleared {removed} cache entries from {}", self.dir.display());
        Ok(removed)
    }

    /// Remove every entry for one unit, whatever its fingerprint.
    pub async fn invalidate(&self, unit_id: &str) -> Result<usize> {
        let stem = sanitize_id(unit_id);
        let mut removed = 0;
        for path in self.entry_files().await? {
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(ENTRY_EXTENSION))
                .and_then(|name| name.rsplit_once('-'))
                .is_some_and(|(id, _)| id == stem);
            if matches && remove_if_exists(&path).await? {
                removed += 1;
            }
        }
        debug!("Invalidated {removed} cache entries for {unit_id}");
        Ok(removed)
    }

    /// Count entries and their total size.
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for path in self.entry_files().await? {
            if let Ok(metadata) = fs::metadata(&path).await {
                stats.entries += 1;
                stats.bytes += metadata.len();
            }
        }
        Ok(stats)
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::ReadFile(format!("{}: {e}", self.dir.display())));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::ReadFile(format!("{}: {e}", self.dir.display())))?
        {
            let path = entry.path();
            let is_entry = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(ENTRY_EXTENSION));
            if is_entry {
                files.push(path);
            }
        }
        Ok(files)
    }
}

/// Make a unit id safe to use in a file name.
fn sanitize_id(unit_id: &str) -> String {
    unit_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_provider::{ContentStat, Payload};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fingerprint(model: &str) -> Fingerprint {
        Fingerprint::from_parts(
            ContentStat {
                modified_nanos: 42,
                size: 100,
            },
            model,
            "v1",
        )
    }

    fn success(unit_id: &str) -> ExtractionResult {
        let mut payload = Payload::new();
        payload.insert("thesis".into(), "Cached.".into());
        ExtractionResult::success(unit_id, payload, "model-a", Duration::from_millis(5))
    }

    #[test]
    fn test_sanitize_replaces_separators() {
        assert_eq!(sanitize_id("smith/2020 a-b"), "smith_2020_a_b");
        assert_eq!(sanitize_id("ABC_1.2"), "ABC_1.2");
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("model-a");

        assert!(cache.set("u1", &fp, &success("u1")).await.unwrap());
        let entry = cache.get("u1", &fp).await.unwrap();
        assert_eq!(entry.result.payload, success("u1").payload);
        assert_eq!(entry.fingerprint, fp);

        assert!(cache.get("u1", &fingerprint("model-b")).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_results_are_not_cached() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("model-a");

        let failure = ExtractionResult::failure("u1", "boom", Duration::ZERO);
        assert!(!cache.set("u1", &fp, &failure).await.unwrap());
        assert!(cache.get("u1", &fp).await.is_none());
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path()).await.unwrap();
        let fp = fingerprint("model-a");

        std::fs::write(cache.entry_path("u1", &fp), "{not json").unwrap();
        assert!(cache.get("u1", &fp).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_only_touches_one_unit() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::open(dir.path()).await.unwrap();

        for model in ["model-a", "model-b"] {
            cache.set("u1", &fingerprint(model), &success("u1")).await.unwrap();
        }
        cache
            .set("u1-extra", &fingerprint("model-a"), &success("u1-extra"))
            .await
            .unwrap();

        assert_eq!(cache.invalidate("u1").await.unwrap(), 2);
        assert!(cache.get("u1-extra", &fingerprint("model-a")).await.is_some());
        assert_eq!(cache.clear().await.unwrap(), 1);
    }
}
