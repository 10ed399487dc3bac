//! Atomic file helpers shared by the stores.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Create `dir` and its parents if missing.
pub(crate) async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::CreateDirectory(format!("{}: {e}", dir.display())))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON and replace `path` with it.
///
/// The bytes go to a sibling temp file first and are renamed over the
/// target, so readers see either the old file or the new one.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    let temp = temp_path(path);

    fs::write(&temp, &content)
        .await
        .map_err(|e| StoreError::WriteFile(format!("{}: {e}", temp.display())))?;

    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(StoreError::WriteFile(format!("{}: {e}", path.display())));
    }

    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Read and deserialize a JSON file. `Ok(None)` when the file does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::ReadFile(format!("{}: {e}", path.display()))),
    };
    Ok(Some(serde_json::from_slice(&content)?))
}

/// Delete a file, treating "already gone" as success. Returns whether a file was removed.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::DeleteFile(format!("{}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        write_json_atomic(&path, &json!({"n": 1})).await.unwrap();
        write_json_atomic(&path, &json!({"n": 2})).await.unwrap();

        let value: serde_json::Value = read_json(&path).await.unwrap().unwrap();
        assert_eq!(value["n"], 2);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let value: Option<serde_json::Value> =
            read_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(value.is_none());
        assert!(!remove_if_exists(&dir.path().join("absent.json")).await.unwrap());
    }
}
