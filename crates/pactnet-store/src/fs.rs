//! Atomic JSON file persistence.
//!
//! Writes go to a `.tmp` sibling, are fsynced, then renamed over the target;
//! readers either see the old document or the new one, never a torn write.
//! Files are created 0600. A per-file async mutex serializes writers while
//! reads stay lock-free.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use pactnet_core::constants::PERSIST_RETRY_COUNT;
use pactnet_core::PactError;

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PactError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PactError::Persistence(e.to_string()))?;
    }

    let json = serde_json::to_vec_pretty(value).map_err(|e| PactError::Internal(e.to_string()))?;
    let tmp = path.with_extension("tmp");

    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| PactError::Persistence(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| PactError::Persistence(e.to_string()))?;
        }
        file.write_all(&json)
            .map_err(|e| PactError::Persistence(e.to_string()))?;
        file.sync_all()
            .map_err(|e| PactError::Persistence(e.to_string()))?;
    }

    std::fs::rename(&tmp, path).map_err(|e| PactError::Persistence(e.to_string()))?;
    Ok(())
}

/// Atomic write with bounded in-process retries. In-memory state is the
/// caller's to keep unchanged until this returns Ok.
pub fn write_json_with_retry<T: Serialize>(path: &Path, value: &T) -> Result<(), PactError> {
    let mut last = None;
    for attempt in 0..PERSIST_RETRY_COUNT {
        match write_json_atomic(path, value) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(path = %path.display(), attempt, error = %e, "persist failed");
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| PactError::Persistence("write failed".into())))
}

/// Read a JSON document, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PactError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PactError::Persistence(e.to_string())),
    };
    let value = serde_json::from_str(&raw).map_err(|e| PactError::InvalidJson(e.to_string()))?;
    Ok(Some(value))
}

/// Registry of per-file write locks. Each path gets one async mutex held for
/// the full read-modify-write of that file.
#[derive(Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `path`, created on first use.
    pub async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pactnet_fs_{}_{}.json", name, std::process::id()))
    }

    #[test]
    fn round_trip_and_missing_file() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        assert!(read_json::<serde_json::Value>(&path).unwrap().is_none());

        let doc = serde_json::json!({"version": 1, "balance": 700});
        write_json_atomic(&path, &doc).unwrap();
        let loaded: serde_json::Value = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, doc);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rewrite_replaces_whole_document() {
        let path = temp_path("rewrite");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"b": 2})).unwrap();
        let loaded: serde_json::Value = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, serde_json::json!({"b": 2}));
        let _ = std::fs::remove_file(&path);
    }

    #[cfg(unix)]
    #[test]
    fn written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let path = temp_path("perms");
        write_json_atomic(&path, &serde_json::json!({})).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupted_json_is_surfaced() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json").unwrap();
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert_eq!(err.code(), "INVALID_JSON");
        let _ = std::fs::remove_file(&path);
    }
}
