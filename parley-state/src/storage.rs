//! Key/value persistence for JSON documents.

use async_trait::async_trait;
use globset::Glob;
use parley_common::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Persistence layer storing one JSON document per key.
///
/// The synchronous forms are the primitive operations. The `*_async` forms
/// exist for call sites inside async tasks and delegate to the synchronous
/// ones; documents are small enough that blocking the executor briefly is
/// acceptable.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write `value` under `key`, replacing any existing document.
    fn save(&self, key: &str, value: &Value) -> Result<()>;

    /// Read the document for `key`. Fails with `NotFound` when absent.
    fn load(&self, key: &str) -> Result<Value>;

    /// Remove the document for `key`. Fails with `NotFound` when absent.
    fn delete(&self, key: &str) -> Result<()>;

    /// Whether a document exists for `key`.
    fn exists(&self, key: &str) -> bool;

    /// List stored keys, optionally filtered by a glob pattern.
    fn list_keys(&self, pattern: Option<&str>) -> Result<Vec<String>>;

    async fn save_async(&self, key: &str, value: &Value) -> Result<()> {
        self.save(key, value)
    }

    async fn load_async(&self, key: &str) -> Result<Value> {
        self.load(key)
    }

    async fn delete_async(&self, key: &str) -> Result<()> {
        self.delete(key)
    }
}

/// File-per-key JSON storage rooted at a base directory.
///
/// Keys are sanitized before touching the filesystem so a key can never
/// escape the base directory.
pub struct JsonFileStorage {
    base_dir: PathBuf,
}

impl JsonFileStorage {
    /// Open (and create if needed) a storage directory.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| Error::storage(format!("creating {}", base_dir.display()), e))?;
        Ok(Self { base_dir })
    }

    /// Directory documents are written under.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect::<String>()
            .replace("..", "_")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", Self::sanitize_key(key)))
    }
}

#[async_trait]
impl StorageBackend for JsonFileStorage {
    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, json)
            .map_err(|e| Error::storage(format!("writing {}", path.display()), e))?;
        tracing::debug!(key, path = %path.display(), "Document saved");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Value> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(Error::not_found(format!("document {key}")));
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::storage(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::storage(format!("parsing document {key}"), e))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(Error::not_found(format!("document {key}")));
        }
        std::fs::remove_file(&path)
            .map_err(|e| Error::storage(format!("deleting {}", path.display()), e))?;
        tracing::debug!(key, "Document deleted");
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    fn list_keys(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let matcher = match pattern {
            Some(p) => Some(
                Glob::new(p)
                    .map_err(|e| Error::validation("pattern", e.to_string(), p))?
                    .compile_matcher(),
            ),
            None => None,
        };

        let entries = std::fs::read_dir(&self.base_dir)
            .map_err(|e| Error::storage(format!("listing {}", self.base_dir.display()), e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| Error::storage(format!("listing {}", self.base_dir.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(key) = name.strip_suffix(".json") else { continue };
            if matcher.as_ref().map_or(true, |m| m.is_match(key)) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage() -> (tempfile::TempDir, JsonFileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn save_load_roundtrip() {
        let (_dir, s) = storage();
        let doc = json!({"name": "alice", "count": 3});
        s.save("user_1", &doc).unwrap();
        assert_eq!(s.load("user_1").unwrap(), doc);
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, s) = storage();
        assert!(s.load("absent").unwrap_err().is_not_found());
    }

    #[test]
    fn delete_missing_is_not_found() {
        let (_dir, s) = storage();
        s.save("k", &json!(1)).unwrap();
        assert!(s.exists("k"));
        s.delete("k").unwrap();
        assert!(!s.exists("k"));
        assert!(s.delete("k").unwrap_err().is_not_found());
    }

    #[test]
    fn keys_are_sanitized() {
        let (dir, s) = storage();
        s.save("../evil/key", &json!(true)).unwrap();
        // Nothing escaped the base directory
        assert!(!dir.path().parent().unwrap().join("evil").exists());
        assert!(s.exists("../evil/key"));
    }

    #[test]
    fn list_keys_with_pattern() {
        let (_dir, s) = storage();
        s.save("session_a", &json!(1)).unwrap();
        s.save("session_b", &json!(2)).unwrap();
        s.save("other", &json!(3)).unwrap();

        let all = s.list_keys(None).unwrap();
        assert_eq!(all, vec!["other", "session_a", "session_b"]);

        let sessions = s.list_keys(Some("session_*")).unwrap();
        assert_eq!(sessions, vec!["session_a", "session_b"]);
    }

    #[test]
    fn malformed_document_is_a_storage_error() {
        let (dir, s) = storage();
        std::fs::write(dir.path().join("bad.json"), "not json").unwrap();
        let err = s.load("bad").unwrap_err();
        assert!(err.to_string().contains("parsing document"));
    }

    #[tokio::test]
    async fn async_forms_delegate() {
        let (_dir, s) = storage();
        s.save_async("k", &json!("v")).await.unwrap();
        assert_eq!(s.load_async("k").await.unwrap(), json!("v"));
        s.delete_async("k").await.unwrap();
        assert!(s.load_async("k").await.unwrap_err().is_not_found());
    }
}
