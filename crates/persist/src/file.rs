//! Directory-backed storage.
//!
//! Layout inside the storage directory:
//! ```text
//! <key>.json      - current blob for <key>
//! <key>.json.tmp  - in-flight write, renamed over <key>.json when complete
//! ```

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::storage::{StorageAdapter, StorageError};

/// One file per key under a root directory.
///
/// Keys are restricted to `[A-Za-z0-9._-]` and may not start with a dot, so a
/// key can never escape the root.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open or create a storage directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::trace!(path = %path.display(), bytes = value.len(), "wrote state file");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_open_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path().join("state")).unwrap();
        assert!(storage.root().is_dir());
    }

    #[tokio::test]
    async fn file_round_trip_and_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        {
            let storage = FileStorage::open(&dir).unwrap();
            storage.set_item("settings", br#"{"version":1}"#).await.unwrap();
        }
        let storage = FileStorage::open(&dir).unwrap();
        let bytes = storage.get_item("settings").await.unwrap().unwrap();
        assert_eq!(bytes, br#"{"version":1}"#.to_vec());
        assert!(dir.join("settings.json").is_file());
        assert!(!dir.join("settings.json.tmp").exists());
    }

    #[tokio::test]
    async fn file_missing_key_reads_none_and_removes_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path()).unwrap();
        assert!(storage.get_item("absent").await.unwrap().is_none());
        storage.remove_item("absent").await.unwrap();
    }

    #[tokio::test]
    async fn file_remove_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path()).unwrap();
        storage.set_item("k", b"1").await.unwrap();
        storage.remove_item("k").await.unwrap();
        assert!(storage.get_item("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_rejects_escaping_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(tmp.path()).unwrap();
        for key in ["", "../etc", ".hidden", "a/b", "a b"] {
            let err = storage.set_item(key, b"x").await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "{key:?}");
        }
    }
}
