//! Directory-backed storage, one file per key.
//!
//! File names are the xxHash64 of the key. The body is the bincode encoding of
//! the key and its item, so a name collision is detected on read and treated
//! as a miss. Writes go to a temporary file first and are renamed into place.

use super::{CacheStorage, StorageKind, StorageResult};
use crate::error::StorageError;
use crate::types::{now_ms, CacheItem, ItemMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};
use twox_hash::XxHash64;

const ENTRY_EXTENSION: &str = "entry";

#[derive(Serialize, Deserialize)]
struct FileEntry {
    key: String,
    item: CacheItem,
}

/// Storage keeping each entry in its own file.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    tmp_seq: AtomicU64,
    closed: AtomicBool,
}

impl FileStorage {
    /// Open (creating if needed) a storage rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened file storage");
        Ok(Self {
            dir,
            tmp_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Calculate the hash of a key using xxHash64.
    fn hash_key(key: &str) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key.as_bytes());
        hasher.finish()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{:016x}.{}", Self::hash_key(key), ENTRY_EXTENSION))
    }

    async fn read_entry(path: &Path) -> StorageResult<Option<FileEntry>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(bincode::deserialize(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(path: &Path) -> StorageResult<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Load a live entry for `key`, dropping it if it has expired.
    async fn load(&self, key: &str) -> StorageResult<Option<CacheItem>> {
        let path = self.entry_path(key);
        let Some(entry) = Self::read_entry(&path).await? else {
            return Ok(None);
        };
        if entry.key != key {
            return Ok(None);
        }
        if entry.item.metadata.is_expired_at(now_ms()) {
            Self::remove_file(&path).await?;
            return Ok(None);
        }
        Ok(Some(entry.item))
    }
}

#[async_trait]
impl CacheStorage for FileStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::File
    }

    async fn exist_key(&self, key: &str) -> StorageResult<bool> {
        self.check_open()?;
        Ok(self.load(key).await?.is_some())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<CacheItem>> {
        self.check_open()?;
        self.load(key).await
    }

    async fn set(&self, key: &str, value: Bytes, metadata: ItemMetadata) -> StorageResult<bool> {
        self.check_open()?;
        let entry = FileEntry {
            key: key.to_string(),
            item: CacheItem::with_metadata(value, metadata),
        };
        let data = bincode::serialize(&entry)?;

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!(".{:016x}.{}.tmp", Self::hash_key(key), seq));
        tokio::fs::write(&tmp, &data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.entry_path(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(true)
    }

    async fn remove(&self, key: &str) -> StorageResult<bool> {
        self.check_open()?;
        let path = self.entry_path(key);
        match Self::read_entry(&path).await? {
            Some(entry) if entry.key == key => Self::remove_file(&path).await,
            _ => Ok(false),
        }
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        self.check_open()?;
        let now = now_ms();
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;

        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match Self::read_entry(&path).await {
                Ok(Some(entry)) if !entry.item.metadata.is_expired_at(now) => keys.push(entry.key),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                }
            }
        }

        Ok(keys)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();

        assert!(storage.get("user:1").await.unwrap().is_none());

        let meta = ItemMetadata::new().with_tag("users");
        storage
            .set("user:1", Bytes::from("alice"), meta.clone())
            .await
            .unwrap();

        let item = storage.get("user:1").await.unwrap().unwrap();
        assert_eq!(item.value, Bytes::from("alice"));
        assert_eq!(item.metadata, meta);
        assert!(storage.exist_key("user:1").await.unwrap());

        assert!(storage.remove("user:1").await.unwrap());
        assert!(!storage.exist_key("user:1").await.unwrap());
        assert!(!storage.remove("user:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::open(dir.path()).await.unwrap();
            storage
                .set("k", Bytes::from("v"), ItemMetadata::new())
                .await
                .unwrap();
        }

        let storage = FileStorage::open(dir.path()).await.unwrap();
        let item = storage.get("k").await.unwrap().unwrap();
        assert_eq!(item.value, Bytes::from("v"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();

        let meta = ItemMetadata {
            ttl: Some(Duration::from_millis(1)),
            tags: vec![],
            created_at_ms: 1,
        };
        storage.set("old", Bytes::from("v"), meta).await.unwrap();

        assert!(storage.get("old").await.unwrap().is_none());
        assert!(!storage.entry_path("old").exists());
    }

    #[tokio::test]
    async fn test_get_keys_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.set("a", Bytes::from("1"), ItemMetadata::new()).await.unwrap();
        storage.set("b", Bytes::from("2"), ItemMetadata::new()).await.unwrap();
        std::fs::write(dir.path().join("README"), b"not an entry").unwrap();

        let mut keys = storage.get_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_calls() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.close().await;

        assert!(matches!(
            storage.set("k", Bytes::from("v"), ItemMetadata::new()).await,
            Err(StorageError::Closed)
        ));
    }
}
