//! Moka cache wrapper for in-process storage.

use super::{CacheStorage, StorageKind, StorageResult};
use crate::error::StorageError;
use crate::types::{CacheItem, ItemMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Expiry policy honouring the per-item TTL, falling back to a default.
struct ItemExpiry {
    default_ttl: Option<Duration>,
}

impl ItemExpiry {
    fn ttl_for(&self, item: &CacheItem) -> Option<Duration> {
        item.metadata.ttl.or(self.default_ttl)
    }
}

impl Expiry<String, CacheItem> for ItemExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheItem,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.ttl_for(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheItem,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.ttl_for(value)
    }
}

/// Hit/miss statistics for a memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    /// Number of entries in the cache.
    pub entry_count: u64,
    /// Approximate weighted size in bytes.
    pub weighted_size: u64,
    /// Number of hits.
    pub hits: u64,
    /// Number of misses.
    pub misses: u64,
}

/// In-process storage backed by Moka.
pub struct MemoryStorage {
    /// The underlying Moka cache.
    cache: Cache<String, CacheItem>,

    /// Hit counter for statistics.
    hits: AtomicU64,

    /// Miss counter for statistics.
    misses: AtomicU64,

    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create a memory storage holding at most `max_capacity` bytes of
    /// keys and values.
    pub fn new(max_capacity: u64, default_ttl: Option<Duration>) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(ItemExpiry { default_ttl })
            // Weight is key + value size in bytes, capped at u32::MAX
            .weigher(|key: &String, item: &CacheItem| {
                let size = key.len() + item.value.len();
                size.min(u32::MAX as usize) as u32
            })
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Get the number of entries in the cache.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Run pending maintenance tasks (cleanup expired entries, etc.).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn exist_key(&self, key: &str) -> StorageResult<bool> {
        self.check_open()?;
        Ok(self.cache.contains_key(key))
    }

    async fn get(&self, key: &str) -> StorageResult<Option<CacheItem>> {
        self.check_open()?;
        let result = self.cache.get(key).await;

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        Ok(result)
    }

    async fn set(&self, key: &str, value: Bytes, metadata: ItemMetadata) -> StorageResult<bool> {
        self.check_open()?;
        self.cache
            .insert(key.to_string(), CacheItem::with_metadata(value, metadata))
            .await;
        Ok(true)
    }

    async fn remove(&self, key: &str) -> StorageResult<bool> {
        self.check_open()?;
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        self.check_open()?;
        Ok(self.cache.iter().map(|(k, _)| (*k).clone()).collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
