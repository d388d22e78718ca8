//! Fault-injecting storage for tests.

use crate::error::StorageError;
use crate::storage::{CacheStorage, MemoryStorage, StorageKind, StorageResult};
use crate::types::{CacheItem, ItemMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// In-memory storage whose failures and latency are switched at runtime.
///
/// It reports whatever [`StorageKind`] it was built with, so it can stand in
/// for a remote node without a transport.
pub struct FlakyStorage {
    inner: MemoryStorage,
    kind: StorageKind,
    failing: AtomicBool,
    rejecting: AtomicBool,
    latency_ms: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl FlakyStorage {
    pub fn new(kind: StorageKind) -> Self {
        Self {
            inner: MemoryStorage::new(64 * 1024 * 1024, None),
            kind,
            failing: AtomicBool::new(false),
            rejecting: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Storage that looks like a remote node.
    pub fn network() -> Self {
        Self::new(StorageKind::Remote)
    }

    /// Storage that looks like an in-process node.
    pub fn local() -> Self {
        Self::new(StorageKind::Local)
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Make every call fail with `StorageError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make writes report that the value was declined.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Delay applied to every call before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Read calls received, probes included.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Write calls received.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Backing store, bypassing injected faults.
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Seed a value without counting a write.
    pub async fn seed(&self, key: &str, value: impl Into<Bytes>) {
        // MemoryStorage only fails once closed.
        let _ = self.inner.set(key, value.into(), ItemMetadata::new()).await;
    }

    /// Read a value directly, bypassing injected faults.
    pub async fn peek(&self, key: &str) -> Option<Bytes> {
        self.inner.get(key).await.ok().flatten().map(|item| item.value)
    }

    async fn gate(&self, counter: &AtomicU64) -> StorageResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    async fn exist_key(&self, key: &str) -> StorageResult<bool> {
        self.gate(&self.reads).await?;
        self.inner.exist_key(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<CacheItem>> {
        self.gate(&self.reads).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, metadata: ItemMetadata) -> StorageResult<bool> {
        self.gate(&self.writes).await?;
        if self.rejecting.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.set(key, value, metadata).await
    }

    async fn remove(&self, key: &str) -> StorageResult<bool> {
        self.gate(&self.writes).await?;
        self.inner.remove(key).await
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        self.gate(&self.reads).await?;
        self.inner.get_keys().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
