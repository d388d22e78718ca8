//! Storage backends wrapped by pool nodes.
//!
//! Every backend implements [`CacheStorage`], the minimal cache contract the
//! pool fans out over. Backends are tagged with a [`StorageKind`] so the pool
//! can tell in-process nodes from network nodes without inspecting types.

mod factory;
mod file;
mod memory;
mod remote;

pub use factory::StorageRegistry;
pub use file::FileStorage;
pub use memory::{MemoryStats, MemoryStorage};
pub use remote::{RemoteClient, RemoteConnector, RemoteStorage, TransportError};

use crate::error::StorageError;
use crate::types::{CacheItem, ItemMetadata};
use async_trait::async_trait;
use bytes::Bytes;

/// Key looked up by default probes. Nothing ever stores it.
pub const PROBE_KEY: &str = "__cachepool_probe__";

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Where a backend keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// In-process memory.
    Local,
    /// Local disk.
    File,
    /// Reached over the network.
    Remote,
}

impl StorageKind {
    /// Network backends are health checked, the others are assumed alive.
    pub fn is_network(self) -> bool {
        matches!(self, StorageKind::Remote)
    }
}

/// The minimal cache contract every node wraps.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    /// Backend kind.
    fn kind(&self) -> StorageKind;

    /// Check if a key exists.
    async fn exist_key(&self, key: &str) -> StorageResult<bool>;

    /// Fetch an item. `Ok(None)` means not found.
    async fn get(&self, key: &str) -> StorageResult<Option<CacheItem>>;

    /// Store an item. `Ok(false)` means the backend declined it.
    async fn set(&self, key: &str, value: Bytes, metadata: ItemMetadata) -> StorageResult<bool>;

    /// Remove a key. Returns whether the key was present.
    async fn remove(&self, key: &str) -> StorageResult<bool>;

    /// List stored keys. Diagnostics only.
    async fn get_keys(&self) -> StorageResult<Vec<String>>;

    /// Cheap liveness check used by the health sweep.
    async fn probe(&self) -> StorageResult<()> {
        self.exist_key(PROBE_KEY).await.map(|_| ())
    }

    /// Release the backend. Later calls fail with `StorageError::Closed`.
    async fn close(&self) {}
}
