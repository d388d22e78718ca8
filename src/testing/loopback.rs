//! In-process stand-in for the remote transport.

use super::FlakyStorage;
use crate::error::StorageError;
use crate::storage::{
    CacheStorage, RemoteClient, RemoteConnector, StorageResult, TransportError,
};
use crate::types::{CacheItem, ItemMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Connector whose endpoints are [`FlakyStorage`] servers created on first
/// use, so tests can fail or slow a "remote" cache by endpoint.
#[derive(Default)]
pub struct LoopbackConnector {
    servers: Mutex<HashMap<String, Arc<FlakyStorage>>>,
    refused: Mutex<HashSet<String>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server behind `endpoint`, created if needed.
    pub fn server(&self, endpoint: &str) -> Arc<FlakyStorage> {
        self.servers
            .lock()
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(FlakyStorage::local()))
            .clone()
    }

    /// Refuse (or accept again) new connections to `endpoint`. Clients
    /// already connected are unaffected.
    pub fn set_refusing(&self, endpoint: &str, refusing: bool) {
        let mut refused = self.refused.lock();
        if refusing {
            refused.insert(endpoint.to_string());
        } else {
            refused.remove(endpoint);
        }
    }
}

#[async_trait]
impl RemoteConnector for LoopbackConnector {
    async fn connect(&self, endpoint: &str) -> StorageResult<Arc<dyn RemoteClient>> {
        if self.refused.lock().contains(endpoint) {
            return Err(StorageError::Unavailable(format!(
                "{}: connection refused",
                endpoint
            )));
        }
        Ok(Arc::new(LoopbackClient {
            server: self.server(endpoint),
        }))
    }
}

struct LoopbackClient {
    server: Arc<FlakyStorage>,
}

#[async_trait]
impl RemoteClient for LoopbackClient {
    async fn exist_key(&self, key: &str) -> Result<bool, TransportError> {
        Ok(self.server.exist_key(key).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<CacheItem>, TransportError> {
        Ok(self.server.get(key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        metadata: ItemMetadata,
    ) -> Result<bool, TransportError> {
        Ok(self.server.set(key, value, metadata).await?)
    }

    async fn remove(&self, key: &str) -> Result<bool, TransportError> {
        Ok(self.server.remove(key).await?)
    }

    async fn get_keys(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.server.get_keys().await?)
    }
}
