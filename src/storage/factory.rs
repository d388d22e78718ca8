//! Resolves [`StorageConfig`] entries into live backends.

use super::{CacheStorage, FileStorage, MemoryStorage, RemoteConnector, RemoteStorage};
use crate::config::{NodeConfig, StorageConfig};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Factory that builds the storage behind each configured node.
///
/// Remote backends need a [`RemoteConnector`]; `StorageConfig::Provided`
/// nodes need a storage registered under the node's name. A remote endpoint
/// that refuses the first connection still gets a node, which reconnects on
/// its next call.
#[derive(Default)]
pub struct StorageRegistry {
    connector: Option<Arc<dyn RemoteConnector>>,
    provided: HashMap<String, Arc<dyn CacheStorage>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connector used for `StorageConfig::Remote`.
    pub fn with_connector(mut self, connector: Arc<dyn RemoteConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Register a ready-made storage for the node called `name`.
    pub fn with_storage(mut self, name: impl Into<String>, storage: Arc<dyn CacheStorage>) -> Self {
        self.provided.insert(name.into(), storage);
        self
    }

    pub(crate) fn insert_storage(&mut self, name: String, storage: Arc<dyn CacheStorage>) {
        self.provided.insert(name, storage);
    }

    pub(crate) fn set_connector(&mut self, connector: Arc<dyn RemoteConnector>) {
        self.connector = Some(connector);
    }

    /// Build the storage for one node. Remote calls are bounded by
    /// `call_timeout`.
    pub async fn build(
        &self,
        node: &NodeConfig,
        call_timeout: Duration,
    ) -> Result<Arc<dyn CacheStorage>> {
        let storage: Arc<dyn CacheStorage> = match &node.storage {
            StorageConfig::Memory {
                max_capacity,
                default_ttl,
            } => Arc::new(MemoryStorage::new(*max_capacity, *default_ttl)),
            StorageConfig::File { dir } => {
                let storage = FileStorage::open(dir.clone()).await.map_err(|e| {
                    Error::Config(format!(
                        "node {}: cannot open {}: {}",
                        node.name,
                        dir.display(),
                        e
                    ))
                })?;
                Arc::new(storage)
            }
            StorageConfig::Remote { endpoint } => {
                let connector = self.connector.as_ref().ok_or_else(|| {
                    Error::Config(format!(
                        "node {}: no remote connector registered for {}",
                        node.name, endpoint
                    ))
                })?;
                let remote =
                    RemoteStorage::with_connector(endpoint.clone(), connector.clone(), call_timeout);
                // An unreachable endpoint is left to the health sweep.
                if let Err(e) = remote.connect().await {
                    warn!(
                        node = %node.name,
                        endpoint = %endpoint,
                        error = %e,
                        "Remote cache unreachable at startup"
                    );
                }
                Arc::new(remote)
            }
            StorageConfig::Provided => self.provided.get(&node.name).cloned().ok_or_else(|| {
                Error::Config(format!("node {}: no storage provided", node.name))
            })?,
        };

        debug!(node = %node.name, kind = ?storage.kind(), "Built storage");
        Ok(storage)
    }
}
