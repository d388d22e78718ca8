//! Adapter over a remote cache reached through an RPC client.
//!
//! The transport itself lives outside this crate and is consumed through
//! [`RemoteClient`]. [`RemoteStorage`] bounds every call with a deadline and
//! turns transport failures into [`StorageError`]s, so nothing from the
//! transport leaks past the node.
//!
//! A storage built over a [`RemoteConnector`] connects on first use and
//! retries on every later call until a connection is made, so an endpoint
//! that is down at startup is reported by the health sweep instead of
//! failing pool construction.

use super::{CacheStorage, StorageKind, StorageResult};
use crate::error::StorageError;
use crate::types::{CacheItem, ItemMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Error type produced by a transport.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Client side of the RPC transport to one remote cache.
#[async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    async fn exist_key(&self, key: &str) -> Result<bool, TransportError>;

    async fn get(&self, key: &str) -> Result<Option<CacheItem>, TransportError>;

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        metadata: ItemMetadata,
    ) -> Result<bool, TransportError>;

    async fn remove(&self, key: &str) -> Result<bool, TransportError>;

    async fn get_keys(&self) -> Result<Vec<String>, TransportError>;

    /// Lightweight readiness call. Defaults to an existence check.
    async fn ping(&self) -> Result<(), TransportError> {
        self.exist_key(super::PROBE_KEY).await.map(|_| ())
    }

    /// Tear down the connection.
    async fn disconnect(&self) {}
}

/// Opens clients for `StorageConfig::Remote` endpoints.
#[async_trait]
pub trait RemoteConnector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> StorageResult<Arc<dyn RemoteClient>>;
}

/// Storage node backed by a remote cache.
pub struct RemoteStorage {
    endpoint: String,
    client: RwLock<Option<Arc<dyn RemoteClient>>>,
    connector: Option<Arc<dyn RemoteConnector>>,
    call_timeout: Duration,
    closed: AtomicBool,
}

impl RemoteStorage {
    /// Wrap a connected client. Every call is bounded by `call_timeout`.
    pub fn new(
        endpoint: impl Into<String>,
        client: Arc<dyn RemoteClient>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: RwLock::new(Some(client)),
            connector: None,
            call_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Storage that opens its client through `connector` when first needed.
    pub fn with_connector(
        endpoint: impl Into<String>,
        connector: Arc<dyn RemoteConnector>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: RwLock::new(None),
            connector: Some(connector),
            call_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Remote endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.client.read().is_some()
    }

    /// Current client, connecting first if there is none.
    pub async fn connect(&self) -> StorageResult<Arc<dyn RemoteClient>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        let current = self.client.read().clone();
        if let Some(client) = current {
            return Ok(client);
        }
        let connector = self
            .connector
            .as_ref()
            .ok_or_else(|| StorageError::Unavailable(format!("{} not connected", self.endpoint)))?;

        let client = tokio::time::timeout(self.call_timeout, connector.connect(&self.endpoint))
            .await
            .map_err(|_| StorageError::Timeout(self.call_timeout))??;
        info!(endpoint = %self.endpoint, "Connected to remote cache");

        // A concurrent caller may have connected first; keep its client.
        let client = self.client.write().get_or_insert(client).clone();
        Ok(client)
    }

    async fn call<T, F>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = Result<T, TransportError>> + Send,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, error = %e, "Remote call failed");
                Err(StorageError::Unavailable(e.to_string()))
            }
            Err(_) => Err(StorageError::Timeout(self.call_timeout)),
        }
    }
}

#[async_trait]
impl CacheStorage for RemoteStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Remote
    }

    async fn exist_key(&self, key: &str) -> StorageResult<bool> {
        let client = self.connect().await?;
        self.call(client.exist_key(key)).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<CacheItem>> {
        let client = self.connect().await?;
        self.call(client.get(key)).await
    }

    async fn set(&self, key: &str, value: Bytes, metadata: ItemMetadata) -> StorageResult<bool> {
        let client = self.connect().await?;
        self.call(client.set(key, value, metadata)).await
    }

    async fn remove(&self, key: &str) -> StorageResult<bool> {
        let client = self.connect().await?;
        self.call(client.remove(key)).await
    }

    async fn get_keys(&self) -> StorageResult<Vec<String>> {
        let client = self.connect().await?;
        self.call(client.get_keys()).await
    }

    async fn probe(&self) -> StorageResult<()> {
        let client = self.connect().await?;
        self.call(client.ping()).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let client = self.client.write().take();
        if let Some(client) = client {
            client.disconnect().await;
        }
    }
}

impl std::fmt::Debug for RemoteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStorage")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    /// Client that forwards to an in-process store, optionally failing or
    /// stalling.
    struct LoopbackClient {
        inner: MemoryStorage,
        fail: AtomicBool,
        stall: AtomicBool,
        disconnected: AtomicBool,
    }

    impl LoopbackClient {
        fn new() -> Self {
            Self {
                inner: MemoryStorage::new(1024 * 1024, None),
                fail: AtomicBool::new(false),
                stall: AtomicBool::new(false),
                disconnected: AtomicBool::new(false),
            }
        }

        async fn gate(&self) -> Result<(), TransportError> {
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err("connection refused".into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteClient for LoopbackClient {
        async fn exist_key(&self, key: &str) -> Result<bool, TransportError> {
            self.gate().await?;
            Ok(self.inner.exist_key(key).await?)
        }

        async fn get(&self, key: &str) -> Result<Option<CacheItem>, TransportError> {
            self.gate().await?;
            Ok(self.inner.get(key).await?)
        }

        async fn set(
            &self,
            key: &str,
            value: Bytes,
            metadata: ItemMetadata,
        ) -> Result<bool, TransportError> {
            self.gate().await?;
            Ok(self.inner.set(key, value, metadata).await?)
        }

        async fn remove(&self, key: &str) -> Result<bool, TransportError> {
            self.gate().await?;
            Ok(self.inner.remove(key).await?)
        }

        async fn get_keys(&self) -> Result<Vec<String>, TransportError> {
            self.gate().await?;
            Ok(self.inner.get_keys().await?)
        }

        async fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_forwards_calls() {
        let client = Arc::new(LoopbackClient::new());
        let storage = RemoteStorage::new("loopback", client.clone(), Duration::from_secs(1));

        assert_eq!(storage.kind(), StorageKind::Remote);
        assert!(storage
            .set("k", Bytes::from("v"), ItemMetadata::new())
            .await
            .unwrap());
        let item = storage.get("k").await.unwrap().unwrap();
        assert_eq!(item.value, Bytes::from("v"));
        assert!(storage.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_error_is_translated() {
        let client = Arc::new(LoopbackClient::new());
        client.fail.store(true, Ordering::SeqCst);
        let storage = RemoteStorage::new("loopback", client, Duration::from_secs(1));

        let err = storage.get("k").await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(ref msg) if msg.contains("refused")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout() {
        let client = Arc::new(LoopbackClient::new());
        client.stall.store(true, Ordering::SeqCst);
        let storage = RemoteStorage::new("loopback", client, Duration::from_millis(100));

        let err = storage.exist_key("k").await.unwrap_err();
        assert!(err.is_timeout());
    }

    struct SwitchConnector {
        client: Arc<LoopbackClient>,
        up: AtomicBool,
        attempts: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl RemoteConnector for SwitchConnector {
        async fn connect(&self, endpoint: &str) -> StorageResult<Arc<dyn RemoteClient>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(self.client.clone())
            } else {
                Err(StorageError::Unavailable(format!("{} down", endpoint)))
            }
        }
    }

    #[tokio::test]
    async fn test_connects_on_first_use_and_retries() {
        let connector = Arc::new(SwitchConnector {
            client: Arc::new(LoopbackClient::new()),
            up: AtomicBool::new(false),
            attempts: std::sync::atomic::AtomicU32::new(0),
        });
        let storage =
            RemoteStorage::with_connector("cache:7000", connector.clone(), Duration::from_secs(1));
        assert!(!storage.is_connected());

        let err = storage.probe().await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(ref msg) if msg.contains("down")));
        assert!(!storage.is_connected());

        connector.up.store(true, Ordering::SeqCst);
        assert!(storage.probe().await.is_ok());
        assert!(storage.is_connected());

        storage
            .set("k", Bytes::from("v"), ItemMetadata::new())
            .await
            .unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_disconnects_once() {
        let client = Arc::new(LoopbackClient::new());
        let storage = RemoteStorage::new("loopback", client.clone(), Duration::from_secs(1));

        storage.close().await;
        storage.close().await;
        assert!(client.disconnected.load(Ordering::SeqCst));
        assert!(matches!(storage.get("k").await, Err(StorageError::Closed)));
    }
}
