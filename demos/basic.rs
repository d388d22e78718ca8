//! Basic example of using the cache client pool.
//!
//! Builds a pool over an in-process node, a file node and a simulated
//! remote node, then takes the remote node down and brings it back.

use async_trait::async_trait;
use bytes::Bytes;
use cachepool::{
    CacheClientPool, CacheItem, CacheStorage, ItemMetadata, LoggingEventListener, MemoryStorage,
    NodeConfig, PingConfig, PoolConfig, RemoteClient, RemoteConnector, StorageConfig,
    StorageError, TransportError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A "remote" cache living in this process, with a switch to cut it off.
struct SimulatedServer {
    store: MemoryStorage,
    online: AtomicBool,
}

impl SimulatedServer {
    fn check(&self) -> Result<(), TransportError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("connection refused".into())
        }
    }
}

struct SimulatedClient(Arc<SimulatedServer>);

#[async_trait]
impl RemoteClient for SimulatedClient {
    async fn exist_key(&self, key: &str) -> Result<bool, TransportError> {
        self.0.check()?;
        Ok(self.0.store.exist_key(key).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<CacheItem>, TransportError> {
        self.0.check()?;
        Ok(self.0.store.get(key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        metadata: ItemMetadata,
    ) -> Result<bool, TransportError> {
        self.0.check()?;
        Ok(self.0.store.set(key, value, metadata).await?)
    }

    async fn remove(&self, key: &str) -> Result<bool, TransportError> {
        self.0.check()?;
        Ok(self.0.store.remove(key).await?)
    }

    async fn get_keys(&self) -> Result<Vec<String>, TransportError> {
        self.0.check()?;
        Ok(self.0.store.get_keys().await?)
    }
}

struct SimulatedConnector(Arc<SimulatedServer>);

#[async_trait]
impl RemoteConnector for SimulatedConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn RemoteClient>, StorageError> {
        println!("Connecting to {}", endpoint);
        Ok(Arc::new(SimulatedClient(self.0.clone())))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("cachepool=debug,info")
        .init();

    let server = Arc::new(SimulatedServer {
        store: MemoryStorage::new(16 * 1024 * 1024, None),
        online: AtomicBool::new(true),
    });
    let dir = tempfile::tempdir()?;

    let config = PoolConfig::new()
        .with_node(NodeConfig::new("local", StorageConfig::memory(16 * 1024 * 1024)))
        .with_node(NodeConfig::new("disk", StorageConfig::file(dir.path())))
        .with_node(NodeConfig::new("remote1", StorageConfig::remote("cache-1:6379")))
        .with_force_network(true)
        .with_ping_config(
            PingConfig::default()
                .with_delay(Duration::from_secs(2))
                .with_delay_on_error(Duration::from_millis(500)),
        );

    let pool = CacheClientPool::builder(config)
        .with_connector(Arc::new(SimulatedConnector(server.clone())))
        .with_listener(Arc::new(LoggingEventListener))
        .build()
        .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("Ready: {}", pool.is_ready());

    println!("\n--- Replicated write ---");
    let outcome = pool.set("user:1", "alice", ItemMetadata::new()).await?;
    println!("Written to {:?}", outcome.succeeded);

    if let Some(item) = pool.get("user:1").await? {
        println!("Got user:1 = {}", String::from_utf8_lossy(&item.value));
    }

    println!("\n--- Remote outage ---");
    server.online.store(false, Ordering::SeqCst);
    pool.sweep_now().await?;
    match pool.set("user:2", "bob", ItemMetadata::new()).await {
        Ok(outcome) => println!("Unexpected success: {:?}", outcome),
        Err(e) => println!("Write refused: {}", e),
    }

    println!("\n--- Recovery ---");
    server.online.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let outcome = pool.set("user:2", "bob", ItemMetadata::new()).await?;
    println!("Written to {:?}", outcome.succeeded);

    println!("\nPool status:");
    for node in pool.status().nodes {
        println!(
            "  {:<8} {:?} last_ping={}ms network={}",
            node.name, node.state, node.last_ping_ms, node.is_network
        );
    }

    println!("\nMetrics:\n{}", pool.metrics().to_prometheus());

    pool.dispose().await;
    Ok(())
}
