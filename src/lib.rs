//! Replicated cache client pool.
//!
//! This crate fans cache operations out over a fixed set of storage nodes:
//! - **In-process** nodes backed by Moka
//! - **File** nodes, one bincode file per key
//! - **Remote** nodes reached through a pluggable [`RemoteConnector`]
//!
//! # Features
//!
//! - Read strategies: race every node, try nodes in order, or ask them all
//! - Write strategies: replicate to every node or write to the first one
//! - Node ordering by last ping time, a fixed index or round robin
//! - Background health checking of network nodes, with dead nodes excluded
//!   until they answer again
//! - Optional guarantee that every replicated write reached a network node
//! - Per-call cancellation and deadlines
//! - Prometheus-style metrics and node state events
//!
//! # Example
//!
//! ```rust,no_run
//! use cachepool::{CacheClientPool, ItemMetadata, NodeConfig, PoolConfig, StorageConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PoolConfig::new()
//!         .with_node(NodeConfig::new("local", StorageConfig::memory(64 * 1024 * 1024)))
//!         .with_node(NodeConfig::new("disk", StorageConfig::file("/var/cache/app")))
//!         .with_node_timeout(Duration::from_millis(250));
//!
//!     let pool = CacheClientPool::new(config).await?;
//!
//!     // Replicated to every write node
//!     pool.set("user:123", "Alice", ItemMetadata::new().with_ttl(Duration::from_secs(60)))
//!         .await?;
//!
//!     // Answered by the fastest node holding the key
//!     if let Some(item) = pool.get("user:123").await? {
//!         println!("Found: {:?}", item.value);
//!     }
//!
//!     pool.remove("user:123").await?;
//!     pool.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              CacheClientPool                │
//! │  exist_key / get / set / remove / get_keys  │
//! └─────────────────────────────────────────────┘
//!          │                          │
//!          ▼                          ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │ SelectionPolicy  │      │  PingScheduler   │
//! │ order candidates │      │ sweeps network   │
//! └──────────────────┘      │ nodes, emits     │
//!          │                │ NodeEvents       │
//!          ▼                └──────────────────┘
//! ┌─────────┐   ┌─────────┐   ┌─────────┐
//! │  Moka   │   │  File   │   │ Remote  │
//! └─────────┘   └─────────┘   └─────────┘
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod storage;
pub mod testing;
pub mod types;

pub use config::{
    NodeConfig, PingConfig, PoolConfig, ReadMode, SelectionOrder, StorageConfig, WriteMode,
    WriteQuorum,
};
pub use error::{Error, Operation, Result, StorageError};
pub use pool::{CacheClientPool, CacheClientPoolBuilder, CallOptions, WriteOutcome};
pub use types::{CacheItem, ItemMetadata, NodeMode, NodeName, NodeState, NodeStatus, PoolStatus};

// Re-export health types
pub use health::{LoggingEventListener, NodeEvent, NodeEventListener, SweepReport};

// Re-export storage types
pub use storage::{
    CacheStorage, FileStorage, MemoryStorage, RemoteClient, RemoteConnector, RemoteStorage,
    StorageKind, StorageRegistry, TransportError,
};

// Re-export metrics types
pub use metrics::{MetricsSnapshot, PoolMetrics};

// Re-export testing types
pub use testing::{FlakyStorage, LoopbackConnector, TestPool};
