//! Testing utilities for the cache client pool.
//!
//! - [`FlakyStorage`]: in-memory storage with switchable failures, latency
//!   and storage kind, for driving nodes into any liveness state
//! - [`LoopbackConnector`]: a [`RemoteConnector`](crate::storage::RemoteConnector)
//!   whose endpoints are in-process [`FlakyStorage`]s
//! - [`TestPool`]: a pool over named flaky nodes
//! - [`wait_for`] / [`wait_for_result`]: polling helpers
//!
//! # Example
//!
//! ```rust,ignore
//! let harness = TestPool::builder()
//!     .local("local")
//!     .network("remote1")
//!     .configure(|c| c.with_force_network(true))
//!     .build()
//!     .await?;
//!
//! harness.storage("remote1").unwrap().set_failing(true);
//! harness.pool.sweep_now().await?;
//! assert!(harness.pool.set("k", "v", ItemMetadata::new()).await.is_err());
//! ```

mod flaky;
mod loopback;
mod utils;

mod pool_integration_tests;

pub use flaky::FlakyStorage;
pub use loopback::LoopbackConnector;
pub use utils::{wait_for, wait_for_result};

#[cfg(test)]
pub(crate) use utils::init_tracing;

use crate::config::{NodeConfig, PingConfig, PoolConfig, StorageConfig};
use crate::error::Result;
use crate::pool::CacheClientPool;
use crate::types::NodeMode;
use std::sync::Arc;
use std::time::Duration;

/// A pool whose every node is a [`FlakyStorage`].
pub struct TestPool {
    pub pool: CacheClientPool,
    storages: Vec<(String, Arc<FlakyStorage>)>,
}

impl TestPool {
    pub fn builder() -> TestPoolBuilder {
        TestPoolBuilder::new()
    }

    /// Storage behind the node called `name`.
    pub fn storage(&self, name: &str) -> Option<&Arc<FlakyStorage>> {
        self.storages
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Write counts per node, in insertion order.
    pub fn writes(&self) -> Vec<u64> {
        self.storages.iter().map(|(_, s)| s.writes()).collect()
    }
}

/// Builder for [`TestPool`].
///
/// Sweeps are spaced an hour apart so tests drive them with
/// `CacheClientPool::sweep_now`.
pub struct TestPoolBuilder {
    config: PoolConfig,
    storages: Vec<(String, Arc<FlakyStorage>)>,
}

impl TestPoolBuilder {
    pub fn new() -> Self {
        let ping = PingConfig::default()
            .with_delay(Duration::from_secs(3600))
            .with_delay_on_error(Duration::from_secs(3600))
            .with_timeout(Duration::from_millis(500));
        Self {
            config: PoolConfig::new()
                .with_ping_config(ping)
                .with_node_timeout(Duration::from_millis(500)),
            storages: Vec::new(),
        }
    }

    /// Add a read/write in-process node.
    pub fn local(self, name: &str) -> Self {
        self.node(name, NodeMode::ReadWrite, FlakyStorage::local())
    }

    /// Add a read/write network node.
    pub fn network(self, name: &str) -> Self {
        self.node(name, NodeMode::ReadWrite, FlakyStorage::network())
    }

    pub fn node(mut self, name: &str, mode: NodeMode, storage: FlakyStorage) -> Self {
        self.config = self
            .config
            .with_node(NodeConfig::new(name, StorageConfig::Provided).with_mode(mode));
        self.storages.push((name.to_string(), Arc::new(storage)));
        self
    }

    /// Adjust the pool configuration.
    pub fn configure(mut self, f: impl FnOnce(PoolConfig) -> PoolConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub async fn build(self) -> Result<TestPool> {
        let mut builder = CacheClientPool::builder(self.config);
        for (name, storage) in &self.storages {
            builder = builder.with_storage(name.clone(), storage.clone());
        }
        Ok(TestPool {
            pool: builder.build().await?,
            storages: self.storages,
        })
    }
}

impl Default for TestPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
