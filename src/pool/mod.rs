//! The cache client pool.
//!
//! A [`CacheClientPool`] fans cache operations out over a fixed set of
//! [`StorageNode`]s. Which nodes take part, and in what order, comes from the
//! [`SelectionPolicy`]; how their answers are combined comes from the
//! configured read and write modes. Liveness is kept by a [`PingScheduler`]
//! owned by the pool.

mod fanout;
mod node;
mod selection;

pub use fanout::WriteOutcome;
pub use node::{PingOutcome, StorageNode};
pub use selection::SelectionPolicy;

use crate::config::{PoolConfig, WriteMode};
use crate::error::{Error, Operation, Result};
use crate::health::{NodeEvent, NodeEventListener, PingScheduler, SweepReport};
use crate::metrics::PoolMetrics;
use crate::storage::{CacheStorage, RemoteConnector, StorageRegistry};
use crate::types::{CacheItem, ItemMetadata, NodeStatus, PoolStatus};
use bytes::Bytes;
use fanout::{Fanout, WritePolicy};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call cancellation and deadline.
///
/// A timeout here overrides `PoolConfig::operation_timeout` for the call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    cancel: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the call with `Error::Cancelled` when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Abort the call with `Error::Timeout` after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Builder for [`CacheClientPool`].
pub struct CacheClientPoolBuilder {
    config: PoolConfig,
    registry: StorageRegistry,
    listeners: Vec<Arc<dyn NodeEventListener>>,
}

impl CacheClientPoolBuilder {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            registry: StorageRegistry::new(),
            listeners: Vec::new(),
        }
    }

    /// Connector used for `StorageConfig::Remote` nodes.
    pub fn with_connector(mut self, connector: Arc<dyn RemoteConnector>) -> Self {
        self.registry.set_connector(connector);
        self
    }

    /// Storage for the `StorageConfig::Provided` node called `name`.
    pub fn with_storage(mut self, name: impl Into<String>, storage: Arc<dyn CacheStorage>) -> Self {
        self.registry.insert_storage(name.into(), storage);
        self
    }

    /// Listener registered before the first sweep, so it sees every
    /// transition.
    pub fn with_listener(mut self, listener: Arc<dyn NodeEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate the configuration, build every node and start health
    /// checking.
    pub async fn build(self) -> Result<CacheClientPool> {
        let Self {
            config,
            registry,
            listeners,
        } = self;
        validate(&config)?;

        let mut nodes = Vec::with_capacity(config.nodes.len());
        for node_config in &config.nodes {
            match registry.build(node_config, config.node_timeout).await {
                Ok(storage) => nodes.push(Arc::new(StorageNode::new(
                    node_config.name.clone(),
                    node_config.mode,
                    node_config.enabled,
                    storage,
                ))),
                Err(e) => {
                    join_all(nodes.iter().map(|n: &Arc<StorageNode>| n.close())).await;
                    return Err(e);
                }
            }
        }

        let metrics = Arc::new(PoolMetrics::new());
        let scheduler = Arc::new(PingScheduler::new(
            nodes.clone(),
            config.ping.clone(),
            config.force_at_least_one_network_item_enabled,
            metrics.clone(),
        ));
        for listener in listeners {
            scheduler.add_listener(listener);
        }

        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        let has_network = nodes.iter().any(|n| n.is_network());
        let write_policy = WritePolicy {
            quorum: config.write_quorum,
            require_network: config.force_at_least_one_network_item_enabled && has_network,
        };

        info!(
            nodes = nodes.len(),
            network = nodes.iter().filter(|n| n.is_network()).count(),
            read_mode = ?config.read_mode,
            write_mode = ?config.write_mode,
            selection = ?config.selection_order,
            "Cache client pool started"
        );

        Ok(CacheClientPool {
            inner: Arc::new(PoolInner {
                selection: SelectionPolicy::new(
                    config.selection_order,
                    config.custom_index_order.as_deref(),
                ),
                nodes,
                scheduler,
                metrics,
                write_policy,
                config,
                shutdown,
                scheduler_handle: Mutex::new(handle),
                disposed: AtomicBool::new(false),
            }),
        })
    }
}

fn validate(config: &PoolConfig) -> Result<()> {
    if config.nodes.is_empty() {
        return Err(Error::Config("at least one node is required".to_string()));
    }

    let mut names = HashSet::new();
    for node in &config.nodes {
        if node.name.is_empty() {
            return Err(Error::Config("node name must not be empty".to_string()));
        }
        if !names.insert(node.name.as_str()) {
            return Err(Error::Config(format!("duplicate node name: {}", node.name)));
        }
    }

    if let Some(order) = &config.custom_index_order {
        let (known, unknown): (Vec<&String>, Vec<&String>) =
            order.iter().partition(|name| names.contains(name.as_str()));
        if known.is_empty() {
            return Err(Error::Config(
                "custom index order references no configured node".to_string(),
            ));
        }
        for name in unknown {
            warn!(node = %name, "Ignoring unknown node in custom index order");
        }
    }

    if config.node_timeout.is_zero() {
        return Err(Error::Config("node_timeout must be positive".to_string()));
    }

    Ok(())
}

struct PoolInner {
    nodes: Vec<Arc<StorageNode>>,
    selection: SelectionPolicy,
    scheduler: Arc<PingScheduler>,
    metrics: Arc<PoolMetrics>,
    write_policy: WritePolicy,
    config: PoolConfig,
    shutdown: CancellationToken,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Stop the sweep loop even if dispose() was never awaited.
        self.shutdown.cancel();
    }
}

/// Replicated cache client over a set of storage nodes.
///
/// Cloning is cheap and every clone drives the same nodes and scheduler.
#[derive(Clone)]
pub struct CacheClientPool {
    inner: Arc<PoolInner>,
}

impl CacheClientPool {
    pub fn builder(config: PoolConfig) -> CacheClientPoolBuilder {
        CacheClientPoolBuilder::new(config)
    }

    /// Build a pool whose nodes need no connector or provided storage.
    pub async fn new(config: PoolConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub async fn exist_key(&self, key: &str) -> Result<bool> {
        self.exist_key_with(key, &CallOptions::default()).await
    }

    pub async fn exist_key_with(&self, key: &str, options: &CallOptions) -> Result<bool> {
        self.run(Operation::ExistKey, options, async {
            let candidates = self.read_candidates(Operation::ExistKey)?;
            self.fanout()
                .exist_key(self.inner.config.read_mode, &candidates, key)
                .await
        })
        .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheItem>> {
        self.get_with(key, &CallOptions::default()).await
    }

    pub async fn get_with(&self, key: &str, options: &CallOptions) -> Result<Option<CacheItem>> {
        let result = self
            .run(Operation::Get, options, async {
                let candidates = self.read_candidates(Operation::Get)?;
                self.fanout()
                    .get(self.inner.config.read_mode, &candidates, key)
                    .await
            })
            .await;
        if let Ok(found) = &result {
            self.inner.metrics.record_get(found.is_some());
        }
        result
    }

    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        metadata: ItemMetadata,
    ) -> Result<WriteOutcome> {
        self.set_with(key, value, metadata, &CallOptions::default())
            .await
    }

    pub async fn set_with(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        metadata: ItemMetadata,
        options: &CallOptions,
    ) -> Result<WriteOutcome> {
        let value = value.into();
        self.run(Operation::Set, options, async {
            let candidates = self.write_candidates(Operation::Set)?;
            let fanout = self.fanout();
            match self.inner.config.write_mode {
                WriteMode::WritesAll => {
                    fanout
                        .set_all(self.inner.write_policy, &candidates, key, value, metadata)
                        .await
                }
                WriteMode::WriteFirst => fanout.set_first(&candidates, key, value, metadata).await,
            }
        })
        .await
    }

    /// Remove `key` from every write node. Returns whether any node held it.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.remove_with(key, &CallOptions::default()).await
    }

    pub async fn remove_with(&self, key: &str, options: &CallOptions) -> Result<bool> {
        self.run(Operation::Remove, options, async {
            let candidates = non_empty(
                self.inner.selection.order_for_remove(&self.inner.nodes),
                Operation::Remove,
            )?;
            self.fanout().remove(&candidates, key).await
        })
        .await
    }

    /// Sorted union of the keys held by the read nodes. Diagnostics only.
    pub async fn get_keys(&self) -> Result<Vec<String>> {
        self.get_keys_with(&CallOptions::default()).await
    }

    pub async fn get_keys_with(&self, options: &CallOptions) -> Result<Vec<String>> {
        self.run(Operation::GetKeys, options, async {
            let candidates = self.read_candidates(Operation::GetKeys)?;
            self.fanout().get_keys(&candidates).await
        })
        .await
    }

    /// True once health checking has completed a sweep and, when a network
    /// replica is required, a network node is alive.
    pub fn is_ready(&self) -> bool {
        !self.is_disposed() && !self.inner.nodes.is_empty() && self.inner.scheduler.is_ready()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            ready: self.is_ready(),
            sweeps_completed: self.inner.scheduler.sweeps_completed(),
            nodes: self.inner.nodes.iter().map(|n| n.status()).collect(),
        }
    }

    pub fn node(&self, name: &str) -> Option<NodeStatus> {
        self.find_node(name).map(|n| n.status())
    }

    /// Include or exclude a node from selection at runtime.
    pub fn set_node_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let node = self
            .find_node(name)
            .ok_or_else(|| Error::UnknownNode(name.to_string()))?;
        node.set_enabled(enabled);
        info!(node = %name, enabled, "Node enablement changed");
        Ok(())
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        self.inner.metrics.clone()
    }

    /// Receive node state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.scheduler.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn NodeEventListener>) {
        self.inner.scheduler.add_listener(listener);
    }

    /// Run a health sweep now. `Ok(None)` means one was already running.
    pub async fn sweep_now(&self) -> Result<Option<SweepReport>> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        Ok(self.inner.scheduler.sweep().await)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Stop health checking and close every storage. Later calls are no-ops.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.shutdown.cancel();
        let handle = self.inner.scheduler_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Ping scheduler task failed");
            }
        }

        join_all(self.inner.nodes.iter().map(|n| n.close())).await;
        info!(nodes = self.inner.nodes.len(), "Cache client pool disposed");
    }

    fn find_node(&self, name: &str) -> Option<&Arc<StorageNode>> {
        self.inner.nodes.iter().find(|n| n.name() == name)
    }

    fn fanout(&self) -> Fanout<'_> {
        Fanout {
            node_timeout: self.inner.config.node_timeout,
            metrics: &self.inner.metrics,
        }
    }

    fn read_candidates(&self, operation: Operation) -> Result<Vec<Arc<StorageNode>>> {
        non_empty(self.inner.selection.order_for_read(&self.inner.nodes), operation)
    }

    fn write_candidates(&self, operation: Operation) -> Result<Vec<Arc<StorageNode>>> {
        non_empty(self.inner.selection.order_for_write(&self.inner.nodes), operation)
    }

    /// Apply disposal, deadline and cancellation to one operation and
    /// record it.
    async fn run<T>(
        &self,
        operation: Operation,
        options: &CallOptions,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let start = Instant::now();
        let deadline = options.timeout.or(self.inner.config.operation_timeout);
        let bounded = async {
            match deadline {
                Some(d) => tokio::time::timeout(d, fut)
                    .await
                    .unwrap_or(Err(Error::Timeout)),
                None => fut.await,
            }
        };

        let result = match &options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    result = bounded => result,
                }
            }
            None => bounded.await,
        };

        let elapsed = start.elapsed();
        self.inner
            .metrics
            .record_request(operation, result.is_ok(), elapsed);
        match &result {
            Ok(_) => debug!(%operation, elapsed_us = elapsed.as_micros() as u64, "Operation completed"),
            Err(e) => debug!(%operation, error = %e, "Operation failed"),
        }
        result
    }
}

fn non_empty(
    candidates: Vec<Arc<StorageNode>>,
    operation: Operation,
) -> Result<Vec<Arc<StorageNode>>> {
    if candidates.is_empty() {
        Err(Error::NoAvailableNodes { operation })
    } else {
        Ok(candidates)
    }
}

impl std::fmt::Debug for CacheClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClientPool")
            .field("nodes", &self.inner.nodes)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, SelectionOrder, StorageConfig};

    #[tokio::test]
    async fn test_rejects_empty_config() {
        let result = CacheClientPool::new(PoolConfig::new()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_rejects_duplicate_names() {
        let config = PoolConfig::new()
            .with_node(NodeConfig::new("a", StorageConfig::memory(1024)))
            .with_node(NodeConfig::new("a", StorageConfig::memory(1024)));
        let result = CacheClientPool::new(config).await;
        assert!(matches!(result, Err(Error::Config(ref msg)) if msg.contains("duplicate")));
    }

    #[tokio::test]
    async fn test_index_order_ignores_unknown_names() {
        let config = PoolConfig::new()
            .with_node(NodeConfig::new("a", StorageConfig::memory(1024)))
            .with_node(NodeConfig::new("b", StorageConfig::memory(1024)))
            .with_selection_order(SelectionOrder::Index)
            .with_custom_index_order(["b", "ghost"]);
        let pool = CacheClientPool::new(config).await.unwrap();

        let order = pool.inner.selection.order_for_read(&pool.inner.nodes);
        let names: Vec<&str> = order.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_rejects_index_order_without_configured_nodes() {
        let config = PoolConfig::new()
            .with_node(NodeConfig::new("a", StorageConfig::memory(1024)))
            .with_custom_index_order(["ghost"]);
        let result = CacheClientPool::new(config).await;
        assert!(matches!(result, Err(Error::Config(ref msg)) if msg.contains("no configured node")));
    }

    #[tokio::test]
    async fn test_rejects_empty_index_order() {
        let config = PoolConfig::new()
            .with_node(NodeConfig::new("a", StorageConfig::memory(1024)))
            .with_custom_index_order(Vec::<String>::new());
        let result = CacheClientPool::new(config).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_call_options() {
        let options = CallOptions::new().with_timeout(Duration::from_millis(5));
        assert_eq!(options.timeout, Some(Duration::from_millis(5)));
        assert!(options.cancel.is_none());
    }

    #[tokio::test]
    async fn test_set_node_enabled_unknown() {
        let pool = CacheClientPool::new(
            PoolConfig::new().with_node(NodeConfig::new("a", StorageConfig::memory(1024))),
        )
        .await
        .unwrap();

        assert!(matches!(
            pool.set_node_enabled("ghost", false),
            Err(Error::UnknownNode(_))
        ));
        pool.set_node_enabled("a", false).unwrap();
        assert!(!pool.node("a").unwrap().enabled);
        pool.dispose().await;
    }
}
