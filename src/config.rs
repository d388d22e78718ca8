//! Configuration types for the cache client pool.
//!
//! Configuration arrives already parsed; the types derive serde so that an
//! outer layer can bind them from whatever format it reads.

use crate::types::NodeMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a cache client pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Fan-out strategy for reads.
    pub read_mode: ReadMode,

    /// Fan-out strategy for writes.
    pub write_mode: WriteMode,

    /// How candidate nodes are ordered.
    pub selection_order: SelectionOrder,

    /// Explicit node order used by `SelectionOrder::Index`.
    pub custom_index_order: Option<Vec<String>>,

    /// Health check configuration.
    pub ping: PingConfig,

    /// Refuse readiness and fail replicated writes unless a network node
    /// took part.
    pub force_at_least_one_network_item_enabled: bool,

    /// Success requirement for `WriteMode::WritesAll`.
    pub write_quorum: WriteQuorum,

    /// Deadline for a single node operation.
    pub node_timeout: Duration,

    /// Default deadline for a whole pool operation.
    /// None means only the per-node deadline applies.
    pub operation_timeout: Option<Duration>,

    /// Nodes in insertion order.
    pub nodes: Vec<NodeConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::FastestWins,
            write_mode: WriteMode::WritesAll,
            selection_order: SelectionOrder::PingTime,
            custom_index_order: None,
            ping: PingConfig::default(),
            force_at_least_one_network_item_enabled: false,
            write_quorum: WriteQuorum::All,
            node_timeout: Duration::from_secs(5),
            operation_timeout: None,
            nodes: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default policies and no nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Set the read mode.
    pub fn with_read_mode(mut self, mode: ReadMode) -> Self {
        self.read_mode = mode;
        self
    }

    /// Set the write mode.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Set the selection order.
    pub fn with_selection_order(mut self, order: SelectionOrder) -> Self {
        self.selection_order = order;
        self
    }

    /// Set an explicit node order and switch to `SelectionOrder::Index`.
    pub fn with_custom_index_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_index_order = Some(names.into_iter().map(Into::into).collect());
        self.selection_order = SelectionOrder::Index;
        self
    }

    /// Set the health check configuration.
    pub fn with_ping_config(mut self, ping: PingConfig) -> Self {
        self.ping = ping;
        self
    }

    /// Require a network replica for readiness and replicated writes.
    pub fn with_force_network(mut self, enabled: bool) -> Self {
        self.force_at_least_one_network_item_enabled = enabled;
        self
    }

    /// Set the write quorum.
    pub fn with_write_quorum(mut self, quorum: WriteQuorum) -> Self {
        self.write_quorum = quorum;
        self
    }

    /// Set the per-node deadline.
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Set the default deadline for whole operations.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

/// Fan-out strategy for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Race every candidate and return the first valid answer.
    FastestWins,
    /// Ask candidates one at a time, falling through on failure.
    FirstOnly,
    /// Ask every candidate and aggregate.
    Broadcast,
}

/// Fan-out strategy for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replicate to every candidate.
    WritesAll,
    /// Write to the first candidate only.
    WriteFirst,
}

/// Success requirement for replicated writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteQuorum {
    /// Every candidate must succeed.
    All,
    /// More than half of the candidates must succeed.
    Majority,
}

impl WriteQuorum {
    /// Number of successes required out of `candidates`.
    pub fn required(self, candidates: usize) -> usize {
        match self {
            WriteQuorum::All => candidates,
            WriteQuorum::Majority => candidates / 2 + 1,
        }
    }
}

/// Ordering applied to candidate nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrder {
    /// Fastest last ping first, local nodes ahead of network nodes.
    PingTime,
    /// Fixed order from `custom_index_order`.
    Index,
    /// Rotate the starting node on every call.
    RoundRobin,
}

/// Health check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    /// Wait between sweeps while every network node is alive.
    pub delay: Duration,

    /// Wait between sweeps while some network node is dead or unknown.
    pub delay_on_error: Duration,

    /// Deadline for a single probe.
    pub timeout: Duration,

    /// Consecutive failed probes before a node is marked dead.
    pub failure_threshold: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(30),
            delay_on_error: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            failure_threshold: 1,
        }
    }
}

impl PingConfig {
    /// Set the steady-state delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the delay used after a failure.
    pub fn with_delay_on_error(mut self, delay: Duration) -> Self {
        self.delay_on_error = delay;
        self
    }

    /// Set the probe deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of failed probes before a node is marked dead.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }
}

/// Per-node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node name.
    pub name: String,

    /// Read/write participation.
    #[serde(default = "default_mode")]
    pub mode: NodeMode,

    /// Disabled nodes are never selected.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Which backend the node wraps.
    pub storage: StorageConfig,
}

fn default_mode() -> NodeMode {
    NodeMode::ReadWrite
}

fn default_enabled() -> bool {
    true
}

impl NodeConfig {
    /// Create an enabled read/write node.
    pub fn new(name: impl Into<String>, storage: StorageConfig) -> Self {
        Self {
            name: name.into(),
            mode: NodeMode::ReadWrite,
            enabled: true,
            storage,
        }
    }

    /// Set the node mode.
    pub fn with_mode(mut self, mode: NodeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable the node.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Backend selection for a node, resolved by the storage registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// In-process memory cache.
    Memory {
        max_capacity: u64,
        default_ttl: Option<Duration>,
    },

    /// Directory of entry files.
    File { dir: PathBuf },

    /// Remote cache reached through a registered connector.
    Remote { endpoint: String },

    /// Storage handed to the pool builder directly under the node's name.
    Provided,
}

impl StorageConfig {
    /// In-memory storage with the given capacity and no default TTL.
    pub fn memory(max_capacity: u64) -> Self {
        StorageConfig::Memory {
            max_capacity,
            default_ttl: None,
        }
    }

    /// File storage rooted at `dir`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        StorageConfig::File { dir: dir.into() }
    }

    /// Remote storage at `endpoint`.
    pub fn remote(endpoint: impl Into<String>) -> Self {
        StorageConfig::Remote {
            endpoint: endpoint.into(),
        }
    }
}
