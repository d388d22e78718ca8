//! Core types used throughout the cache client pool.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Node name, unique within a pool.
pub type NodeName = String;

/// Which operations a node takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMode {
    /// Serves reads only.
    Read,
    /// Receives writes only.
    Write,
    /// Serves reads and receives writes.
    ReadWrite,
}

impl NodeMode {
    /// Check if the mode includes reads.
    pub fn can_read(self) -> bool {
        matches!(self, NodeMode::Read | NodeMode::ReadWrite)
    }

    /// Check if the mode includes writes.
    pub fn can_write(self) -> bool {
        matches!(self, NodeMode::Write | NodeMode::ReadWrite)
    }
}

/// Liveness of a node as last observed by the ping scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not probed yet.
    Unknown,
    /// Last probe succeeded.
    Alive,
    /// Probe failed often enough to exclude the node.
    Dead,
}

impl NodeState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            NodeState::Unknown => 0,
            NodeState::Alive => 1,
            NodeState::Dead => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => NodeState::Alive,
            2 => NodeState::Dead,
            _ => NodeState::Unknown,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Unknown => write!(f, "unknown"),
            NodeState::Alive => write!(f, "alive"),
            NodeState::Dead => write!(f, "dead"),
        }
    }
}

/// Metadata stored alongside a cached value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Per-entry time-to-live. `None` falls back to the backend default.
    pub ttl: Option<Duration>,
    /// Free-form tags carried with the value.
    pub tags: Vec<String>,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl ItemMetadata {
    /// Create metadata stamped with the current time.
    pub fn new() -> Self {
        Self {
            ttl: None,
            tags: Vec::new(),
            created_at_ms: now_ms(),
        }
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Absolute expiration in milliseconds since the Unix epoch, if any.
    pub fn expires_at_ms(&self) -> Option<u64> {
        self.ttl
            .map(|ttl| self.created_at_ms.saturating_add(ttl.as_millis() as u64))
    }

    /// Check if the entry has expired at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms().is_some_and(|at| at <= now_ms)
    }
}

/// A cached value and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheItem {
    pub value: Bytes,
    pub metadata: ItemMetadata,
}

impl CacheItem {
    /// Create an item with fresh metadata.
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            metadata: ItemMetadata::new(),
        }
    }

    /// Create an item with the given metadata.
    pub fn with_metadata(value: impl Into<Bytes>, metadata: ItemMetadata) -> Self {
        Self {
            value: value.into(),
            metadata,
        }
    }
}

/// Point-in-time status of one node, for health dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: NodeName,
    pub mode: NodeMode,
    pub state: NodeState,
    pub last_ping_ms: u64,
    pub enabled: bool,
    pub is_network: bool,
    pub consecutive_failures: u32,
}

/// Point-in-time status of the whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Whether the pool reports itself ready.
    pub ready: bool,
    /// Number of completed ping sweeps.
    pub sweeps_completed: u64,
    /// Per-node status in insertion order.
    pub nodes: Vec<NodeStatus>,
}

impl PoolStatus {
    /// Number of nodes currently alive.
    pub fn alive_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Alive)
            .count()
    }
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_mode_capabilities() {
        assert!(NodeMode::Read.can_read());
        assert!(!NodeMode::Read.can_write());
        assert!(NodeMode::Write.can_write());
        assert!(!NodeMode::Write.can_read());
        assert!(NodeMode::ReadWrite.can_read());
        assert!(NodeMode::ReadWrite.can_write());
    }

    #[test]
    fn test_node_state_roundtrip() {
        for state in [NodeState::Unknown, NodeState::Alive, NodeState::Dead] {
            assert_eq!(NodeState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn test_metadata_expiration() {
        let meta = ItemMetadata {
            ttl: Some(Duration::from_secs(10)),
            tags: vec![],
            created_at_ms: 1_000,
        };
        assert_eq!(meta.expires_at_ms(), Some(11_000));
        assert!(!meta.is_expired_at(10_999));
        assert!(meta.is_expired_at(11_000));

        let forever = ItemMetadata::new();
        assert!(!forever.is_expired_at(u64::MAX));
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&NodeMode::ReadWrite).unwrap();
        assert_eq!(json, "\"read_write\"");
        let state: NodeState = serde_json::from_str("\"dead\"").unwrap();
        assert_eq!(state, NodeState::Dead);
    }
}
