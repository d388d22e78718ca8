//! A storage backend wrapped with the liveness view the pool keeps for it.

use crate::error::StorageError;
use crate::storage::{CacheStorage, StorageResult};
use crate::types::{CacheItem, ItemMetadata, NodeMode, NodeName, NodeState, NodeStatus};
use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Result of one liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingOutcome {
    pub alive: bool,
    pub elapsed: Duration,
}

/// One backend in the pool.
///
/// `state`, `last_ping_ms` and `consecutive_failures` are written by the
/// ping scheduler only. Readers may see a value one sweep old.
pub struct StorageNode {
    name: NodeName,
    mode: NodeMode,
    storage: Arc<dyn CacheStorage>,
    is_network: bool,
    enabled: AtomicBool,
    state: AtomicU8,
    last_ping_ms: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl StorageNode {
    /// Wrap a storage. Local backends start alive, network backends start
    /// unknown until their first probe.
    pub fn new(
        name: impl Into<NodeName>,
        mode: NodeMode,
        enabled: bool,
        storage: Arc<dyn CacheStorage>,
    ) -> Self {
        let is_network = storage.kind().is_network();
        let initial = if is_network {
            NodeState::Unknown
        } else {
            NodeState::Alive
        };

        Self {
            name: name.into(),
            mode,
            storage,
            is_network,
            enabled: AtomicBool::new(enabled),
            state: AtomicU8::new(initial.to_u8()),
            last_ping_ms: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn is_network(&self) -> bool {
        self.is_network
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Latency of the last probe in milliseconds. Zero for local nodes.
    pub fn last_ping_ms(&self) -> u64 {
        self.last_ping_ms.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn is_usable_for_read(&self) -> bool {
        self.is_enabled() && self.state() != NodeState::Dead && self.mode.can_read()
    }

    pub fn is_usable_for_write(&self) -> bool {
        self.is_enabled() && self.state() != NodeState::Dead && self.mode.can_write()
    }

    /// Probe the backend. Never fails: errors and timeouts report
    /// `alive = false`.
    pub async fn ping(&self, timeout: Duration) -> PingOutcome {
        let start = Instant::now();
        let alive = matches!(
            tokio::time::timeout(timeout, self.storage.probe()).await,
            Ok(Ok(()))
        );
        PingOutcome {
            alive,
            elapsed: start.elapsed(),
        }
    }

    /// Apply a probe result. Returns `(from, to)` when the state changed.
    ///
    /// A node is marked dead after `failure_threshold` consecutive failures
    /// and alive again after a single success.
    pub fn record_ping(
        &self,
        outcome: PingOutcome,
        failure_threshold: u32,
    ) -> Option<(NodeState, NodeState)> {
        self.last_ping_ms
            .store(outcome.elapsed.as_millis() as u64, Ordering::Release);

        let from = self.state();
        let to = if outcome.alive {
            self.consecutive_failures.store(0, Ordering::Release);
            NodeState::Alive
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
            if failures >= failure_threshold.max(1) {
                NodeState::Dead
            } else {
                from
            }
        };

        if from == to {
            return None;
        }
        self.state.store(to.to_u8(), Ordering::Release);
        Some((from, to))
    }

    /// Point-in-time status.
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            name: self.name.clone(),
            mode: self.mode,
            state: self.state(),
            last_ping_ms: self.last_ping_ms(),
            enabled: self.is_enabled(),
            is_network: self.is_network,
            consecutive_failures: self.consecutive_failures(),
        }
    }

    pub async fn exist_key(&self, key: &str, timeout: Duration) -> StorageResult<bool> {
        bounded(timeout, self.storage.exist_key(key)).await
    }

    pub async fn get(&self, key: &str, timeout: Duration) -> StorageResult<Option<CacheItem>> {
        bounded(timeout, self.storage.get(key)).await
    }

    /// Store a value. A backend that declines the write reports
    /// `StorageError::Rejected`.
    pub async fn set(
        &self,
        key: &str,
        value: Bytes,
        metadata: ItemMetadata,
        timeout: Duration,
    ) -> StorageResult<()> {
        match bounded(timeout, self.storage.set(key, value, metadata)).await? {
            true => Ok(()),
            false => Err(StorageError::Rejected),
        }
    }

    pub async fn remove(&self, key: &str, timeout: Duration) -> StorageResult<bool> {
        bounded(timeout, self.storage.remove(key)).await
    }

    pub async fn get_keys(&self, timeout: Duration) -> StorageResult<Vec<String>> {
        bounded(timeout, self.storage.get_keys()).await
    }

    pub async fn close(&self) {
        self.storage.close().await;
    }
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(StorageError::Timeout(timeout)))
}

impl std::fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNode")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .field("is_network", &self.is_network)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::testing::FlakyStorage;

    fn failed() -> PingOutcome {
        PingOutcome {
            alive: false,
            elapsed: Duration::from_millis(5),
        }
    }

    fn ok(ms: u64) -> PingOutcome {
        PingOutcome {
            alive: true,
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_initial_state_by_kind() {
        let local = StorageNode::new(
            "local",
            NodeMode::ReadWrite,
            true,
            Arc::new(MemoryStorage::new(1024, None)),
        );
        assert!(!local.is_network());
        assert_eq!(local.state(), NodeState::Alive);

        let remote = StorageNode::new(
            "remote1",
            NodeMode::ReadWrite,
            true,
            Arc::new(FlakyStorage::network()),
        );
        assert!(remote.is_network());
        assert_eq!(remote.state(), NodeState::Unknown);
        // Unknown is not dead, so the node is still a candidate.
        assert!(remote.is_usable_for_read());
    }

    #[test]
    fn test_usability_respects_mode_and_enabled() {
        let node = StorageNode::new(
            "r",
            NodeMode::Read,
            true,
            Arc::new(MemoryStorage::new(1024, None)),
        );
        assert!(node.is_usable_for_read());
        assert!(!node.is_usable_for_write());

        node.set_enabled(false);
        assert!(!node.is_usable_for_read());
    }

    #[test]
    fn test_record_ping_transitions() {
        let node = StorageNode::new(
            "remote1",
            NodeMode::ReadWrite,
            true,
            Arc::new(FlakyStorage::network()),
        );

        assert_eq!(
            node.record_ping(ok(7), 1),
            Some((NodeState::Unknown, NodeState::Alive))
        );
        assert_eq!(node.last_ping_ms(), 7);
        assert_eq!(node.record_ping(ok(3), 1), None);

        assert_eq!(
            node.record_ping(failed(), 1),
            Some((NodeState::Alive, NodeState::Dead))
        );
        assert!(!node.is_usable_for_read());
        assert!(!node.is_usable_for_write());

        assert_eq!(
            node.record_ping(ok(4), 1),
            Some((NodeState::Dead, NodeState::Alive))
        );
        assert_eq!(node.consecutive_failures(), 0);
    }

    #[test]
    fn test_failure_threshold() {
        let node = StorageNode::new(
            "remote1",
            NodeMode::ReadWrite,
            true,
            Arc::new(FlakyStorage::network()),
        );
        node.record_ping(ok(1), 3);

        assert_eq!(node.record_ping(failed(), 3), None);
        assert_eq!(node.record_ping(failed(), 3), None);
        assert_eq!(node.state(), NodeState::Alive);
        assert_eq!(
            node.record_ping(failed(), 3),
            Some((NodeState::Alive, NodeState::Dead))
        );
        assert_eq!(node.status().consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_ping_never_fails() {
        let storage = Arc::new(FlakyStorage::network());
        let node = StorageNode::new("remote1", NodeMode::ReadWrite, true, storage.clone());

        assert!(node.ping(Duration::from_secs(1)).await.alive);
        storage.set_failing(true);
        assert!(!node.ping(Duration::from_secs(1)).await.alive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_timeout_is_dead() {
        let storage = Arc::new(FlakyStorage::network().with_latency(Duration::from_secs(10)));
        let node = StorageNode::new("remote1", NodeMode::ReadWrite, true, storage);

        let outcome = node.ping(Duration::from_millis(200)).await;
        assert!(!outcome.alive);
        assert!(outcome.elapsed >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_rejected_write() {
        let storage = Arc::new(FlakyStorage::local());
        storage.set_rejecting(true);
        let node = StorageNode::new("local", NodeMode::ReadWrite, true, storage);

        let result = node
            .set("k", Bytes::from("v"), ItemMetadata::new(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(StorageError::Rejected)));
    }
}
