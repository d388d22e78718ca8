//! Read and write strategies over an ordered candidate list.
//!
//! Every function here receives candidates already filtered and ordered by
//! the selection policy, and never sees an empty list. A failing node is
//! logged, counted and recorded; it never stops work on its siblings.

use super::node::StorageNode;
use crate::config::{ReadMode, WriteQuorum};
use crate::error::{Error, Operation, Result, StorageError};
use crate::metrics::PoolMetrics;
use crate::storage::StorageResult;
use crate::types::{CacheItem, ItemMetadata};
use bytes::Bytes;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Which replicas accepted a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl WriteOutcome {
    /// Check if every candidate accepted the write.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Requirements for a replicated write.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WritePolicy {
    pub quorum: WriteQuorum,
    /// A network replica must be among the successes.
    pub require_network: bool,
}

/// Shared per-call context.
pub(crate) struct Fanout<'a> {
    pub node_timeout: Duration,
    pub metrics: &'a PoolMetrics,
}

impl Fanout<'_> {
    fn node_failed(
        &self,
        node: &StorageNode,
        operation: Operation,
        error: StorageError,
        failures: &mut Vec<(String, StorageError)>,
    ) {
        warn!(node = %node.name(), %operation, error = %error, "Node operation failed");
        self.metrics.record_node_error(node.name(), &error);
        failures.push((node.name().to_string(), error));
    }

    /// Answer a read under `mode`.
    ///
    /// `is_hit` tells a positive answer (present, found) from a clean
    /// negative. A negative is only returned once some node answered
    /// cleanly; if every node failed the read fails.
    async fn read<T, F, Fut>(
        &self,
        mode: ReadMode,
        operation: Operation,
        candidates: &[Arc<StorageNode>],
        call: F,
        is_hit: fn(&T) -> bool,
    ) -> Result<T>
    where
        T: Default,
        F: Fn(Arc<StorageNode>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut failures = Vec::new();

        match mode {
            ReadMode::FastestWins => {
                let mut pending: FuturesUnordered<_> = candidates
                    .iter()
                    .map(|node| {
                        let fut = call(node.clone());
                        let node = node.clone();
                        async move { (node, fut.await) }
                    })
                    .collect();

                let mut answered = false;
                while let Some((node, result)) = pending.next().await {
                    match result {
                        // Returning drops the slower futures still in flight.
                        Ok(value) if is_hit(&value) => return Ok(value),
                        Ok(_) => answered = true,
                        Err(e) => self.node_failed(&node, operation, e, &mut failures),
                    }
                }

                if answered {
                    Ok(T::default())
                } else {
                    Err(Error::AllNodesFailed {
                        operation,
                        failures,
                    })
                }
            }

            ReadMode::FirstOnly => {
                for node in candidates {
                    match call(node.clone()).await {
                        Ok(value) => return Ok(value),
                        Err(e) => self.node_failed(node, operation, e, &mut failures),
                    }
                }
                Err(Error::AllNodesFailed {
                    operation,
                    failures,
                })
            }

            ReadMode::Broadcast => {
                let results = join_all(candidates.iter().map(|node| call(node.clone()))).await;

                let mut first_hit = None;
                let mut answered = false;
                for (node, result) in candidates.iter().zip(results) {
                    match result {
                        Ok(value) if is_hit(&value) => {
                            if first_hit.is_none() {
                                first_hit = Some(value);
                            }
                        }
                        Ok(_) => answered = true,
                        Err(e) => self.node_failed(node, operation, e, &mut failures),
                    }
                }

                match first_hit {
                    Some(value) => Ok(value),
                    None if answered => Ok(T::default()),
                    None => Err(Error::AllNodesFailed {
                        operation,
                        failures,
                    }),
                }
            }
        }
    }

    pub async fn exist_key(
        &self,
        mode: ReadMode,
        candidates: &[Arc<StorageNode>],
        key: &str,
    ) -> Result<bool> {
        let timeout = self.node_timeout;
        self.read(
            mode,
            Operation::ExistKey,
            candidates,
            move |node| async move { node.exist_key(key, timeout).await },
            |present: &bool| *present,
        )
        .await
    }

    pub async fn get(
        &self,
        mode: ReadMode,
        candidates: &[Arc<StorageNode>],
        key: &str,
    ) -> Result<Option<CacheItem>> {
        let timeout = self.node_timeout;
        self.read(
            mode,
            Operation::Get,
            candidates,
            move |node| async move { node.get(key, timeout).await },
            Option::<CacheItem>::is_some,
        )
        .await
    }

    /// Union of the keys held by every candidate, sorted.
    pub async fn get_keys(&self, candidates: &[Arc<StorageNode>]) -> Result<Vec<String>> {
        let results = join_all(
            candidates
                .iter()
                .map(|node| node.get_keys(self.node_timeout)),
        )
        .await;

        let mut keys = BTreeSet::new();
        let mut failures = Vec::new();
        for (node, result) in candidates.iter().zip(results) {
            match result {
                Ok(node_keys) => keys.extend(node_keys),
                Err(e) => self.node_failed(node, Operation::GetKeys, e, &mut failures),
            }
        }

        if failures.len() == candidates.len() {
            return Err(Error::AllNodesFailed {
                operation: Operation::GetKeys,
                failures,
            });
        }
        Ok(keys.into_iter().collect())
    }

    /// Replicate to every candidate concurrently.
    pub async fn set_all(
        &self,
        policy: WritePolicy,
        candidates: &[Arc<StorageNode>],
        key: &str,
        value: Bytes,
        metadata: ItemMetadata,
    ) -> Result<WriteOutcome> {
        let results = join_all(candidates.iter().map(|node| {
            node.set(key, value.clone(), metadata.clone(), self.node_timeout)
        }))
        .await;

        let mut outcome = WriteOutcome::default();
        let mut failures = Vec::new();
        let mut network_replicas = 0;
        for (node, result) in candidates.iter().zip(results) {
            match result {
                Ok(()) => {
                    if node.is_network() {
                        network_replicas += 1;
                    }
                    outcome.succeeded.push(node.name().to_string());
                }
                Err(e) => {
                    outcome.failed.push(node.name().to_string());
                    self.node_failed(node, Operation::Set, e, &mut failures);
                }
            }
        }

        if outcome.succeeded.is_empty() {
            return Err(Error::AllNodesFailed {
                operation: Operation::Set,
                failures,
            });
        }

        if policy.require_network && network_replicas == 0 {
            self.metrics.partial_writes.inc();
            return Err(Error::NoNetworkReplica {
                succeeded: outcome.succeeded,
            });
        }

        if outcome.succeeded.len() < policy.quorum.required(candidates.len()) {
            self.metrics.partial_writes.inc();
            return Err(Error::PartialWriteFailure {
                succeeded: outcome.succeeded,
                failed: outcome.failed,
            });
        }

        Ok(outcome)
    }

    /// Write to the first candidate only.
    pub async fn set_first(
        &self,
        candidates: &[Arc<StorageNode>],
        key: &str,
        value: Bytes,
        metadata: ItemMetadata,
    ) -> Result<WriteOutcome> {
        let Some(node) = candidates.first() else {
            return Err(Error::NoAvailableNodes {
                operation: Operation::Set,
            });
        };

        match node.set(key, value, metadata, self.node_timeout).await {
            Ok(()) => Ok(WriteOutcome {
                succeeded: vec![node.name().to_string()],
                failed: Vec::new(),
            }),
            Err(e) => {
                warn!(node = %node.name(), error = %e, "Write failed");
                self.metrics.record_node_error(node.name(), &e);
                Err(Error::NodeUnavailable {
                    node: node.name().to_string(),
                    source: e,
                })
            }
        }
    }

    /// Remove from every candidate. Returns whether any node held the key.
    pub async fn remove(&self, candidates: &[Arc<StorageNode>], key: &str) -> Result<bool> {
        let results = join_all(
            candidates
                .iter()
                .map(|node| node.remove(key, self.node_timeout)),
        )
        .await;

        let mut removed = false;
        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for (node, result) in candidates.iter().zip(results) {
            match result {
                Ok(held) => {
                    removed |= held;
                    succeeded.push(node.name().to_string());
                }
                Err(e) => self.node_failed(node, Operation::Remove, e, &mut failures),
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else if succeeded.is_empty() {
            Err(Error::AllNodesFailed {
                operation: Operation::Remove,
                failures,
            })
        } else {
            Err(Error::PartialWriteFailure {
                succeeded,
                failed: failures.into_iter().map(|(name, _)| name).collect(),
            })
        }
    }
}
