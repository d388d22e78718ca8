//! Candidate ordering for reads and writes.

use super::node::StorageNode;
use crate::config::SelectionOrder;
use crate::types::NodeState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Orders usable nodes for an operation.
///
/// All sorts are stable, so nodes with equal keys keep insertion order.
#[derive(Debug)]
pub struct SelectionPolicy {
    order: SelectionOrder,
    /// Node name to position in the custom index order.
    index: HashMap<String, usize>,
    read_cursor: AtomicUsize,
    write_cursor: AtomicUsize,
    remove_cursor: AtomicUsize,
}

impl SelectionPolicy {
    pub fn new(order: SelectionOrder, custom_index_order: Option<&[String]>) -> Self {
        let index = custom_index_order
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(pos, name)| (name.clone(), pos))
            .collect();

        Self {
            order,
            index,
            read_cursor: AtomicUsize::new(0),
            write_cursor: AtomicUsize::new(0),
            remove_cursor: AtomicUsize::new(0),
        }
    }

    pub fn order(&self) -> SelectionOrder {
        self.order
    }

    /// Usable read nodes, best first.
    pub fn order_for_read(&self, nodes: &[Arc<StorageNode>]) -> Vec<Arc<StorageNode>> {
        let candidates = nodes
            .iter()
            .filter(|n| n.is_usable_for_read())
            .cloned()
            .collect();
        self.arrange(candidates, &self.read_cursor)
    }

    /// Usable write nodes, best first.
    pub fn order_for_write(&self, nodes: &[Arc<StorageNode>]) -> Vec<Arc<StorageNode>> {
        self.arrange(self.writable(nodes), &self.write_cursor)
    }

    /// Write nodes for a remove. Rotates its own cursor so removes leave
    /// the write rotation alone.
    pub fn order_for_remove(&self, nodes: &[Arc<StorageNode>]) -> Vec<Arc<StorageNode>> {
        self.arrange(self.writable(nodes), &self.remove_cursor)
    }

    fn writable(&self, nodes: &[Arc<StorageNode>]) -> Vec<Arc<StorageNode>> {
        nodes
            .iter()
            .filter(|n| n.is_usable_for_write())
            .cloned()
            .collect()
    }

    fn arrange(
        &self,
        mut candidates: Vec<Arc<StorageNode>>,
        cursor: &AtomicUsize,
    ) -> Vec<Arc<StorageNode>> {
        if candidates.is_empty() {
            return candidates;
        }

        match self.order {
            SelectionOrder::PingTime => {
                // Local nodes first, then measured network nodes, then
                // network nodes not yet probed.
                candidates.sort_by_key(|n| {
                    (
                        n.is_network(),
                        n.state() != NodeState::Alive,
                        n.last_ping_ms(),
                    )
                });
            }
            SelectionOrder::Index => {
                candidates.sort_by_key(|n| {
                    self.index.get(n.name()).copied().unwrap_or(usize::MAX)
                });
            }
            SelectionOrder::RoundRobin => {
                let offset = cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                candidates.rotate_left(offset);
            }
        }

        candidates
    }
}
