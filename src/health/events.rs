//! Node liveness events.

use crate::types::{NodeName, NodeState};

/// Published by the ping scheduler whenever a node changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    StateChanged {
        node: NodeName,
        from: NodeState,
        to: NodeState,
    },
}

impl NodeEvent {
    /// Name of the node the event is about.
    pub fn node(&self) -> &str {
        match self {
            NodeEvent::StateChanged { node, .. } => node,
        }
    }

    /// Check if the node just became usable again.
    pub fn is_recovery(&self) -> bool {
        matches!(
            self,
            NodeEvent::StateChanged {
                from: NodeState::Dead,
                to: NodeState::Alive,
                ..
            }
        )
    }

    /// Check if the node was just excluded.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            NodeEvent::StateChanged {
                to: NodeState::Dead,
                ..
            }
        )
    }
}

/// Callback for node events. Called on the scheduler task, so
/// implementations must not block.
pub trait NodeEventListener: Send + Sync + 'static {
    fn on_event(&self, event: &NodeEvent);
}

/// Listener that logs every transition.
pub struct LoggingEventListener;

impl NodeEventListener for LoggingEventListener {
    fn on_event(&self, event: &NodeEvent) {
        let NodeEvent::StateChanged { node, from, to } = event;
        match to {
            NodeState::Dead => tracing::error!(node = %node, %from, "Node marked dead"),
            NodeState::Alive if *from == NodeState::Dead => {
                tracing::info!(node = %node, "Node recovered")
            }
            _ => tracing::info!(node = %node, %from, %to, "Node state changed"),
        }
    }
}
