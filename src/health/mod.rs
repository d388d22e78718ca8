//! Periodic health checking of network nodes.
//!
//! The [`PingScheduler`] owns the only writer path to node liveness. It runs
//! as one cancellable tokio task per pool:
//!
//! ```text
//!   ┌─────────┐   all alive    ┌──────────────┐
//!   │  sweep  │ ─────────────▶ │ sleep(delay) │ ──┐
//!   └─────────┘                └──────────────┘   │
//!     ▲    │  dead or unknown  ┌─────────────────────────┐
//!     │    └─────────────────▶ │ sleep(delay_on_error)   │ ──┤
//!     │                        └─────────────────────────┘   │
//!     └───────────────────────────────────────────────────────┘
//! ```
//!
//! Only the sleep races shutdown, so a sweep that has started always
//! finishes and no sweep starts after cancellation.

mod events;

pub use events::{LoggingEventListener, NodeEvent, NodeEventListener};

use crate::config::PingConfig;
use crate::metrics::PoolMetrics;
use crate::pool::StorageNode;
use crate::types::NodeState;
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Result of one completed sweep.
#[derive(Debug, Clone)]
pub struct SweepReport {
    /// Network nodes probed.
    pub probed: usize,
    /// Nodes alive after the sweep, local nodes included.
    pub alive: usize,
    /// Nodes dead after the sweep.
    pub dead: usize,
    /// Transitions caused by this sweep.
    pub events: Vec<NodeEvent>,
    pub elapsed: Duration,
}

/// Probes network nodes and maintains their liveness.
pub struct PingScheduler {
    nodes: Vec<Arc<StorageNode>>,
    config: PingConfig,
    force_network: bool,
    metrics: Arc<PoolMetrics>,
    sweeping: AtomicBool,
    started: AtomicBool,
    sweeps_completed: AtomicU64,
    events: broadcast::Sender<NodeEvent>,
    listeners: RwLock<Vec<Arc<dyn NodeEventListener>>>,
}

impl PingScheduler {
    pub fn new(
        nodes: Vec<Arc<StorageNode>>,
        config: PingConfig,
        force_network: bool,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            nodes,
            config,
            force_network,
            metrics,
            sweeping: AtomicBool::new(false),
            started: AtomicBool::new(false),
            sweeps_completed: AtomicU64::new(0),
            events,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PingConfig {
        &self.config
    }

    /// Receive every future state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn NodeEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn sweeps_completed(&self) -> u64 {
        self.sweeps_completed.load(Ordering::Acquire)
    }

    /// True once a sweep has completed and, when a network replica is
    /// required, some network node is alive (or none is configured).
    pub fn is_ready(&self) -> bool {
        if self.sweeps_completed() == 0 {
            return false;
        }
        if !self.force_network {
            return true;
        }

        let mut network = self.nodes.iter().filter(|n| n.is_network()).peekable();
        network.peek().is_none() || network.any(|n| n.state() == NodeState::Alive)
    }

    /// Wait before the next sweep: shorter while any network node is dead
    /// or not yet confirmed.
    pub fn next_delay(&self) -> Duration {
        let degraded = self
            .nodes
            .iter()
            .any(|n| n.is_network() && n.state() != NodeState::Alive);
        if degraded {
            self.config.delay_on_error
        } else {
            self.config.delay
        }
    }

    /// Probe every network node in parallel and apply the results.
    ///
    /// Returns `None` without probing if another sweep is in progress.
    pub async fn sweep(&self) -> Option<SweepReport> {
        let Some(_guard) = SweepGuard::acquire(&self.sweeping) else {
            self.metrics.sweeps_skipped.inc();
            debug!("Sweep already running, skipping");
            return None;
        };

        let start = Instant::now();
        let timeout = self.config.timeout;
        let network: Vec<&Arc<StorageNode>> =
            self.nodes.iter().filter(|n| n.is_network()).collect();

        let outcomes = join_all(network.iter().map(|node| async move {
            let outcome = node.ping(timeout).await;
            (*node, outcome)
        }))
        .await;

        let mut events = Vec::new();
        for (node, outcome) in outcomes {
            self.metrics.record_ping(outcome.alive, outcome.elapsed);
            if !outcome.alive {
                warn!(
                    node = %node.name(),
                    failures = node.consecutive_failures() + 1,
                    "Ping failed"
                );
            }
            if let Some((from, to)) = node.record_ping(outcome, self.config.failure_threshold) {
                events.push(NodeEvent::StateChanged {
                    node: node.name().to_string(),
                    from,
                    to,
                });
            }
        }

        for event in &events {
            self.publish(event);
        }

        let alive = self
            .nodes
            .iter()
            .filter(|n| n.state() == NodeState::Alive)
            .count();
        let dead = self
            .nodes
            .iter()
            .filter(|n| n.state() == NodeState::Dead)
            .count();
        self.metrics.record_sweep(alive, dead);
        self.sweeps_completed.fetch_add(1, Ordering::AcqRel);

        let report = SweepReport {
            probed: network.len(),
            alive,
            dead,
            events,
            elapsed: start.elapsed(),
        };
        debug!(
            probed = report.probed,
            alive,
            dead,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Sweep completed"
        );
        Some(report)
    }

    fn publish(&self, event: &NodeEvent) {
        self.metrics.state_transitions.inc();
        // No subscribers is fine.
        let _ = self.events.send(event.clone());

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    /// Spawn the sweep loop. Only the first call starts a task.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("Ping scheduler already started");
            return None;
        }
        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move { scheduler.run(shutdown).await }))
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            nodes = self.nodes.len(),
            network = self.nodes.iter().filter(|n| n.is_network()).count(),
            "Ping scheduler started"
        );

        while !shutdown.is_cancelled() {
            self.sweep().await;

            let delay = self.next_delay();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Ping scheduler stopped");
    }
}

/// Clears the in-progress flag even if the sweep future is dropped.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepGuard(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
