//! Prometheus-style metrics for the pool.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       PoolMetrics                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │  Counters    │  │   Gauges     │  │   Histograms   │  │
//! │  │ - requests   │  │ - alive      │  │ - op latency   │  │
//! │  │ - hits/miss  │  │ - dead       │  │ - ping latency │  │
//! │  │ - node errs  │  │              │  │                │  │
//! │  │ - sweeps     │  │              │  │                │  │
//! │  └──────────────┘  └──────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;
mod histograms;

pub use counters::{Counter, LabeledCounter};
pub use gauges::Gauge;
pub use histograms::{Histogram, HistogramSnapshot, LabeledHistogram, LATENCY_BUCKETS};

use crate::error::{Operation, StorageError};
use std::time::Duration;

/// Metrics shared by a pool and its ping scheduler.
#[derive(Debug)]
pub struct PoolMetrics {
    /// Pool operations by operation and outcome (`ok` / `error`).
    pub requests: LabeledCounter<2>,
    /// Pool operation latency by operation.
    pub request_latency: LabeledHistogram<1>,
    /// Reads that found the key.
    pub get_hits: Counter,
    /// Reads that did not.
    pub get_misses: Counter,
    /// Per-node failures by node and error kind.
    pub node_errors: LabeledCounter<2>,
    /// Replicated writes that missed their requirement.
    pub partial_writes: Counter,

    pub pings_total: Counter,
    pub pings_failed: Counter,
    pub ping_latency: Histogram,
    pub sweeps_total: Counter,
    /// Sweeps requested while another was running.
    pub sweeps_skipped: Counter,
    pub state_transitions: Counter,
    pub nodes_alive: Gauge,
    pub nodes_dead: Gauge,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self {
            requests: LabeledCounter::new(
                "cachepool_requests_total",
                "Pool operations",
                ["operation", "outcome"],
            ),
            request_latency: LabeledHistogram::new(
                "cachepool_request_latency_seconds",
                "Pool operation latency",
                ["operation"],
            ),
            get_hits: Counter::new("cachepool_get_hits_total", "Reads that found the key"),
            get_misses: Counter::new("cachepool_get_misses_total", "Reads that missed"),
            node_errors: LabeledCounter::new(
                "cachepool_node_errors_total",
                "Per-node failures",
                ["node", "kind"],
            ),
            partial_writes: Counter::new(
                "cachepool_partial_writes_total",
                "Replicated writes that missed their requirement",
            ),
            pings_total: Counter::new("cachepool_pings_total", "Health probes sent"),
            pings_failed: Counter::new("cachepool_pings_failed_total", "Health probes failed"),
            ping_latency: Histogram::new("cachepool_ping_latency_seconds", "Health probe latency"),
            sweeps_total: Counter::new("cachepool_sweeps_total", "Completed health sweeps"),
            sweeps_skipped: Counter::new(
                "cachepool_sweeps_skipped_total",
                "Sweeps skipped because one was running",
            ),
            state_transitions: Counter::new(
                "cachepool_state_transitions_total",
                "Node state changes",
            ),
            nodes_alive: Gauge::new("cachepool_nodes_alive", "Nodes currently alive"),
            nodes_dead: Gauge::new("cachepool_nodes_dead", "Nodes currently dead"),
        }
    }

    /// Record a finished pool operation.
    pub fn record_request(&self, operation: Operation, ok: bool, latency: Duration) {
        let op = operation.to_string();
        self.requests
            .inc([op.as_str(), if ok { "ok" } else { "error" }]);
        self.request_latency.observe_duration([op.as_str()], latency);
    }

    pub fn record_get(&self, hit: bool) {
        if hit {
            self.get_hits.inc();
        } else {
            self.get_misses.inc();
        }
    }

    pub fn record_node_error(&self, node: &str, error: &StorageError) {
        self.node_errors.inc([node, error.kind()]);
    }

    pub fn record_ping(&self, alive: bool, latency: Duration) {
        self.pings_total.inc();
        if !alive {
            self.pings_failed.inc();
        }
        self.ping_latency.observe_duration(latency);
    }

    pub fn record_sweep(&self, alive: usize, dead: usize) {
        self.sweeps_total.inc();
        self.nodes_alive.set(alive as i64);
        self.nodes_dead.set(dead as i64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_ok: sum_outcome(&self.requests, "ok"),
            requests_failed: sum_outcome(&self.requests, "error"),
            get_hits: self.get_hits.get(),
            get_misses: self.get_misses.get(),
            node_errors: self.node_errors.total(),
            partial_writes: self.partial_writes.get(),
            pings_total: self.pings_total.get(),
            pings_failed: self.pings_failed.get(),
            sweeps_total: self.sweeps_total.get(),
            sweeps_skipped: self.sweeps_skipped.get(),
            nodes_alive: self.nodes_alive.get(),
            nodes_dead: self.nodes_dead.get(),
            ping_latency: self.ping_latency.snapshot(),
        }
    }

    /// Render every metric in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        macro_rules! add_scalar {
            ($metric:expr, $kind:literal) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $metric.name(),
                    $metric.help(),
                    $metric.name(),
                    $kind,
                    $metric.name(),
                    $metric.get()
                ));
            };
        }

        macro_rules! add_labeled_counter {
            ($metric:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} counter\n",
                    $metric.name(),
                    $metric.help(),
                    $metric.name()
                ));
                for (labels, value) in $metric.get_all() {
                    output.push_str(&format!(
                        "{}{{{}}} {}\n",
                        $metric.name(),
                        render_labels($metric.label_names(), &labels),
                        value
                    ));
                }
            };
        }

        add_labeled_counter!(self.requests);
        add_scalar!(self.get_hits, "counter");
        add_scalar!(self.get_misses, "counter");
        add_labeled_counter!(self.node_errors);
        add_scalar!(self.partial_writes, "counter");
        add_scalar!(self.pings_total, "counter");
        add_scalar!(self.pings_failed, "counter");
        add_scalar!(self.sweeps_total, "counter");
        add_scalar!(self.sweeps_skipped, "counter");
        add_scalar!(self.state_transitions, "counter");
        add_scalar!(self.nodes_alive, "gauge");
        add_scalar!(self.nodes_dead, "gauge");

        output.push_str(&format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.request_latency.name(),
            self.request_latency.help(),
            self.request_latency.name()
        ));
        for (labels, snap) in self.request_latency.get_all() {
            let rendered = render_labels(self.request_latency.label_names(), &labels);
            snap.write_prometheus(&mut output, self.request_latency.name(), &rendered);
        }

        output.push_str(&format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.ping_latency.name(),
            self.ping_latency.help(),
            self.ping_latency.name()
        ));
        self.ping_latency
            .snapshot()
            .write_prometheus(&mut output, self.ping_latency.name(), "");

        output
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sum_outcome(requests: &LabeledCounter<2>, outcome: &str) -> u64 {
    requests
        .get_all()
        .into_iter()
        .filter(|(labels, _)| labels[1] == outcome)
        .map(|(_, v)| v)
        .sum()
}

fn render_labels<const N: usize>(names: &[&'static str; N], values: &[String; N]) -> String {
    names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{}=\"{}\"", name, value.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",")
}

/// A point-in-time copy of the headline metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_ok: u64,
    pub requests_failed: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub node_errors: u64,
    pub partial_writes: u64,
    pub pings_total: u64,
    pub pings_failed: u64,
    pub sweeps_total: u64,
    pub sweeps_skipped: u64,
    pub nodes_alive: i64,
    pub nodes_dead: i64,
    pub ping_latency: HistogramSnapshot,
}

impl MetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.get_hits + self.get_misses;
        if total == 0 {
            0.0
        } else {
            self.get_hits as f64 / total as f64
        }
    }

    /// Mean probe latency in milliseconds.
    pub fn avg_ping_ms(&self) -> f64 {
        self.ping_latency.mean() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accounting() {
        let metrics = PoolMetrics::new();

        metrics.record_request(Operation::Get, true, Duration::from_micros(100));
        metrics.record_request(Operation::Get, true, Duration::from_micros(300));
        metrics.record_request(Operation::Set, false, Duration::from_millis(2));
        metrics.record_get(true);
        metrics.record_get(false);
        metrics.record_get(true);

        assert_eq!(metrics.requests.get(["get", "ok"]), 2);
        assert_eq!(metrics.requests.get(["set", "error"]), 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_ok, 2);
        assert_eq!(snap.requests_failed, 1);
        assert!((snap.hit_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_health_accounting() {
        let metrics = PoolMetrics::new();

        metrics.record_ping(true, Duration::from_millis(2));
        metrics.record_ping(false, Duration::from_millis(4));
        metrics.record_sweep(2, 1);
        metrics.record_node_error("remote1", &StorageError::Timeout(Duration::from_secs(1)));

        let snap = metrics.snapshot();
        assert_eq!(snap.pings_total, 2);
        assert_eq!(snap.pings_failed, 1);
        assert_eq!(snap.sweeps_total, 1);
        assert_eq!(snap.nodes_alive, 2);
        assert_eq!(snap.nodes_dead, 1);
        assert_eq!(snap.node_errors, 1);
        assert!((snap.avg_ping_ms() - 3.0).abs() < 0.001);
        assert_eq!(metrics.node_errors.get(["remote1", "timeout"]), 1);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = PoolMetrics::new();
        metrics.record_request(Operation::ExistKey, true, Duration::from_micros(100));
        metrics.record_node_error("remote1", &StorageError::Closed);

        let output = metrics.to_prometheus();

        assert!(output.contains("# TYPE cachepool_requests_total counter"));
        assert!(output.contains("cachepool_requests_total{operation=\"exist_key\",outcome=\"ok\"} 1"));
        assert!(output.contains("cachepool_node_errors_total{node=\"remote1\",kind=\"closed\"} 1"));
        assert!(output.contains("cachepool_request_latency_seconds_count{operation=\"exist_key\"} 1"));
        assert!(output.contains("# TYPE cachepool_nodes_alive gauge"));
    }
}
