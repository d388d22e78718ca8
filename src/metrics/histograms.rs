//! Latency histograms with cumulative buckets.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bucket bounds in seconds for pool and node operations.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// A histogram of observations.
#[derive(Debug)]
pub struct Histogram {
    name: &'static str,
    help: &'static str,
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    /// f64 bits.
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(name, help, LATENCY_BUCKETS.to_vec())
    }

    pub fn with_buckets(name: &'static str, help: &'static str, mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(f64::total_cmp);
        let bucket_counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();

        Self {
            name,
            help,
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });

        for (upper, counter) in self.buckets.iter().zip(&self.bucket_counts) {
            if value <= *upper {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            bucket_counts: self
                .bucket_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            sum: f64::from_bits(self.sum.load(Ordering::Relaxed)),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of a histogram.
#[derive(Debug, Clone, Default)]
pub struct HistogramSnapshot {
    /// Upper bounds, ascending.
    pub buckets: Vec<f64>,
    /// Cumulative counts per bound.
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Approximate percentile by linear interpolation inside a bucket.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        let target = (self.count as f64 * p / 100.0).ceil() as u64;
        let mut prev_count = 0;
        let mut prev_bound = 0.0;

        for (&bound, &count) in self.buckets.iter().zip(&self.bucket_counts) {
            if count >= target {
                let in_bucket = count - prev_count;
                if in_bucket == 0 {
                    return bound;
                }
                let position = (target - prev_count) as f64 / in_bucket as f64;
                return prev_bound + position * (bound - prev_bound);
            }
            prev_count = count;
            prev_bound = bound;
        }

        self.buckets.last().copied().unwrap_or(0.0)
    }

    /// Write this snapshot in exposition format under `name`, with an
    /// optional pre-rendered label set such as `operation="get"`.
    pub(crate) fn write_prometheus(&self, out: &mut String, name: &str, labels: &str) {
        let sep = if labels.is_empty() { "" } else { "," };
        for (bound, count) in self.buckets.iter().zip(&self.bucket_counts) {
            out.push_str(&format!(
                "{}_bucket{{{}{}le=\"{}\"}} {}\n",
                name, labels, sep, bound, count
            ));
        }
        out.push_str(&format!(
            "{}_bucket{{{}{}le=\"+Inf\"}} {}\n",
            name, labels, sep, self.count
        ));
        let braces = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", labels)
        };
        out.push_str(&format!("{}_sum{} {}\n", name, braces, self.sum));
        out.push_str(&format!("{}_count{} {}\n", name, braces, self.count));
    }
}

/// Histograms split by a fixed set of label names.
#[derive(Debug)]
pub struct LabeledHistogram<const N: usize> {
    name: &'static str,
    help: &'static str,
    label_names: [&'static str; N],
    buckets: Vec<f64>,
    series: RwLock<HashMap<[String; N], Histogram>>,
}

impl<const N: usize> LabeledHistogram<N> {
    pub fn new(name: &'static str, help: &'static str, label_names: [&'static str; N]) -> Self {
        Self {
            name,
            help,
            label_names,
            buckets: LATENCY_BUCKETS.to_vec(),
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn label_names(&self) -> &[&'static str; N] {
        &self.label_names
    }

    pub fn observe_duration(&self, labels: [&str; N], duration: Duration) {
        let key: [String; N] = labels.map(str::to_string);
        let value = duration.as_secs_f64();

        if let Some(h) = self.series.read().get(&key) {
            h.observe(value);
            return;
        }

        self.series
            .write()
            .entry(key)
            .or_insert_with(|| Histogram::with_buckets(self.name, self.help, self.buckets.clone()))
            .observe(value);
    }

    pub fn snapshot(&self, labels: [&str; N]) -> Option<HistogramSnapshot> {
        let key: [String; N] = labels.map(str::to_string);
        self.series.read().get(&key).map(Histogram::snapshot)
    }

    /// Every series, sorted by labels.
    pub fn get_all(&self) -> Vec<([String; N], HistogramSnapshot)> {
        let mut all: Vec<_> = self
            .series
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new("cachepool_ping_seconds", "Ping latency");

        hist.observe(0.002);
        hist.observe(0.02);
        hist.observe(0.2);
        hist.observe(2.0);

        let snap = hist.snapshot();
        assert_eq!(snap.count, 4);
        assert!((snap.sum - 2.222).abs() < 1e-9);
        // Cumulative: everything fits under the last bound.
        assert_eq!(*snap.bucket_counts.last().unwrap(), 4);
    }

    #[test]
    fn test_percentile() {
        let hist = Histogram::with_buckets("p", "p", vec![10.0, 1.0, 50.0, 5.0, 100.0]);
        for i in 1..=100 {
            hist.observe(i as f64);
        }

        let snap = hist.snapshot();
        assert_eq!(snap.buckets, vec![1.0, 5.0, 10.0, 50.0, 100.0]);
        let p50 = snap.percentile(50.0);
        assert!(p50 > 40.0 && p50 < 60.0);
        assert!(snap.percentile(99.0) > 90.0);
        assert_eq!(HistogramSnapshot::default().percentile(50.0), 0.0);
    }

    #[test]
    fn test_labeled_histogram() {
        let hist = LabeledHistogram::<1>::new("op", "op", ["operation"]);

        hist.observe_duration(["get"], Duration::from_millis(1));
        hist.observe_duration(["get"], Duration::from_millis(3));
        hist.observe_duration(["set"], Duration::from_millis(10));

        assert_eq!(hist.snapshot(["get"]).unwrap().count, 2);
        assert_eq!(hist.snapshot(["set"]).unwrap().count, 1);
        assert!(hist.snapshot(["remove"]).is_none());
        assert_eq!(hist.get_all().len(), 2);
    }

    #[test]
    fn test_prometheus_lines() {
        let hist = Histogram::with_buckets("lat", "lat", vec![0.1]);
        hist.observe(0.05);

        let mut out = String::new();
        hist.snapshot()
            .write_prometheus(&mut out, "lat", "operation=\"get\"");
        assert!(out.contains("lat_bucket{operation=\"get\",le=\"0.1\"} 1"));
        assert!(out.contains("lat_bucket{operation=\"get\",le=\"+Inf\"} 1"));
        assert!(out.contains("lat_count{operation=\"get\"} 1"));
    }
}
