use ahash::AHashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Metric names emitted by the engine.
pub const RUNS_CREATED_TOTAL: &str = "runs_created_total";
pub const RUNS_FINISHED_TOTAL: &str = "runs_finished_total";
pub const RUNS_ACTIVE: &str = "runs_active";
pub const PROVIDER_CALLS_TOTAL: &str = "provider_calls_total";
pub const PROVIDER_CALL_DURATION_SECONDS: &str = "provider_call_duration_seconds";
pub const API_REQUESTS_TOTAL: &str = "api_requests_total";
pub const API_REQUEST_DURATION_SECONDS: &str = "api_request_duration_seconds";

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Cumulative-bucket histogram with an f64 sum stored as bits.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_bits: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        if let Some(i) = self.buckets.iter().position(|b| value <= *b) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Buckets in seconds. Provider calls run long, so the tail reaches two minutes.
fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
    ]
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Sorted `key=value` pairs distinguishing series of one metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort();
        Self(v)
    }

    /// `{k="v",...}` or empty when there are no labels.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "\\\"")))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

type SeriesKey = (String, Labels);

#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<SeriesKey, AtomicU64>>,
    gauges: RwLock<AHashMap<String, AtomicI64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A collector with the engine's histograms pre-registered so they show
    /// up in exports before the first observation.
    pub fn with_defaults() -> Self {
        let collector = Self::new();
        {
            let mut h = write(&collector.histograms);
            for name in [PROVIDER_CALL_DURATION_SECONDS, API_REQUEST_DURATION_SECONDS] {
                h.insert(name.to_string(), Histogram::new(default_duration_buckets()));
            }
        }
        collector
    }

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_counter_by(name, labels, 1);
    }

    pub fn increment_counter_by(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let key = (name.to_string(), Labels::new(labels));
        if let Some(c) = read(&self.counters).get(&key) {
            c.fetch_add(amount, Ordering::Relaxed);
            return;
        }
        write(&self.counters)
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        read(&self.counters)
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Add `delta` (possibly negative) to a gauge.
    pub fn add_gauge(&self, name: &str, delta: i64) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        write(&self.gauges)
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get_gauge(&self, name: &str) -> i64 {
        read(&self.gauges)
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record into a histogram, creating it with duration buckets if new.
    pub fn record_histogram(&self, name: &str, value: f64) {
        if let Some(h) = read(&self.histograms).get(name) {
            h.observe(value);
            return;
        }
        write(&self.histograms)
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(default_duration_buckets()))
            .observe(value);
    }

    pub fn histogram_count(&self, name: &str) -> u64 {
        read(&self.histograms)
            .get(name)
            .map(Histogram::count)
            .unwrap_or(0)
    }

    /// Prometheus text exposition format, series sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        {
            let map = read(&self.counters);
            let mut grouped: AHashMap<&str, Vec<(&Labels, u64)>> = AHashMap::new();
            for ((name, labels), val) in map.iter() {
                grouped
                    .entry(name.as_str())
                    .or_default()
                    .push((labels, val.load(Ordering::Relaxed)));
            }
            let mut names: Vec<&str> = grouped.keys().copied().collect();
            names.sort_unstable();
            for name in names {
                out.push_str(&format!("# TYPE {} counter\n", name));
                let mut series = grouped[name].clone();
                series.sort_by(|a, b| a.0 .0.cmp(&b.0 .0));
                for (labels, value) in series {
                    out.push_str(&format!("{}{} {}\n", name, labels.prometheus_str(), value));
                }
            }
        }

        {
            let map = read(&self.gauges);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                out.push_str(&format!("# TYPE {} gauge\n", name));
                out.push_str(&format!("{} {}\n", name, map[name].load(Ordering::Relaxed)));
            }
        }

        {
            let map = read(&self.histograms);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                let h = &map[name];
                out.push_str(&format!("# TYPE {} histogram\n", name));
                let mut cumulative = 0u64;
                for (i, boundary) in h.buckets.iter().enumerate() {
                    cumulative += h.counts[i].load(Ordering::Relaxed);
                    out.push_str(&format!(
                        "{}_bucket{{le=\"{}\"}} {}\n",
                        name, boundary, cumulative
                    ));
                }
                out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, h.count()));
                out.push_str(&format!("{}_sum {}\n", name, h.sum()));
                out.push_str(&format!("{}_count {}\n", name, h.count()));
            }
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Global singleton
// ---------------------------------------------------------------------------

/// The process-wide collector.
pub fn global_metrics() -> &'static MetricsCollector {
    static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
    INSTANCE.get_or_init(MetricsCollector::with_defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_split_by_labels() {
        let m = MetricsCollector::new();
        m.increment_counter(RUNS_FINISHED_TOTAL, &[("status", "completed")]);
        m.increment_counter(RUNS_FINISHED_TOTAL, &[("status", "completed")]);
        m.increment_counter(RUNS_FINISHED_TOTAL, &[("status", "failed")]);

        assert_eq!(m.get_counter(RUNS_FINISHED_TOTAL, &[("status", "completed")]), 2);
        assert_eq!(m.get_counter(RUNS_FINISHED_TOTAL, &[("status", "failed")]), 1);
        assert_eq!(m.get_counter(RUNS_FINISHED_TOTAL, &[("status", "cancelled")]), 0);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let m = MetricsCollector::new();
        m.add_gauge(RUNS_ACTIVE, 1);
        m.add_gauge(RUNS_ACTIVE, 1);
        m.add_gauge(RUNS_ACTIVE, -1);
        assert_eq!(m.get_gauge(RUNS_ACTIVE), 1);
    }

    #[test]
    fn histogram_buckets_are_cumulative_in_export() {
        let m = MetricsCollector::with_defaults();
        m.record_histogram(PROVIDER_CALL_DURATION_SECONDS, 0.2);
        m.record_histogram(PROVIDER_CALL_DURATION_SECONDS, 3.0);

        let out = m.export_prometheus();
        assert!(out.contains("provider_call_duration_seconds_bucket{le=\"0.25\"} 1"));
        assert!(out.contains("provider_call_duration_seconds_bucket{le=\"5\"} 2"));
        assert!(out.contains("provider_call_duration_seconds_bucket{le=\"+Inf\"} 2"));
        assert!(out.contains("provider_call_duration_seconds_count 2"));
    }

    #[test]
    fn label_values_are_escaped() {
        let l = Labels::new(&[("path", "/a\"b")]);
        assert_eq!(l.prometheus_str(), "{path=\"/a\\\"b\"}");
    }
}
