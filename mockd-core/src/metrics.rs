//! A zero-dependency, thread-safe metrics registry producing
//! Prometheus-style text exposition. Only `std` is used here
//! deliberately — the spec calls this out by name, so no crate (not even
//! one already in the dependency graph for other reasons) is pulled in
//! for it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{CoreError, Result};

type LabelMap = BTreeMap<String, String>;

fn label_map(labels: &[(&str, &str)]) -> LabelMap {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn escape_label_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for ch in v.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn format_labels(labels: &LabelMap) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    format!("{{{}}}", parts.join(","))
}

/// A float value that can only move upward; `add` of a negative delta is
/// rejected.
pub struct Counter {
    name: String,
    help: String,
    values: Mutex<HashMap<LabelMap, f64>>,
}

impl Counter {
    fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1.0).expect("inc never goes negative");
    }

    pub fn add(&self, labels: &[(&str, &str)], delta: f64) -> Result<()> {
        if delta < 0.0 {
            return Err(CoreError::Metric(format!(
                "NegativeCounterValue: {} rejected delta {delta}",
                self.name
            )));
        }
        let key = label_map(labels);
        let mut values = self.values.lock().unwrap();
        *values.entry(key).or_insert(0.0) += delta;
        Ok(())
    }

    fn render(&self, out: &mut String) {
        render_help_type(out, &self.name, &self.help, "counter");
        let values = self.values.lock().unwrap();
        let mut entries: Vec<_> = values.iter().collect();
        entries.sort_by_key(|(labels, _)| format_labels(labels));
        for (labels, value) in entries {
            out.push_str(&format!("{}{} {}\n", self.name, format_labels(labels), value));
        }
    }
}

/// A float value that can move in any direction.
pub struct Gauge {
    name: String,
    help: String,
    values: Mutex<HashMap<LabelMap, f64>>,
}

impl Gauge {
    fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, labels: &[(&str, &str)], value: f64) {
        let key = label_map(labels);
        self.values.lock().unwrap().insert(key, value);
    }

    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1.0);
    }

    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1.0);
    }

    pub fn add(&self, labels: &[(&str, &str)], delta: f64) {
        let key = label_map(labels);
        let mut values = self.values.lock().unwrap();
        *values.entry(key).or_insert(0.0) += delta;
    }

    fn render(&self, out: &mut String) {
        render_help_type(out, &self.name, &self.help, "gauge");
        let values = self.values.lock().unwrap();
        let mut entries: Vec<_> = values.iter().collect();
        entries.sort_by_key(|(labels, _)| format_labels(labels));
        for (labels, value) in entries {
            out.push_str(&format!("{}{} {}\n", self.name, format_labels(labels), value));
        }
    }
}

struct HistogramData {
    /// Raw (non-cumulative) counts, one per configured bound plus a
    /// trailing `+Inf` bucket.
    raw_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Ascending bucket bounds; a synthetic `+Inf` bucket is always appended
/// at exposition time.
pub struct Histogram {
    name: String,
    help: String,
    bounds: Vec<f64>,
    data: Mutex<HashMap<LabelMap, HistogramData>>,
}

impl Histogram {
    fn new(name: impl Into<String>, help: impl Into<String>, bounds: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            bounds,
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(&self, labels: &[(&str, &str)], value: f64) {
        let key = label_map(labels);
        let mut data = self.data.lock().unwrap();
        let entry = data.entry(key).or_insert_with(|| HistogramData {
            raw_counts: vec![0; self.bounds.len() + 1],
            sum: 0.0,
            count: 0,
        });
        let idx = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());
        entry.raw_counts[idx] += 1;
        entry.sum += value;
        entry.count += 1;
    }

    fn render(&self, out: &mut String) {
        render_help_type(out, &self.name, &self.help, "histogram");
        let data = self.data.lock().unwrap();
        let mut entries: Vec<_> = data.iter().collect();
        entries.sort_by_key(|(labels, _)| format_labels(labels));
        for (labels, hist) in entries {
            let mut cumulative = 0u64;
            for (i, bound) in self.bounds.iter().enumerate() {
                cumulative += hist.raw_counts[i];
                let mut le_labels = labels.clone();
                le_labels.insert("le".to_string(), format_bound(*bound));
                out.push_str(&format!(
                    "{}_bucket{} {}\n",
                    self.name,
                    format_labels(&le_labels),
                    cumulative
                ));
            }
            cumulative += hist.raw_counts[self.bounds.len()];
            let mut inf_labels = labels.clone();
            inf_labels.insert("le".to_string(), "+Inf".to_string());
            out.push_str(&format!(
                "{}_bucket{} {}\n",
                self.name,
                format_labels(&inf_labels),
                cumulative
            ));
            out.push_str(&format!(
                "{}_sum{} {}\n",
                self.name,
                format_labels(labels),
                hist.sum
            ));
            out.push_str(&format!(
                "{}_count{} {}\n",
                self.name,
                format_labels(labels),
                hist.count
            ));
        }
    }
}

fn format_bound(b: f64) -> String {
    format!("{b}")
}

fn render_help_type(out: &mut String, name: &str, help: &str, kind: &str) {
    if !help.is_empty() {
        out.push_str(&format!("# HELP {name} {help}\n"));
    }
    out.push_str(&format!("# TYPE {name} {kind}\n"));
}

/// The default exponential-ish bucket ladder used for request-duration
/// histograms, in seconds.
pub const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

/// The registry: a name-indexed collection of counters, gauges, and
/// histograms, with a `render` method producing the full text exposition.
pub struct Registry {
    metrics: Mutex<HashMap<String, Metric>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(HashMap::new()),
        }
    }

    pub fn counter(&self, name: impl Into<String>, help: impl Into<String>) -> Arc<Counter> {
        let name = name.into();
        let mut metrics = self.metrics.lock().unwrap();
        match metrics.get(&name) {
            Some(Metric::Counter(c)) => c.clone(),
            Some(_) => panic!("metric {name} already registered with a different type"),
            None => {
                let c = Arc::new(Counter::new(name.clone(), help));
                metrics.insert(name, Metric::Counter(c.clone()));
                c
            }
        }
    }

    pub fn gauge(&self, name: impl Into<String>, help: impl Into<String>) -> Arc<Gauge> {
        let name = name.into();
        let mut metrics = self.metrics.lock().unwrap();
        match metrics.get(&name) {
            Some(Metric::Gauge(g)) => g.clone(),
            Some(_) => panic!("metric {name} already registered with a different type"),
            None => {
                let g = Arc::new(Gauge::new(name.clone(), help));
                metrics.insert(name, Metric::Gauge(g.clone()));
                g
            }
        }
    }

    pub fn histogram(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        bounds: Vec<f64>,
    ) -> Arc<Histogram> {
        let name = name.into();
        let mut metrics = self.metrics.lock().unwrap();
        match metrics.get(&name) {
            Some(Metric::Histogram(h)) => h.clone(),
            Some(_) => panic!("metric {name} already registered with a different type"),
            None => {
                let h = Arc::new(Histogram::new(name.clone(), help, bounds));
                metrics.insert(name, Metric::Histogram(h.clone()));
                h
            }
        }
    }

    /// Render the full registry as Prometheus text exposition
    /// (`version=0.0.4; charset=utf-8`).
    pub fn render(&self) -> String {
        let metrics = self.metrics.lock().unwrap();
        let mut names: Vec<&String> = metrics.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            match &metrics[name] {
                Metric::Counter(c) => c.render(&mut out),
                Metric::Gauge(g) => g.render(&mut out),
                Metric::Histogram(h) => h.render(&mut out),
            }
        }
        out
    }
}

/// The four always-present metrics the spec names by exact identity.
pub struct DefaultMetrics {
    pub requests_total: Arc<Counter>,
    pub request_duration_seconds: Arc<Histogram>,
    pub active_connections: Arc<Gauge>,
    pub mocks_total: Arc<Gauge>,
}

impl DefaultMetrics {
    pub fn register(registry: &Registry) -> Self {
        Self {
            requests_total: registry.counter(
                "mockd_requests_total",
                "Total number of requests served, labeled by protocol, path, and outcome status",
            ),
            request_duration_seconds: registry.histogram(
                "mockd_request_duration_seconds",
                "Request dispatch duration in seconds",
                DEFAULT_DURATION_BUCKETS.to_vec(),
            ),
            active_connections: registry.gauge(
                "mockd_active_connections",
                "Currently active connections/streams, labeled by protocol",
            ),
            mocks_total: registry.gauge(
                "mockd_mocks_total",
                "Number of configured mocks, labeled by type",
            ),
        }
    }
}

/// Periodically refreshes a small runtime-health family
/// (`mockd_runtime_uptime_seconds`, `mockd_runtime_active_tasks`) on a
/// background interval task. Returns a handle that cancels the task when
/// dropped.
pub struct RuntimeCollectorHandle {
    _task: tokio::task::JoinHandle<()>,
}

pub fn spawn_runtime_collector(
    registry: Arc<Registry>,
    active_tasks: Arc<AtomicU64>,
    interval: std::time::Duration,
) -> RuntimeCollectorHandle {
    let started = Instant::now();
    let uptime = registry.gauge(
        "mockd_runtime_uptime_seconds",
        "Seconds since the process started",
    );
    let tasks = registry.gauge(
        "mockd_runtime_active_tasks",
        "Approximate count of active per-connection tasks",
    );
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            uptime.set(&[], started.elapsed().as_secs_f64());
            tasks.set(&[], active_tasks.load(Ordering::Relaxed) as f64);
        }
    });
    RuntimeCollectorHandle { _task: task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_rejects_negative_add() {
        let registry = Registry::new();
        let c = registry.counter("test_total", "");
        assert!(c.add(&[], -1.0).is_err());
        c.inc(&[]);
        c.inc(&[]);
        let text = registry.render();
        assert!(text.contains("test_total 2"));
    }

    #[test]
    fn gauge_set_inc_dec() {
        let registry = Registry::new();
        let g = registry.gauge("test_gauge", "");
        g.set(&[], 5.0);
        g.inc(&[]);
        g.dec(&[]);
        g.dec(&[]);
        let text = registry.render();
        assert!(text.contains("test_gauge 4"));
    }

    #[test]
    fn histogram_bucket_is_cumulative_and_exact_count_ahead() {
        let registry = Registry::new();
        let h = registry.histogram("test_duration_seconds", "", vec![0.1, 0.5, 1.0]);
        h.observe(&[], 0.05);
        h.observe(&[], 0.3);
        h.observe(&[], 0.8);
        let text = registry.render();
        assert!(text.contains("test_duration_seconds_bucket{le=\"0.1\"} 1"));
        assert!(text.contains("test_duration_seconds_bucket{le=\"0.5\"} 2"));
        assert!(text.contains("test_duration_seconds_bucket{le=\"1\"} 3"));
        assert!(text.contains("test_duration_seconds_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("test_duration_seconds_count 3"));
    }

    #[test]
    fn label_values_are_escaped() {
        let registry = Registry::new();
        let c = registry.counter("esc_total", "");
        c.add(&[("path", "a\"b\\c\nd")], 1.0).unwrap();
        let text = registry.render();
        assert!(text.contains(r#"path="a\"b\\c\nd""#));
    }

    #[test]
    fn default_metrics_expose_under_documented_names() {
        let registry = Registry::new();
        let defaults = DefaultMetrics::register(&registry);
        defaults
            .requests_total
            .add(&[("protocol", "grpc"), ("path", "/x"), ("status", "OK")], 1.0)
            .unwrap();
        defaults
            .active_connections
            .set(&[("protocol", "grpc")], 3.0);
        let text = registry.render();
        assert!(text.contains("mockd_requests_total"));
        assert!(text.contains("mockd_active_connections"));
        assert!(text.contains("mockd_mocks_total"));
        assert!(text.contains("mockd_request_duration_seconds"));
    }
}
