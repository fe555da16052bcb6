//! In-memory metrics registry with Prometheus-style text exposition.
//!
//! Metrics are identified by name plus a sorted label set. A metric *family*
//! (one name) carries the `# HELP` / `# TYPE` header and one series per label
//! combination. Creation is idempotent so call sites can lazily materialize a
//! labelled series; lookups through `get_*` fail if the series was never
//! created.
//!
//! Provided gateway metrics (see [`GatewayMetrics`]):
//! * `toolgate_tool_calls_total` (counter; `tool`, `status`, `fallback`)
//! * `toolgate_tool_call_duration_seconds` (histogram; `tool`)
//! * `toolgate_cache_requests_total` (counter; `result`)
//! * `toolgate_process_spawns_total` (counter; `server`)
//! * `toolgate_active_processes` (gauge)
//! * `toolgate_server_health_status` (gauge; `server`)
//! * `toolgate_registered_tools` (gauge)
use std::{
    collections::BTreeMap,
    fmt::{self, Write as _},
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;

pub const TOOLGATE_TOOL_CALLS_TOTAL: &str = "toolgate_tool_calls_total";
pub const TOOLGATE_TOOL_CALL_DURATION_SECONDS: &str = "toolgate_tool_call_duration_seconds";
pub const TOOLGATE_CACHE_REQUESTS_TOTAL: &str = "toolgate_cache_requests_total";
pub const TOOLGATE_PROCESS_SPAWNS_TOTAL: &str = "toolgate_process_spawns_total";
pub const TOOLGATE_ACTIVE_PROCESSES: &str = "toolgate_active_processes";
pub const TOOLGATE_SERVER_HEALTH_STATUS: &str = "toolgate_server_health_status";
pub const TOOLGATE_REGISTERED_TOOLS: &str = "toolgate_registered_tools";

/// Default latency buckets, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Errors raised by the metrics registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MetricsError {
    #[error("Metric not found: {0}")]
    NotFound(String),

    #[error("Metric {name} already registered as a {existing}, not a {requested}")]
    TypeConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("Invalid metric name: {0}")]
    InvalidName(String),
}

/// Result type for metrics registry operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Gauge => f.write_str("gauge"),
            MetricKind::Histogram => f.write_str("histogram"),
        }
    }
}

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge holding an `f64` (stored as raw bits).
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    pub fn inc(&self) {
        self.add(1.0);
    }

    pub fn dec(&self) {
        self.add(-1.0);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct HistogramState {
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

/// Cumulative bucket histogram.
#[derive(Debug)]
pub struct Histogram {
    boundaries: Vec<f64>,
    state: Mutex<HistogramState>,
}

/// Point-in-time copy of a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(boundary, cumulative count)` pairs in ascending boundary order.
    pub buckets: Vec<(f64, u64)>,
    pub count: u64,
    pub sum: f64,
}

impl Histogram {
    fn new(boundaries: &[f64]) -> Self {
        let mut boundaries: Vec<f64> = boundaries.iter().copied().filter(|b| b.is_finite()).collect();
        boundaries.sort_by(f64::total_cmp);
        boundaries.dedup();
        let bucket_counts = vec![0; boundaries.len()];
        Self {
            boundaries,
            state: Mutex::new(HistogramState {
                bucket_counts,
                count: 0,
                sum: 0.0,
            }),
        }
    }

    /// Record one observation. Every bucket whose boundary is `>= value` is
    /// incremented; the implicit `+Inf` bucket always equals `count`.
    pub fn observe(&self, value: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.count += 1;
        state.sum += value;
        for (boundary, count) in self.boundaries.iter().zip(state.bucket_counts.iter_mut()) {
            if value <= *boundary {
                *count += 1;
            }
        }
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        HistogramSnapshot {
            buckets: self
                .boundaries
                .iter()
                .copied()
                .zip(state.bucket_counts.iter().copied())
                .collect(),
            count: state.count,
            sum: state.sum,
        }
    }
}

#[derive(Debug, Clone)]
enum Series {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

impl Series {
    fn kind(&self) -> MetricKind {
        match self {
            Series::Counter(_) => MetricKind::Counter,
            Series::Gauge(_) => MetricKind::Gauge,
            Series::Histogram(_) => MetricKind::Histogram,
        }
    }
}

#[derive(Debug)]
struct MetricFamily {
    help: String,
    kind: MetricKind,
    /// Keyed by the sorted label set.
    series: BTreeMap<Vec<(String, String)>, Series>,
}

/// Registry of metric families. Construct one per process and share it.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    families: RwLock<BTreeMap<String, MetricFamily>>,
}

fn normalize_labels(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut sorted: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    sorted.sort();
    sorted.dedup_by(|a, b| a.0 == b.0);
    sorted
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn series_key(name: &str, labels: &[(String, String)]) -> String {
    format!("{name}{}", render_labels(labels, None))
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn render_labels(labels: &[(String, String)], le: Option<&str>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{le}\""));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        kind: MetricKind,
        make: impl FnOnce() -> Series,
    ) -> MetricsResult<Series> {
        if !valid_name(name) {
            return Err(MetricsError::InvalidName(name.to_string()));
        }
        let labels = normalize_labels(labels);
        let mut families = self.families.write().unwrap_or_else(PoisonError::into_inner);
        let family = families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily {
                help: help.to_string(),
                kind,
                series: BTreeMap::new(),
            });
        if family.kind != kind {
            return Err(MetricsError::TypeConflict {
                name: name.to_string(),
                existing: family.kind,
                requested: kind,
            });
        }
        Ok(family.series.entry(labels).or_insert_with(make).clone())
    }

    fn get(&self, name: &str, labels: &[(&str, &str)]) -> MetricsResult<Series> {
        let labels = normalize_labels(labels);
        let families = self.families.read().unwrap_or_else(PoisonError::into_inner);
        families
            .get(name)
            .and_then(|family| family.series.get(&labels))
            .cloned()
            .ok_or_else(|| MetricsError::NotFound(series_key(name, &labels)))
    }

    /// Register (or fetch the existing) counter for `name` + `labels`.
    pub fn create_counter(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
    ) -> MetricsResult<Arc<Counter>> {
        match self.create(name, help, labels, MetricKind::Counter, || {
            Series::Counter(Arc::new(Counter::default()))
        })? {
            Series::Counter(counter) => Ok(counter),
            other => Err(MetricsError::TypeConflict {
                name: name.to_string(),
                existing: other.kind(),
                requested: MetricKind::Counter,
            }),
        }
    }

    pub fn create_gauge(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
    ) -> MetricsResult<Arc<Gauge>> {
        match self.create(name, help, labels, MetricKind::Gauge, || {
            Series::Gauge(Arc::new(Gauge::default()))
        })? {
            Series::Gauge(gauge) => Ok(gauge),
            other => Err(MetricsError::TypeConflict {
                name: name.to_string(),
                existing: other.kind(),
                requested: MetricKind::Gauge,
            }),
        }
    }

    /// Histogram with [`DEFAULT_BUCKETS`].
    pub fn create_histogram(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
    ) -> MetricsResult<Arc<Histogram>> {
        self.create_histogram_with_buckets(name, help, labels, DEFAULT_BUCKETS)
    }

    /// Histogram with explicit bucket boundaries. Boundaries only apply when
    /// the series is first created.
    pub fn create_histogram_with_buckets(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        buckets: &[f64],
    ) -> MetricsResult<Arc<Histogram>> {
        match self.create(name, help, labels, MetricKind::Histogram, || {
            Series::Histogram(Arc::new(Histogram::new(buckets)))
        })? {
            Series::Histogram(histogram) => Ok(histogram),
            other => Err(MetricsError::TypeConflict {
                name: name.to_string(),
                existing: other.kind(),
                requested: MetricKind::Histogram,
            }),
        }
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> MetricsResult<Arc<Counter>> {
        match self.get(name, labels)? {
            Series::Counter(counter) => Ok(counter),
            other => Err(MetricsError::TypeConflict {
                name: name.to_string(),
                existing: other.kind(),
                requested: MetricKind::Counter,
            }),
        }
    }

    pub fn get_gauge(&self, name: &str, labels: &[(&str, &str)]) -> MetricsResult<Arc<Gauge>> {
        match self.get(name, labels)? {
            Series::Gauge(gauge) => Ok(gauge),
            other => Err(MetricsError::TypeConflict {
                name: name.to_string(),
                existing: other.kind(),
                requested: MetricKind::Gauge,
            }),
        }
    }

    pub fn get_histogram(
        &self,
        name: &str,
        labels: &[(&str, &str)],
    ) -> MetricsResult<Arc<Histogram>> {
        match self.get(name, labels)? {
            Series::Histogram(histogram) => Ok(histogram),
            other => Err(MetricsError::TypeConflict {
                name: name.to_string(),
                existing: other.kind(),
                requested: MetricKind::Histogram,
            }),
        }
    }

    /// Number of registered families and series.
    pub fn summary(&self) -> (usize, usize) {
        let families = self.families.read().unwrap_or_else(PoisonError::into_inner);
        let series = families.values().map(|f| f.series.len()).sum();
        (families.len(), series)
    }

    /// Render every metric in text exposition format.
    pub fn export_metrics(&self) -> String {
        let families = self.families.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();

        for (name, family) in families.iter() {
            let _ = writeln!(out, "# HELP {name} {}", family.help.replace('\n', " "));
            let _ = writeln!(out, "# TYPE {name} {}", family.kind);

            for (labels, series) in &family.series {
                match series {
                    Series::Counter(counter) => {
                        let _ = writeln!(out, "{name}{} {}", render_labels(labels, None), counter.get());
                    }
                    Series::Gauge(gauge) => {
                        let _ = writeln!(out, "{name}{} {}", render_labels(labels, None), gauge.get());
                    }
                    Series::Histogram(histogram) => {
                        let snapshot = histogram.snapshot();
                        for (boundary, count) in &snapshot.buckets {
                            let le = boundary.to_string();
                            let _ = writeln!(
                                out,
                                "{name}_bucket{} {count}",
                                render_labels(labels, Some(&le))
                            );
                        }
                        let _ = writeln!(
                            out,
                            "{name}_bucket{} {}",
                            render_labels(labels, Some("+Inf")),
                            snapshot.count
                        );
                        let _ = writeln!(out, "{name}_sum{} {}", render_labels(labels, None), snapshot.sum);
                        let _ = writeln!(out, "{name}_count{} {}", render_labels(labels, None), snapshot.count);
                    }
                }
            }
        }
        out
    }
}

/// Gateway metric definitions and recording helpers.
///
/// Unlabelled families are created eagerly; labelled series are created on
/// first use.
pub struct GatewayMetrics {
    registry: Arc<MetricsRegistry>,
    active_processes: Arc<Gauge>,
    registered_tools: Arc<Gauge>,
    cache_hits: Arc<Counter>,
    cache_misses: Arc<Counter>,
}

impl GatewayMetrics {
    pub fn new(registry: Arc<MetricsRegistry>) -> MetricsResult<Self> {
        tracing::info!("Initializing toolgate metrics");
        let active_processes = registry.create_gauge(
            TOOLGATE_ACTIVE_PROCESSES,
            "Number of backend worker processes currently tracked.",
            &[],
        )?;
        let registered_tools = registry.create_gauge(
            TOOLGATE_REGISTERED_TOOLS,
            "Number of tool registrations across all namespaces.",
            &[],
        )?;
        let cache_hits = registry.create_counter(
            TOOLGATE_CACHE_REQUESTS_TOTAL,
            "Tool call cache lookups by result.",
            &[("result", "hit")],
        )?;
        let cache_misses = registry.create_counter(
            TOOLGATE_CACHE_REQUESTS_TOTAL,
            "Tool call cache lookups by result.",
            &[("result", "miss")],
        )?;
        Ok(Self {
            registry,
            active_processes,
            registered_tools,
            cache_hits,
            cache_misses,
        })
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Count a finished tool call and record its latency.
    pub fn record_tool_call(&self, tool: &str, success: bool, fallback_used: bool, elapsed: Duration) {
        let status = if success { "success" } else { "error" };
        let fallback = if fallback_used { "true" } else { "false" };
        match self.registry.create_counter(
            TOOLGATE_TOOL_CALLS_TOTAL,
            "Total number of tool calls handled by the gateway.",
            &[("tool", tool), ("status", status), ("fallback", fallback)],
        ) {
            Ok(counter) => counter.inc(),
            Err(e) => tracing::error!("Failed to record tool call counter: {}", e),
        }
        match self.registry.create_histogram(
            TOOLGATE_TOOL_CALL_DURATION_SECONDS,
            "Latency of tool calls handled by the gateway.",
            &[("tool", tool)],
        ) {
            Ok(histogram) => histogram.observe_duration(elapsed),
            Err(e) => tracing::error!("Failed to record tool call duration: {}", e),
        }
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.inc();
        } else {
            self.cache_misses.inc();
        }
    }

    pub fn record_process_spawn(&self, server_id: &str) {
        match self.registry.create_counter(
            TOOLGATE_PROCESS_SPAWNS_TOTAL,
            "Total number of backend worker processes spawned.",
            &[("server", server_id)],
        ) {
            Ok(counter) => counter.inc(),
            Err(e) => tracing::error!("Failed to record process spawn: {}", e),
        }
    }

    pub fn set_active_processes(&self, count: usize) {
        self.active_processes.set(count as f64);
    }

    pub fn set_registered_tools(&self, count: usize) {
        self.registered_tools.set(count as f64);
    }

    /// Set the health gauge for a server (1 healthy, 0 unhealthy).
    pub fn set_server_health(&self, server: &str, healthy: bool) {
        match self.registry.create_gauge(
            TOOLGATE_SERVER_HEALTH_STATUS,
            "Health status of backend servers (1 for healthy, 0 for unhealthy).",
            &[("server", server)],
        ) {
            Ok(gauge) => gauge.set(if healthy { 1.0 } else { 0.0 }),
            Err(e) => tracing::error!("Failed to record server health: {}", e),
        }
    }

    pub fn export(&self) -> String {
        self.registry.export_metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_create_is_idempotent() {
        let registry = MetricsRegistry::new();
        let a = registry.create_counter("calls_total", "help", &[("tool", "echo")]).unwrap();
        let b = registry.create_counter("calls_total", "help", &[("tool", "echo")]).unwrap();
        a.inc();
        b.inc_by(2);
        assert_eq!(a.get(), 3);
    }

    #[test]
    fn test_label_order_does_not_matter() {
        let registry = MetricsRegistry::new();
        let counter = registry
            .create_counter("calls_total", "help", &[("b", "2"), ("a", "1")])
            .unwrap();
        counter.inc();
        let fetched = registry.get_counter("calls_total", &[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(fetched.get(), 1);
    }

    #[test]
    fn test_get_missing_fails() {
        let registry = MetricsRegistry::new();
        assert!(matches!(
            registry.get_gauge("nope", &[]),
            Err(MetricsError::NotFound(_))
        ));
        registry.create_gauge("g", "help", &[("x", "1")]).unwrap();
        assert!(registry.get_gauge("g", &[("x", "2")]).is_err());
    }

    #[test]
    fn test_type_conflict() {
        let registry = MetricsRegistry::new();
        registry.create_counter("m", "help", &[]).unwrap();
        assert!(matches!(
            registry.create_gauge("m", "help", &[]),
            Err(MetricsError::TypeConflict { .. })
        ));
        assert!(registry.get_histogram("m", &[]).is_err());
    }

    #[test]
    fn test_invalid_name() {
        let registry = MetricsRegistry::new();
        assert!(matches!(
            registry.create_counter("9bad", "help", &[]),
            Err(MetricsError::InvalidName(_))
        ));
        assert!(registry.create_counter("bad-name", "help", &[]).is_err());
    }

    #[test]
    fn test_gauge_operations() {
        let registry = MetricsRegistry::new();
        let gauge = registry.create_gauge("g", "help", &[]).unwrap();
        gauge.set(3.5);
        gauge.inc();
        gauge.dec();
        gauge.add(0.5);
        assert_eq!(gauge.get(), 4.0);
    }

    #[test]
    fn test_histogram_bucket_counts_are_cumulative() {
        let registry = MetricsRegistry::new();
        let histogram = registry
            .create_histogram_with_buckets("h", "help", &[], &[1.0, 5.0, 0.5, 10.0])
            .unwrap();
        let values = [0.1, 0.5, 0.7, 3.0, 5.0, 9.0, 42.0];
        for value in values {
            histogram.observe(value);
        }

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.count, values.len() as u64);
        for (boundary, count) in &snapshot.buckets {
            let expected = values.iter().filter(|v| **v <= *boundary).count() as u64;
            assert_eq!(*count, expected, "bucket le={boundary}");
        }
        let boundaries: Vec<f64> = snapshot.buckets.iter().map(|(b, _)| *b).collect();
        assert_eq!(boundaries, vec![0.5, 1.0, 5.0, 10.0]);
        assert!((snapshot.sum - values.iter().sum::<f64>()).abs() < 1e-9);
    }

    #[test]
    fn test_export_format() {
        let registry = MetricsRegistry::new();
        registry
            .create_counter("calls_total", "Total calls.", &[("tool", "echo")])
            .unwrap()
            .inc_by(2);
        registry
            .create_counter("calls_total", "Total calls.", &[("tool", "sum")])
            .unwrap()
            .inc();
        registry.create_gauge("procs", "Processes.", &[]).unwrap().set(3.0);
        let histogram = registry
            .create_histogram_with_buckets("latency_seconds", "Latency.", &[("tool", "echo")], &[0.1, 1.0])
            .unwrap();
        histogram.observe(0.05);
        histogram.observe(0.5);

        let text = registry.export_metrics();
        assert_eq!(text.matches("# HELP calls_total Total calls.").count(), 1);
        assert!(text.contains("# TYPE calls_total counter\n"));
        assert!(text.contains("calls_total{tool=\"echo\"} 2\n"));
        assert!(text.contains("calls_total{tool=\"sum\"} 1\n"));
        assert!(text.contains("# TYPE procs gauge\nprocs 3\n"));
        assert!(text.contains("# TYPE latency_seconds histogram\n"));
        assert!(text.contains("latency_seconds_bucket{tool=\"echo\",le=\"0.1\"} 1\n"));
        assert!(text.contains("latency_seconds_bucket{tool=\"echo\",le=\"1\"} 2\n"));
        assert!(text.contains("latency_seconds_bucket{tool=\"echo\",le=\"+Inf\"} 2\n"));
        assert!(text.contains("latency_seconds_count{tool=\"echo\"} 2\n"));
        assert!(text.contains("latency_seconds_sum{tool=\"echo\"} 0.55\n"));
    }

    #[test]
    fn test_label_values_are_escaped() {
        let registry = MetricsRegistry::new();
        registry
            .create_counter("c", "help", &[("path", "a\"b\\c")])
            .unwrap()
            .inc();
        assert!(registry.export_metrics().contains("c{path=\"a\\\"b\\\\c\"} 1"));
    }

    #[test]
    fn test_gateway_metrics_record() {
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = GatewayMetrics::new(registry.clone()).unwrap();

        metrics.record_tool_call("app.echo", true, false, Duration::from_millis(20));
        metrics.record_tool_call("app.echo", false, true, Duration::from_millis(20));
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(false);
        metrics.record_process_spawn("core");
        metrics.set_active_processes(2);
        metrics.set_server_health("app.core", true);

        let ok = registry
            .get_counter(
                TOOLGATE_TOOL_CALLS_TOTAL,
                &[("tool", "app.echo"), ("status", "success"), ("fallback", "false")],
            )
            .unwrap();
        assert_eq!(ok.get(), 1);
        let misses = registry
            .get_counter(TOOLGATE_CACHE_REQUESTS_TOTAL, &[("result", "miss")])
            .unwrap();
        assert_eq!(misses.get(), 2);
        assert_eq!(
            registry
                .get_histogram(TOOLGATE_TOOL_CALL_DURATION_SECONDS, &[("tool", "app.echo")])
                .unwrap()
                .snapshot()
                .count,
            2
        );
        assert_eq!(registry.get_gauge(TOOLGATE_ACTIVE_PROCESSES, &[]).unwrap().get(), 2.0);

        let text = metrics.export();
        assert!(text.contains("toolgate_server_health_status{server=\"app.core\"} 1"));
    }
}
