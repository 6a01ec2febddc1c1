//! Observability sinks for reconciliation
//!
//! The engine reports named counters and timers to an [`ObservabilitySink`]
//! handed to it at construction. Sinks are best-effort: a failing (or
//! panicking) sink is logged and ignored, and never changes the outcome of a
//! reconciliation.
//!
//! Three sinks ship with the crate:
//! - [`NoopSink`] discards everything
//! - [`MetricsFacadeSink`] forwards to the `metrics` crate facade, for whatever
//!   exporter the host process installed
//! - [`ReconcileMetrics`] keeps counters and a latency ring buffer in process,
//!   with Prometheus text export
//!
//! # Example
//!
//! ```rust
//! use billing_reconciler::metrics::{ObservabilitySink, ReconcileMetrics, EVENTS_HANDLED};
//!
//! let metrics = ReconcileMetrics::new();
//! metrics.increment(EVENTS_HANDLED, &[("kind", "subscription_updated")]).unwrap();
//! assert!(metrics.to_prometheus_format().contains("billing_reconciler_events_handled_total 1"));
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Event reconciled (any outcome other than an error)
pub const EVENTS_HANDLED: &str = "events_handled";
/// Event targeted a customer id no account owns
pub const UNKNOWN_CUSTOMER: &str = "unknown_customer";
/// Billing provider call failed
pub const PROVIDER_ERROR: &str = "provider_error";
/// Event payload was malformed
pub const INVALID_PAYLOAD: &str = "invalid_payload";
/// Account store write failed
pub const STORAGE_ERROR: &str = "storage_error";
/// Wall time spent processing one event
pub const RECONCILE_DURATION: &str = "reconcile_duration";

/// Maximum number of duration samples to keep in the histogram
const MAX_HISTOGRAM_SAMPLES: usize = 1000;

/// Metric label pairs
pub type Labels<'a> = [(&'a str, &'a str)];

/// Destination for reconciliation counters and timers
pub trait ObservabilitySink: Send + Sync {
    /// Increment a counter by one
    fn increment(&self, name: &str, labels: &Labels<'_>) -> anyhow::Result<()>;

    /// Record a duration sample
    fn observe(&self, name: &str, duration: Duration, labels: &Labels<'_>) -> anyhow::Result<()>;
}

/// Increment a counter, swallowing sink failures
pub(crate) fn emit_increment(sink: &dyn ObservabilitySink, name: &str, labels: &Labels<'_>) {
    swallow(name, || sink.increment(name, labels));
}

/// Record a duration, swallowing sink failures
pub(crate) fn emit_observe(
    sink: &dyn ObservabilitySink,
    name: &str,
    duration: Duration,
    labels: &Labels<'_>,
) {
    swallow(name, || sink.observe(name, duration, labels));
}

fn swallow(name: &str, record: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(record)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(metric = name, error = %e, "Observability sink failed"),
        Err(_) => tracing::warn!(metric = name, "Observability sink panicked"),
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn increment(&self, _name: &str, _labels: &Labels<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn observe(&self, _name: &str, _duration: Duration, _labels: &Labels<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink that forwards to the `metrics` crate facade
///
/// Counter names get a `_total` suffix and durations are recorded in seconds,
/// both under the configured prefix.
#[derive(Debug, Clone)]
pub struct MetricsFacadeSink {
    prefix: String,
}

impl MetricsFacadeSink {
    /// Create a sink with a metric name prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn labels(labels: &Labels<'_>) -> Vec<metrics::Label> {
        labels
            .iter()
            .map(|(key, value)| metrics::Label::new(key.to_string(), value.to_string()))
            .collect()
    }
}

impl Default for MetricsFacadeSink {
    fn default() -> Self {
        Self::new("billing_reconciler")
    }
}

impl ObservabilitySink for MetricsFacadeSink {
    fn increment(&self, name: &str, labels: &Labels<'_>) -> anyhow::Result<()> {
        let name = format!("{}_{}_total", self.prefix, name);
        metrics::counter!(name, Self::labels(labels)).increment(1);
        Ok(())
    }

    fn observe(&self, name: &str, duration: Duration, labels: &Labels<'_>) -> anyhow::Result<()> {
        let name = format!("{}_{}_seconds", self.prefix, name);
        metrics::histogram!(name, Self::labels(labels)).record(duration.as_secs_f64());
        Ok(())
    }
}

/// In-process metrics collector
///
/// Thread-safe collector using atomics and `RwLock`s for concurrent access.
#[derive(Debug)]
pub struct ReconcileMetrics {
    /// Total counter increments per metric name
    counters: RwLock<HashMap<String, u64>>,
    /// Increments broken down by (name, rendered labels)
    labeled: RwLock<HashMap<(String, String), u64>>,
    /// Number of duration samples received
    observations_total: AtomicU64,
    /// Processing durations for percentile calculation
    durations: RwLock<RingBuffer<Duration>>,
    /// When collection started
    start_time: Instant,
}

/// Memory-efficient ring buffer for histogram samples
#[derive(Debug, Clone)]
struct RingBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    /// Position of next write (wraps around)
    write_pos: usize,
}

impl<T: Clone + Ord> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
        }
    }

    fn push(&mut self, value: T) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.write_pos] = value;
        }
        self.write_pos = (self.write_pos + 1) % self.capacity;
    }

    /// Calculate percentile (0.0 to 1.0)
    fn percentile(&self, p: f64) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).cloned()
    }
}

impl ReconcileMetrics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            labeled: RwLock::new(HashMap::new()),
            observations_total: AtomicU64::new(0),
            durations: RwLock::new(RingBuffer::new(MAX_HISTOGRAM_SAMPLES)),
            start_time: Instant::now(),
        }
    }

    /// Current value of a counter
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// Current value of a counter for one label set
    pub fn labeled_counter(&self, name: &str, labels: &Labels<'_>) -> u64 {
        self.labeled
            .read()
            .get(&(name.to_string(), render_labels(labels)))
            .copied()
            .unwrap_or(0)
    }

    /// Number of duration samples recorded
    pub fn observations(&self) -> u64 {
        self.observations_total.load(Ordering::Relaxed)
    }

    /// Duration percentile over the retained samples
    pub fn duration_percentile(&self, p: f64) -> Option<Duration> {
        self.durations.read().percentile(p)
    }

    /// Time since the collector was created
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters = self.counters.read();
        let mut names: Vec<_> = counters.keys().collect();
        names.sort();
        for name in names {
            output.push_str(&format!(
                "billing_reconciler_{}_total {}\n",
                name, counters[name]
            ));
        }
        drop(counters);

        let labeled = self.labeled.read();
        let mut series: Vec<_> = labeled.iter().filter(|((_, l), _)| !l.is_empty()).collect();
        series.sort();
        for ((name, labels), value) in series {
            output.push_str(&format!(
                "billing_reconciler_{}_total{{{}}} {}\n",
                name, labels, value
            ));
        }
        drop(labeled);

        let durations = self.durations.read();
        for (quantile, label) in [(0.5, "p50"), (0.95, "p95"), (0.99, "p99")] {
            if let Some(value) = durations.percentile(quantile) {
                output.push_str(&format!(
                    "billing_reconciler_duration_{}_ms {}\n",
                    label,
                    value.as_millis()
                ));
            }
        }

        output.push_str(&format!(
            "billing_reconciler_uptime_seconds {}\n",
            self.uptime().as_secs()
        ));

        output
    }
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservabilitySink for ReconcileMetrics {
    fn increment(&self, name: &str, labels: &Labels<'_>) -> anyhow::Result<()> {
        *self.counters.write().entry(name.to_string()).or_insert(0) += 1;
        *self
            .labeled
            .write()
            .entry((name.to_string(), render_labels(labels)))
            .or_insert(0) += 1;
        Ok(())
    }

    fn observe(&self, _name: &str, duration: Duration, _labels: &Labels<'_>) -> anyhow::Result<()> {
        self.observations_total.fetch_add(1, Ordering::Relaxed);
        self.durations.write().push(duration);
        Ok(())
    }
}

fn render_labels(labels: &Labels<'_>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(",")
}
