//! Metrics collection and reporting for ingestion runs.
//!
//! # Overview
//!
//! - [`IngestionMetrics`] - lock-free counters updated by workers while a run is in flight
//! - [`Metric`] trait defines the interface for reported metrics
//! - [`MetricsCollector`] holds named metrics and run timing, and renders them to JSON,
//!   stdout or a file
//!
//! Workers only touch [`IngestionMetrics`]; [`IngestionMetrics::export`] copies the
//! counters into a collector once the run is over.
//!
//! # Example
//!
//! ```
//! use splitflow::metrics::{IngestionMetrics, MetricsCollector};
//!
//! let metrics = IngestionMetrics::new();
//! metrics.record_batch(3, 128);
//! metrics.record_split_completed();
//!
//! let collector = MetricsCollector::new();
//! metrics.export(&collector);
//! assert_eq!(collector.snapshot()["rows_emitted"], serde_json::json!(3));
//! ```

use anyhow::Result;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A reported metric.
pub trait Metric: Send + Sync + Any {
    /// The name of this metric (e.g., `rows_emitted`, `read_retries`).
    fn name(&self) -> &str;

    /// The current value of this metric as a JSON value.
    fn value(&self) -> Value;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Cast to Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// Collector
// ============================================================================

/// Thread-safe container for run metrics. Clones share the same storage.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

struct MetricsCollectorInner {
    metrics: HashMap<String, Box<dyn Metric>>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsCollectorInner {
                metrics: HashMap::new(),
                start_time: None,
                end_time: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsCollectorInner> {
        self.inner.lock().expect("metrics mutex poisoned")
    }

    /// Register a metric, replacing any metric with the same name.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    pub fn register(&self, metric: Box<dyn Metric>) {
        self.lock().metrics.insert(metric.name().to_string(), metric);
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    /// Time between [`record_start`](Self::record_start) and
    /// [`record_end`](Self::record_end), if both were called.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Add `value` to the named counter, creating it if absent.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut inner = self.lock();
        let current = inner
            .metrics
            .get(name)
            .and_then(|m| m.as_any().downcast_ref::<CounterMetric>())
            .map_or(0, |c| c.count);
        inner.metrics.insert(
            name.to_string(),
            Box::new(CounterMetric::with_value(name, current + value)),
        );
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    pub fn set_counter(&self, name: &str, value: u64) {
        self.lock()
            .metrics
            .insert(name.to_string(), Box::new(CounterMetric::with_value(name, value)));
    }

    /// All metrics as a JSON object, plus `execution_time_ms` when timing was recorded.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut metrics_json = serde_json::Map::new();

        for (name, metric) in &inner.metrics {
            let mut metric_obj = serde_json::Map::new();
            metric_obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                metric_obj.insert("description".to_string(), json!(desc));
            }
            metrics_json.insert(name.clone(), Value::Object(metric_obj));
        }

        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            let elapsed_ms = end.duration_since(start).as_millis();
            metrics_json.insert(
                "execution_time_ms".to_string(),
                json!({ "value": elapsed_ms, "description": "Wall time of the run in milliseconds" }),
            );
        }
        drop(inner);
        Value::Object(metrics_json)
    }

    /// Print all metrics to stdout, sorted by name.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    pub fn print(&self) {
        println!("\n========== Ingestion Metrics ==========");
        let inner = self.lock();

        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            let elapsed = end.duration_since(start);
            println!(
                "Execution Time: {:.3}s ({} ms)",
                elapsed.as_secs_f64(),
                elapsed.as_millis()
            );
            println!("---------------------------------------");
        }

        let mut sorted: Vec<_> = inner.metrics.iter().collect();
        sorted.sort_by_key(|(name, _)| *name);
        for (name, metric) in sorted {
            match metric.description() {
                Some(desc) => println!("{}: {} ({})", name, metric.value(), desc),
                None => println!("{}: {}", name, metric.value()),
            }
        }
        drop(inner);
        println!("=======================================\n");
    }

    /// Write [`to_json`](Self::to_json) to `path`, pretty-printed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path)?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }

    /// Metric names and current values.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the collector is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock()
            .metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value()))
            .collect()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Built-in Metrics
// ============================================================================

pub struct CounterMetric {
    name: String,
    count: u64,
    description: Option<String>,
}

impl CounterMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, 0)
    }

    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.count)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A single floating-point reading.
pub struct GaugeMetric {
    name: String,
    value: f64,
    description: Option<String>,
}

impl GaugeMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Metric for GaugeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.value)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Ingestion Counters
// ============================================================================

/// Counters shared by every worker of a run.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    rows_emitted: AtomicU64,
    batches_decoded: AtomicU64,
    bytes_received: AtomicU64,
    read_retries: AtomicU64,
    splits_completed: AtomicU64,
}

impl IngestionMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One decoded batch of `rows` records from `bytes` wire bytes.
    pub fn record_batch(&self, rows: u64, bytes: u64) {
        self.batches_decoded.fetch_add(1, Ordering::Relaxed);
        self.rows_emitted.fetch_add(rows, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_retries(&self, retries: u32) {
        self.read_retries.fetch_add(u64::from(retries), Ordering::Relaxed);
    }

    pub fn record_split_completed(&self) {
        self.splits_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn batches_decoded(&self) -> u64 {
        self.batches_decoded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn read_retries(&self) -> u64 {
        self.read_retries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn splits_completed(&self) -> u64 {
        self.splits_completed.load(Ordering::Relaxed)
    }

    /// Copy the current counter values into `collector`, plus a rows-per-second gauge
    /// when the collector has timing.
    pub fn export(&self, collector: &MetricsCollector) {
        let counters = [
            ("rows_emitted", self.rows_emitted(), "Records delivered to the sink"),
            ("batches_decoded", self.batches_decoded(), "Wire batches decoded"),
            ("bytes_received", self.bytes_received(), "Encoded bytes received"),
            ("read_retries", self.read_retries(), "Transparent read retries"),
            ("splits_completed", self.splits_completed(), "Splits read to the end"),
        ];
        for (name, value, description) in counters {
            collector.register(Box::new(
                CounterMetric::with_value(name, value).with_description(description),
            ));
        }
        if let Some(elapsed) = collector.elapsed().filter(|e| !e.is_zero()) {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.rows_emitted() as f64 / elapsed.as_secs_f64();
            collector.register(Box::new(
                GaugeMetric::new("rows_per_second", rate).with_description("Sink throughput"),
            ));
        }
    }
}
