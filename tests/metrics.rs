//! Tests for the metrics module.

use anyhow::Result;
use serde_json::json;
use splitflow::metrics::{CounterMetric, GaugeMetric, IngestionMetrics, MetricsCollector};
use std::sync::Arc;

#[test]
fn test_counter_metric() {
    let collector = MetricsCollector::new();
    collector.register(Box::new(CounterMetric::with_value("test_counter", 5)));
    assert_eq!(collector.snapshot().get("test_counter"), Some(&json!(5)));
}

#[test]
fn test_gauge_metric() {
    let collector = MetricsCollector::new();
    collector.register(Box::new(GaugeMetric::new("test_gauge", 42.5).with_description("Test gauge")));
    let json = collector.to_json();
    assert_eq!(json["test_gauge"]["value"], json!(42.5));
    assert_eq!(json["test_gauge"]["description"], json!("Test gauge"));
}

#[test]
fn test_increment_counter() {
    let collector = MetricsCollector::new();
    collector.increment_counter("requests", 1);
    collector.increment_counter("requests", 5);
    assert_eq!(collector.snapshot().get("requests"), Some(&json!(6)));

    collector.set_counter("requests", 100);
    assert_eq!(collector.snapshot().get("requests"), Some(&json!(100)));
}

#[test]
fn test_timing() {
    let collector = MetricsCollector::new();
    assert!(collector.elapsed().is_none());
    collector.record_start();
    collector.record_end();
    assert!(collector.elapsed().is_some());
    assert!(collector.to_json().get("execution_time_ms").is_some());
}

#[test]
fn test_ingestion_counters_from_many_threads() {
    let metrics = Arc::new(IngestionMetrics::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    metrics.record_batch(10, 64);
                }
                metrics.record_retries(2);
                metrics.record_split_completed();
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("counter thread panicked");
    }

    assert_eq!(metrics.rows_emitted(), 4000);
    assert_eq!(metrics.batches_decoded(), 400);
    assert_eq!(metrics.bytes_received(), 25_600);
    assert_eq!(metrics.read_retries(), 8);
    assert_eq!(metrics.splits_completed(), 4);
}

#[test]
fn test_export_and_save() -> Result<()> {
    let metrics = IngestionMetrics::new();
    metrics.record_batch(7, 100);
    metrics.record_retries(1);

    let collector = MetricsCollector::new();
    collector.record_start();
    std::thread::sleep(std::time::Duration::from_millis(2));
    collector.record_end();
    metrics.export(&collector);

    let snapshot = collector.snapshot();
    assert_eq!(snapshot["rows_emitted"], json!(7));
    assert_eq!(snapshot["read_retries"], json!(1));
    assert_eq!(snapshot["splits_completed"], json!(0));
    assert!(snapshot.contains_key("rows_per_second"));

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("metrics.json");
    collector.save_to_file(&path)?;
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(saved["batches_decoded"]["value"], json!(1));
    assert_eq!(saved["bytes_received"]["description"], json!("Encoded bytes received"));
    Ok(())
}
