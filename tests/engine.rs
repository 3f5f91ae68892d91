//! End-to-end tests for the engine lifecycle.

use anyhow::Result;
use splitflow::engine::EngineState;
use splitflow::error::Phase;
use splitflow::metrics::{IngestionMetrics, MetricsCollector};
use splitflow::prelude::*;
use splitflow::testing::{assert_ids, assert_unique_ids, encode_batch, id_batches, id_rows, sample_schema};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Split `k` serves `batches` batches of `rows` rows with ids starting at `k * 100`.
fn client_with_splits(format: WireFormat, splits: usize, batches: usize, rows: usize) -> Result<(FakeReadClient, Vec<SplitId>)> {
    let schema = sample_schema();
    let client = FakeReadClient::new();
    let mut ids = Vec::new();
    for k in 0..splits {
        let id = SplitId::new(format!("s{k}"));
        client.add_split(id.clone(), id_batches(format, &schema, i64::try_from(k)? * 100, batches, rows)?);
        ids.push(id);
    }
    Ok((client, ids))
}

fn fast_config(parallelism: usize) -> EngineConfig {
    EngineConfig::default().with_parallelism(parallelism).with_read_options(
        ReadOptions::default().with_backoff(RetryBackoff::none()),
    )
}

fn ids_from(start: i64, count: i64) -> Vec<i64> {
    (start..start + count).collect()
}

#[test]
fn test_five_splits_two_workers_row_format() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Avro, 5, 3, 10)?;
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Avro);
    let engine = Engine::new(fast_config(2), session, Arc::new(client.clone()));
    assert_eq!(engine.state(), EngineState::Idle);

    let opened = engine.open()?;
    assert_eq!(opened.state(), EngineState::Opened);
    assert_eq!(opened.assignments()[0].splits, vec![SplitId::from("s0"), SplitId::from("s2"), SplitId::from("s4")]);

    let sink = CollectingSink::new();
    let outcome = opened.run(&sink);
    assert_eq!(outcome.state(), EngineState::Completed);
    assert_eq!(sink.len(), 150);

    let mut expected_w0 = ids_from(0, 30);
    expected_w0.extend(ids_from(200, 30));
    expected_w0.extend(ids_from(400, 30));
    assert_ids(&sink.records_for(0), &expected_w0);

    let mut expected_w1 = ids_from(100, 30);
    expected_w1.extend(ids_from(300, 30));
    assert_ids(&sink.records_for(1), &expected_w1);

    let summary = outcome.summary().expect("completed run has a summary");
    assert_eq!(summary.records(), 150);
    assert_eq!(summary.batches(), 15);
    assert_eq!(summary.splits_completed(), 5);
    assert_eq!(summary.workers[0].splits_completed, 3);
    assert_eq!(summary.workers[1].splits_completed, 2);
    assert_eq!(client.live_streams(), 0);
    Ok(())
}

#[test]
fn test_columnar_format_with_projection() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Arrow, 3, 2, 8)?;
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Arrow);
    let opened = Engine::new(fast_config(3), session, Arc::new(client))
        .with_selected_fields(["name", "id"])
        .open()?;
    assert_eq!(opened.produced_layout().field_names(), vec!["name", "id"]);

    let sink = CollectingSink::new();
    assert!(opened.run(&sink).is_completed());
    let records = sink.into_records();
    assert_eq!(records.len(), 48);
    for (_, record) in &records {
        let id = record.get(1).and_then(Value::as_i64).expect("id is projected second");
        assert_eq!(record.get(0).and_then(Value::as_str), Some(format!("row-{id}").as_str()));
    }
    Ok(())
}

#[test]
fn test_more_workers_than_splits() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Avro, 2, 1, 5)?;
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Avro);
    let sink = CollectingSink::new();
    let outcome = Engine::new(fast_config(4), session, Arc::new(client)).open()?.run(&sink);
    let summary = outcome.into_result()?;
    assert_eq!(summary.workers.len(), 4);
    assert_eq!(summary.records(), 10);
    assert!(sink.records_for(3).is_empty());
    Ok(())
}

#[test]
fn test_empty_session_completes() -> Result<()> {
    let session = ReadSession::new(Vec::new(), sample_schema(), WireFormat::Avro);
    let sink = CollectingSink::new();
    let outcome = Engine::new(fast_config(2), session, Arc::new(FakeReadClient::new()))
        .open()?
        .run(&sink);
    assert!(outcome.is_completed());
    assert!(sink.is_empty());
    Ok(())
}

#[test]
fn test_retries_are_transparent_to_the_consumer() -> Result<()> {
    let (clean, splits) = client_with_splits(WireFormat::Avro, 2, 4, 5)?;
    let (flaky, _) = client_with_splits(WireFormat::Avro, 2, 4, 5)?;
    flaky.inject_fault("s0", Fault::AfterBatches { batches: 1, kind: ErrorKind::Aborted });
    flaky.inject_fault("s0", Fault::OnOpen(ErrorKind::RateLimited));
    flaky.inject_fault("s1", Fault::AfterBatches { batches: 3, kind: ErrorKind::Network });

    let run = |client: FakeReadClient| -> Result<(Vec<Record>, u32)> {
        let session = ReadSession::new(splits.clone(), sample_schema(), WireFormat::Avro);
        let sink = CollectingSink::new();
        let summary = Engine::new(fast_config(1), session, Arc::new(client)).open()?.run(&sink).into_result()?;
        Ok((sink.records_for(0), summary.retries()))
    };

    let (expected, clean_retries) = run(clean)?;
    let (actual, flaky_retries) = run(flaky.clone())?;
    assert_eq!(actual, expected);
    assert_eq!(clean_retries, 0);
    assert_eq!(flaky_retries, 3);
    assert_unique_ids(&actual);
    assert_eq!(flaky.live_streams(), 0);
    Ok(())
}

#[test]
fn test_exhausted_retries_fail_the_run_with_split_id() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Avro, 1, 4, 5)?;
    for _ in 0..3 {
        client.inject_fault("s0", Fault::AfterBatches { batches: 1, kind: ErrorKind::Timeout });
    }
    let config = fast_config(1).with_read_options(
        ReadOptions::default().with_max_retries(2).with_backoff(RetryBackoff::none()),
    );
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Avro);
    let sink = CollectingSink::new();
    let outcome = Engine::new(config, session, Arc::new(client.clone())).open()?.run(&sink);

    let err = outcome.error().expect("run should fail");
    assert_eq!(err.split(), Some(&SplitId::from("s0")));
    assert_eq!(err.phase(), Some(Phase::Read));
    assert!(matches!(err, IngestionError::StreamFailure { attempts: 3, .. }));
    // Whole batches only: three delivered before the failure.
    assert_ids(&sink.records_for(0), &ids_from(0, 15));
    assert_eq!(client.live_streams(), 0);
    Ok(())
}

#[test]
fn test_decode_failure_emits_no_partial_batch() -> Result<()> {
    let schema = sample_schema();
    let client = FakeReadClient::new();
    let good = encode_batch(WireFormat::Avro, &schema, &id_rows(0, 5))?;
    let mut bad = encode_batch(WireFormat::Avro, &schema, &id_rows(5, 5))?;
    bad.data.truncate(bad.data.len() - 3);
    client.add_split("s0", vec![good, bad]);

    let session = ReadSession::new(vec!["s0".into()], schema, WireFormat::Avro);
    let sink = CollectingSink::new();
    let outcome = Engine::new(fast_config(1), session, Arc::new(client.clone())).open()?.run(&sink);

    match outcome {
        RunOutcome::Failed(IngestionError::DecodeFailure { split, batch, .. }) => {
            assert_eq!(split.as_str(), "s0");
            assert_eq!(batch, 1);
        }
        other => panic!("expected a decode failure, got {other:?}"),
    }
    assert_ids(&sink.records_for(0), &ids_from(0, 5));
    // Decode failures are never retried.
    assert_eq!(client.requests().len(), 1);
    Ok(())
}

#[test]
fn test_failure_stops_peers_at_next_checkpoint() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Avro, 6, 3, 10)?;
    client.inject_fault("s0", Fault::OnOpen(ErrorKind::PermissionDenied));
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Avro);

    let emitted = Mutex::new(Vec::new());
    let slow_sink = |worker: usize, record: Record| -> Result<(), SinkClosed> {
        std::thread::sleep(Duration::from_millis(10));
        emitted.lock().expect("sink mutex poisoned").push((worker, record));
        Ok(())
    };
    let outcome = Engine::new(fast_config(2), session, Arc::new(client.clone())).open()?.run(&slow_sink);

    assert_eq!(outcome.error().and_then(IngestionError::split), Some(&SplitId::from("s0")));
    let from_peer = emitted
        .into_inner()
        .expect("sink mutex poisoned")
        .into_iter()
        .filter(|(w, _)| *w == 1)
        .count();
    // The peer finishes at most the batch it was decoding.
    assert!(from_peer <= 10, "peer emitted {from_peer} records after the failure");
    assert!(!client.was_requested(&SplitId::from("s3")));
    Ok(())
}

#[test]
fn test_configuration_errors_surface_before_any_read() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Avro, 2, 1, 1)?;

    let zero_workers = Engine::new(
        EngineConfig::default().with_parallelism(0),
        ReadSession::new(splits.clone(), sample_schema(), WireFormat::Avro),
        Arc::new(client.clone()),
    );
    assert!(zero_workers.open().err().is_some_and(|e| e.is_configuration()));

    let unknown_field = Engine::new(
        fast_config(1),
        ReadSession::new(splits.clone(), sample_schema(), WireFormat::Avro),
        Arc::new(client.clone()),
    )
    .with_selected_fields(["id", "missing"]);
    assert!(unknown_field.open().err().is_some_and(|e| e.is_configuration()));

    let duplicate_split = Engine::new(
        fast_config(1),
        ReadSession::new(vec!["s0".into(), "s0".into()], sample_schema(), WireFormat::Avro),
        Arc::new(client.clone()),
    );
    assert!(duplicate_split.open().err().is_some_and(|e| e.is_configuration()));

    let empty_schema = Engine::new(
        fast_config(1),
        ReadSession::new(splits, WireSchema::default(), WireFormat::Avro),
        Arc::new(client.clone()),
    );
    assert!(empty_schema.open().err().is_some_and(|e| e.is_configuration()));

    assert!(client.requests().is_empty());
    Ok(())
}

#[test]
fn test_workers_run_on_named_pool_threads() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Avro, 4, 1, 2)?;
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Avro);
    let names = Mutex::new(Vec::new());
    let sink = |_: usize, _: Record| -> Result<(), SinkClosed> {
        let name = std::thread::current().name().map(str::to_string);
        names.lock().expect("sink mutex poisoned").push(name);
        Ok(())
    };
    assert!(Engine::new(fast_config(2), session, Arc::new(client)).open()?.run(&sink).is_completed());
    let names = names.into_inner().expect("sink mutex poisoned");
    assert_eq!(names.len(), 8);
    assert!(names
        .iter()
        .all(|n| n.as_deref().is_some_and(|n| n.starts_with("splitflow-worker-"))));
    Ok(())
}

#[test]
fn test_spawn_streams_every_record() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Arrow, 4, 3, 7)?;
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Arrow);
    let (records, handle) = Engine::new(fast_config(2).with_channel_capacity(4), session, Arc::new(client)).open()?.spawn()?;

    let received: Vec<Record> = records.iter().collect();
    let outcome = handle.join();
    assert!(outcome.is_completed());
    assert_eq!(received.len(), 84);
    assert_unique_ids(&received);
    Ok(())
}

#[test]
fn test_dropping_the_receiver_cancels_the_run() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Avro, 4, 20, 10)?;
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Avro);
    let (records, handle) = Engine::new(fast_config(2).with_channel_capacity(1), session, Arc::new(client.clone()))
        .open()?
        .spawn()?;

    let first: Vec<Record> = records.iter().take(5).collect();
    assert_eq!(first.len(), 5);
    drop(records);

    let outcome = handle.join();
    assert!(outcome.is_cancelled(), "{outcome:?}");
    assert!(outcome.summary().is_some_and(|s| s.records() < 800));
    assert_eq!(client.live_streams(), 0);
    Ok(())
}

#[test]
fn test_metrics_are_counted_and_exported() -> Result<()> {
    let (client, splits) = client_with_splits(WireFormat::Avro, 3, 2, 4)?;
    client.inject_fault("s1", Fault::OnOpen(ErrorKind::ServiceUnavailable));
    let session = ReadSession::new(splits, sample_schema(), WireFormat::Avro);
    let metrics = Arc::new(IngestionMetrics::new());
    let sink = CollectingSink::new();
    let outcome = Engine::new(fast_config(2), session, Arc::new(client))
        .with_metrics(Arc::clone(&metrics))
        .open()?
        .run(&sink);
    assert!(outcome.is_completed());

    assert_eq!(metrics.rows_emitted(), 24);
    assert_eq!(metrics.batches_decoded(), 6);
    assert_eq!(metrics.splits_completed(), 3);
    assert_eq!(metrics.read_retries(), 1);
    assert!(metrics.bytes_received() > 0);

    let collector = MetricsCollector::new();
    metrics.export(&collector);
    assert_eq!(collector.snapshot()["rows_emitted"], serde_json::json!(24));
    Ok(())
}

#[test]
fn test_session_serializes_split_ids_as_plain_strings() -> Result<()> {
    let session = ReadSession::new(vec!["s0".into(), "s1".into()], sample_schema(), WireFormat::Avro);
    let json = serde_json::to_value(&session)?;
    assert_eq!(json["splits"], serde_json::json!(["s0", "s1"]));
    assert_eq!(json["format"], serde_json::json!("avro"));

    let loaded: ReadSession = serde_json::from_value(json)?;
    assert_eq!(loaded, session);
    Ok(())
}
