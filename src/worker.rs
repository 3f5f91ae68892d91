//! One parallel worker: read its splits in order, decode each batch, emit every record.
//!
//! A worker owns no thread of its own; the engine runs each worker on a pool thread. All
//! workers of a run share one [`RunState`]. The first worker to fail stops the run, and a
//! cancelled run stops too; every worker checks the state before each split and each
//! batch and winds down without error when it is no longer running.

use crate::client::ReadClient;
use crate::codec::Codec;
use crate::config::ReadOptions;
use crate::error::IngestionError;
use crate::metrics::IngestionMetrics;
use crate::reader::SplitReader;
use crate::schema::RowLayout;
use crate::sink::RecordSink;
use crate::split::SplitId;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, error, info};

// ============================================================================
// Run State
// ============================================================================

const RUNNING: u8 = 0;
const FAILED: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared stop flag for one run.
///
/// Leaves the running state exactly once, either because a worker failed or because the
/// run was cancelled; whichever happens first decides how the run is reported.
#[derive(Debug, Default)]
pub struct RunState {
    state: AtomicU8,
}

impl RunState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Stop the run because of a failure. Returns `true` for the call that stopped it.
    pub fn fail(&self) -> bool {
        self.transition(FAILED)
    }

    /// Request cancellation. Returns `true` for the call that stopped the run; a run that
    /// already stopped is left as it is.
    pub fn cancel(&self) -> bool {
        self.transition(CANCELLED)
    }

    /// Whether cancellation, not a failure, stopped the run.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(RUNNING, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

// ============================================================================
// Worker
// ============================================================================

/// What one worker got through before the run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub splits_completed: usize,
    pub batches: u64,
    pub records: u64,
    pub retries: u32,
}

pub struct Worker<'a> {
    pub index: usize,
    pub splits: &'a [SplitId],
    pub client: &'a dyn ReadClient,
    pub options: &'a ReadOptions,
    pub codec: &'a Codec,
    pub layout: &'a RowLayout,
    pub run: &'a RunState,
    pub metrics: Option<&'a IngestionMetrics>,
}

impl Worker<'_> {
    /// Process every assigned split in order.
    ///
    /// Returns the report when all splits finished or the run stopped. A closed sink
    /// cancels the run and is not an error.
    ///
    /// # Errors
    ///
    /// Returns the first [`IngestionError::StreamFailure`] or
    /// [`IngestionError::DecodeFailure`] this worker hit. The run is stopped before
    /// returning so peers wind down.
    pub fn run(&self, sink: &dyn RecordSink) -> Result<WorkerReport, IngestionError> {
        let mut report = WorkerReport {
            worker: self.index,
            ..WorkerReport::default()
        };
        debug!(worker = self.index, splits = self.splits.len(), "worker started");

        for split in self.splits {
            if !self.run.is_running() {
                break;
            }
            match self.read_split(split, sink, &mut report) {
                Ok(true) => {
                    report.splits_completed += 1;
                    if let Some(metrics) = self.metrics {
                        metrics.record_split_completed();
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    if self.run.fail() {
                        error!(worker = self.index, split = %split, error = %e, "worker failed, stopping run");
                    }
                    return Err(e);
                }
            }
        }

        debug!(
            worker = self.index,
            splits_completed = report.splits_completed,
            records = report.records,
            "worker finished"
        );
        Ok(report)
    }

    /// Returns `Ok(true)` if the split was read to the end, `Ok(false)` if the run stopped.
    fn read_split(&self, split: &SplitId, sink: &dyn RecordSink, report: &mut WorkerReport) -> Result<bool, IngestionError> {
        debug!(worker = self.index, split = %split, "reading split");
        let mut reader = SplitReader::new(self.client, self.options, self.run, split.clone());
        let mut batch_index = 0u64;
        let mut finished = true;

        while let Some(batch) = reader.next() {
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    self.account_retries(&reader, report);
                    return Err(e);
                }
            };
            let bytes = batch.data.len() as u64;
            let records = self.codec.decode(&batch, self.layout).map_err(|source| {
                IngestionError::DecodeFailure {
                    split: split.clone(),
                    batch: batch_index,
                    source,
                }
            });
            let records = match records {
                Ok(records) => records,
                Err(e) => {
                    self.account_retries(&reader, report);
                    return Err(e);
                }
            };
            drop(batch);

            let rows = records.len() as u64;
            for record in records {
                if sink.emit(self.index, record).is_err() {
                    if self.run.cancel() {
                        info!(worker = self.index, "sink closed, cancelling run");
                    }
                    finished = false;
                    break;
                }
                report.records += 1;
            }
            if !finished {
                break;
            }
            report.batches += 1;
            batch_index += 1;
            if let Some(metrics) = self.metrics {
                metrics.record_batch(rows, bytes);
            }
        }

        self.account_retries(&reader, report);
        Ok(finished && !reader.interrupted())
    }

    fn account_retries(&self, reader: &SplitReader<'_>, report: &mut WorkerReport) {
        report.retries += reader.retries();
        if let Some(metrics) = self.metrics {
            metrics.record_retries(reader.retries());
        }
    }
}
