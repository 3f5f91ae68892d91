//! Record sinks.
//!
//! A [`RecordSink`] receives every decoded record together with the index of the worker
//! that produced it. Each worker emits in its own split order; records from different
//! workers interleave arbitrarily. A sink that can no longer accept records returns
//! [`SinkClosed`], which cancels the run.

use crate::record::Record;
use crate::worker::RunState;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("record sink is closed")]
pub struct SinkClosed;

/// Destination for decoded records. Shared by all workers of a run.
pub trait RecordSink: Send + Sync {
    /// Deliver one record produced by `worker`.
    ///
    /// # Errors
    /// Returns [`SinkClosed`] if the sink no longer accepts records.
    fn emit(&self, worker: usize, record: Record) -> Result<(), SinkClosed>;
}

impl<F> RecordSink for F
where
    F: Fn(usize, Record) -> Result<(), SinkClosed> + Send + Sync,
{
    fn emit(&self, worker: usize, record: Record) -> Result<(), SinkClosed> {
        self(worker, record)
    }
}

/// Buffers every record in memory, tagged with its worker.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<(usize, Record)>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the buffer is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().expect("sink buffer mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records emitted by one worker, in emission order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the buffer is poisoned.
    #[must_use]
    pub fn records_for(&self, worker: usize) -> Vec<Record> {
        self.records
            .lock()
            .expect("sink buffer mutex poisoned")
            .iter()
            .filter(|(w, _)| *w == worker)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the buffer is poisoned.
    #[must_use]
    pub fn into_records(self) -> Vec<(usize, Record)> {
        self.records.into_inner().expect("sink buffer mutex poisoned")
    }
}

impl RecordSink for CollectingSink {
    fn emit(&self, worker: usize, record: Record) -> Result<(), SinkClosed> {
        self.records
            .lock()
            .expect("sink buffer mutex poisoned")
            .push((worker, record));
        Ok(())
    }
}

/// How long a full channel is left alone before the run state is checked again.
const SEND_POLL: Duration = Duration::from_millis(1);

/// Forwards records into a bounded channel.
///
/// Waits while the channel is full, but gives up with [`SinkClosed`] as soon as the run
/// stops, so a consumer that holds the receiver without reading cannot pin the workers.
/// Also reports [`SinkClosed`] once the receiver is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: SyncSender<Record>,
    run: Arc<RunState>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(sender: SyncSender<Record>, run: Arc<RunState>) -> Self {
        Self { sender, run }
    }
}

impl RecordSink for ChannelSink {
    fn emit(&self, _worker: usize, record: Record) -> Result<(), SinkClosed> {
        let mut record = record;
        loop {
            match self.sender.try_send(record) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(SinkClosed),
                Err(TrySendError::Full(returned)) => {
                    if !self.run.is_running() {
                        return Err(SinkClosed);
                    }
                    record = returned;
                    thread::sleep(SEND_POLL);
                }
            }
        }
    }
}
