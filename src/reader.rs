//! Per-split streaming read with bounded retry.
//!
//! [`SplitReader`] turns one split into an iterator of raw batches. Transport failures of a
//! transient kind are retried transparently: the open stream is dropped, the reader backs
//! off, and a new stream is opened at the number of rows already handed out, so the
//! consumer never sees a batch twice. Retries are counted across the whole split; once the
//! budget is spent (or the failure is not transient) the iterator yields a single
//! [`IngestionError::StreamFailure`] and ends.
//!
//! The reader checks the run state before every fetch and while backing off. When the run
//! has stopped it ends without an error and [`SplitReader::interrupted`] reports it.
//!
//! Every stream the reader opens is released by dropping it, including when the split is
//! abandoned part way.

use crate::client::{RawBatch, ReadClient, ReadRowsRequest, RowStream, TransportError};
use crate::config::ReadOptions;
use crate::error::IngestionError;
use crate::split::SplitId;
use crate::worker::RunState;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest single sleep while backing off; the run state is rechecked between slices.
const BACKOFF_SLICE: Duration = Duration::from_millis(20);

pub struct SplitReader<'a> {
    client: &'a dyn ReadClient,
    options: &'a ReadOptions,
    run: &'a RunState,
    split: SplitId,
    stream: Option<Box<dyn RowStream>>,
    rows_acknowledged: u64,
    retries: u32,
    done: bool,
    interrupted: bool,
}

impl<'a> SplitReader<'a> {
    pub fn new(client: &'a dyn ReadClient, options: &'a ReadOptions, run: &'a RunState, split: SplitId) -> Self {
        Self {
            client,
            options,
            run,
            split,
            stream: None,
            rows_acknowledged: 0,
            retries: 0,
            done: false,
            interrupted: false,
        }
    }

    #[must_use]
    pub fn split(&self) -> &SplitId {
        &self.split
    }

    /// Retries spent on this split so far.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Rows handed out so far; the resume offset for the next stream.
    #[must_use]
    pub fn rows_acknowledged(&self) -> u64 {
        self.rows_acknowledged
    }

    /// Whether the reader stopped early because the run stopped.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    fn request(&self) -> ReadRowsRequest {
        ReadRowsRequest {
            split: self.split.clone(),
            offset: self.rows_acknowledged,
            background_parsing_threads: self.options.background_parsing_threads,
            prefetch_responses: self.options.prefetch_responses,
            endpoint: self.options.endpoint.clone(),
            attempt_timeout: self.options.attempt_timeout(),
        }
    }

    fn fetch(&mut self) -> Result<Option<RawBatch>, TransportError> {
        if self.stream.is_none() {
            debug!(split = %self.split, offset = self.rows_acknowledged, "opening read stream");
            self.stream = Some(self.client.read_rows(&self.request())?);
        }
        let timeout = self.options.attempt_timeout();
        match self.stream.as_mut() {
            Some(stream) => stream.next_batch(timeout),
            None => Ok(None),
        }
    }

    /// Sleep for `delay`, waking early if the run stops. Returns `false` if it stopped.
    fn back_off(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if !self.run.is_running() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(BACKOFF_SLICE));
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.stream = None;
    }

    fn interrupt(&mut self) {
        self.interrupted = true;
        self.finish();
    }
}

impl Iterator for SplitReader<'_> {
    type Item = Result<RawBatch, IngestionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if !self.run.is_running() {
                self.interrupt();
                return None;
            }

            match self.fetch() {
                Ok(Some(batch)) => {
                    self.rows_acknowledged += batch.row_count;
                    return Some(Ok(batch));
                }
                Ok(None) => {
                    debug!(split = %self.split, rows = self.rows_acknowledged, "split exhausted");
                    self.finish();
                    return None;
                }
                Err(error) => {
                    self.stream = None;
                    if !error.is_transient() || self.retries >= self.options.max_read_rows_retries {
                        let attempts = self.retries + 1;
                        self.finish();
                        return Some(Err(IngestionError::StreamFailure {
                            split: self.split.clone(),
                            attempts,
                            source: error,
                        }));
                    }
                    self.retries += 1;
                    let delay = self.options.backoff.delay(self.retries);
                    warn!(
                        split = %self.split,
                        retry = self.retries,
                        max_retries = self.options.max_read_rows_retries,
                        offset = self.rows_acknowledged,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "read failed, retrying"
                    );
                    if !self.back_off(delay) {
                        self.interrupt();
                        return None;
                    }
                }
            }
        }
    }
}
