//! In-memory read client for tests.
//!
//! [`FakeReadClient`] serves scripted batches per split, honors resume offsets, injects
//! faults on demand, and keeps an audit trail of every stream it opened and released.

use crate::client::traits::{
    ErrorKind, RawBatch, ReadClient, ReadRowsRequest, RowStream, TransportError, TransportResult,
};
use crate::split::SplitId;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A failure to inject into the next stream opened for a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `read_rows` itself fails.
    OnOpen(ErrorKind),
    /// The stream delivers `batches` batches, then fails.
    AfterBatches { batches: usize, kind: ErrorKind },
}

#[derive(Default)]
struct FakeState {
    splits: HashMap<SplitId, Vec<RawBatch>>,
    faults: HashMap<SplitId, VecDeque<Fault>>,
    requests: Vec<ReadRowsRequest>,
}

#[derive(Clone, Default)]
pub struct FakeReadClient {
    state: Arc<Mutex<FakeState>>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl FakeReadClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the batches a split serves, in wire order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the fake state is poisoned.
    pub fn add_split(&self, split: impl Into<SplitId>, batches: Vec<RawBatch>) {
        self.state
            .lock()
            .expect("fake state mutex poisoned")
            .splits
            .insert(split.into(), batches);
    }

    /// Queue a fault for the next stream opened on `split`. Faults are consumed one per
    /// `read_rows` call, in the order they were queued.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the fake state is poisoned.
    pub fn inject_fault(&self, split: impl Into<SplitId>, fault: Fault) {
        self.state
            .lock()
            .expect("fake state mutex poisoned")
            .faults
            .entry(split.into())
            .or_default()
            .push_back(fault);
    }

    /// Every `read_rows` request received so far, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the fake state is poisoned.
    #[must_use]
    pub fn requests(&self) -> Vec<ReadRowsRequest> {
        self.state
            .lock()
            .expect("fake state mutex poisoned")
            .requests
            .clone()
    }

    /// Requests made for one split, in arrival order.
    #[must_use]
    pub fn requests_for(&self, split: &SplitId) -> Vec<ReadRowsRequest> {
        self.requests()
            .into_iter()
            .filter(|r| &r.split == split)
            .collect()
    }

    /// Whether any read was ever attempted on `split`.
    #[must_use]
    pub fn was_requested(&self, split: &SplitId) -> bool {
        self.requests().iter().any(|r| &r.split == split)
    }

    /// Number of streams successfully opened.
    #[must_use]
    pub fn streams_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of streams dropped by their reader.
    #[must_use]
    pub fn streams_released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Streams opened but not yet released.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.streams_opened() - self.streams_released()
    }
}

impl ReadClient for FakeReadClient {
    fn read_rows(&self, request: &ReadRowsRequest) -> TransportResult<Box<dyn RowStream>> {
        let mut state = self.state.lock().expect("fake state mutex poisoned");
        state.requests.push(request.clone());

        let fault = state
            .faults
            .get_mut(&request.split)
            .and_then(VecDeque::pop_front);
        if let Some(Fault::OnOpen(kind)) = fault {
            return Err(TransportError::new(
                kind,
                format!("injected open failure on {}", request.split),
            ));
        }

        let batches = state.splits.get(&request.split).ok_or_else(|| {
            TransportError::new(
                ErrorKind::NotFound,
                format!("no such read stream: {}", request.split),
            )
        })?;

        // Resume after `offset` rows; offsets always fall on batch boundaries here.
        let mut skipped = 0u64;
        let mut remaining = VecDeque::new();
        for batch in batches {
            if skipped < request.offset {
                skipped += batch.row_count;
                continue;
            }
            remaining.push_back(batch.clone());
        }
        if skipped != request.offset {
            return Err(TransportError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "offset {} does not fall on a batch boundary of {}",
                    request.offset, request.split
                ),
            ));
        }
        drop(state);

        let fail_after = match fault {
            Some(Fault::AfterBatches { batches, kind }) => Some((batches, kind)),
            _ => None,
        };
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRowStream {
            split: request.split.clone(),
            batches: remaining,
            delivered: 0,
            fail_after,
            released: Arc::clone(&self.released),
        }))
    }
}

struct FakeRowStream {
    split: SplitId,
    batches: VecDeque<RawBatch>,
    delivered: usize,
    fail_after: Option<(usize, ErrorKind)>,
    released: Arc<AtomicUsize>,
}

impl RowStream for FakeRowStream {
    fn next_batch(&mut self, _timeout: Option<Duration>) -> TransportResult<Option<RawBatch>> {
        if let Some((after, kind)) = self.fail_after {
            if self.delivered == after {
                return Err(TransportError::new(
                    kind,
                    format!("injected stream failure on {} after {after} batch(es)", self.split),
                ));
            }
        }
        let next = self.batches.pop_front();
        if next.is_some() {
            self.delivered += 1;
        }
        Ok(next)
    }
}

impl Drop for FakeRowStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
