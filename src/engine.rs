//! Engine lifecycle: open a read session, run the worker pool, report one outcome.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──open()──▶ Opened ──run()──▶ Running ──▶ Completed | Failed | Cancelled
//! ```
//!
//! - [`Engine`] is the idle engine: configuration, the negotiated [`ReadSession`] and a
//!   shared [`ReadClient`].
//! - [`Engine::open`] validates everything that can be checked without reading (worker
//!   count, split names, schema, field selection, codec) and computes the worker
//!   assignments. Configuration problems surface here, before any split is touched.
//! - [`OpenedEngine::run`] consumes the engine, runs one worker per assignment on a
//!   dedicated thread pool, and returns a single [`RunOutcome`]. The first worker failure
//!   stops the others at their next split or batch boundary.
//! - [`OpenedEngine::spawn`] does the same on a background thread and streams records
//!   through a bounded channel; the returned [`EngineHandle`] cancels or joins the run.
//!
//! # Example
//!
//! ```
//! use splitflow::prelude::*;
//! use splitflow::testing::{encode_batch, id_rows, sample_schema};
//! use std::sync::Arc;
//!
//! let schema = sample_schema();
//! let client = FakeReadClient::new();
//! for name in ["s0", "s1", "s2"] {
//!     let batch = encode_batch(WireFormat::Avro, &schema, &id_rows(0, 10)).unwrap();
//!     client.add_split(name, vec![batch]);
//! }
//!
//! let session = ReadSession::new(vec!["s0".into(), "s1".into(), "s2".into()], schema, WireFormat::Avro);
//! let engine = Engine::new(EngineConfig::default().with_parallelism(2), session, Arc::new(client))
//!     .with_selected_fields(["name", "id"]);
//! let opened = engine.open().unwrap();
//! assert_eq!(opened.produced_layout().field_names(), vec!["name", "id"]);
//!
//! let sink = CollectingSink::new();
//! let outcome = opened.run(&sink);
//! assert!(outcome.is_completed());
//! assert_eq!(sink.len(), 30);
//! ```

use crate::client::ReadClient;
use crate::codec::{Codec, WireFormat};
use crate::config::EngineConfig;
use crate::error::{IngestionError, Result};
use crate::metrics::IngestionMetrics;
use crate::record::Record;
use crate::schema::{RowLayout, WireSchema};
use crate::sink::{ChannelSink, RecordSink};
use crate::split::{SplitId, WorkerAssignment, assign_all};
use crate::worker::{RunState, Worker, WorkerReport};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::mpsc::{Receiver, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// Session and State
// ============================================================================

/// The outcome of session negotiation: what to read and how it is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadSession {
    pub splits: Vec<SplitId>,
    pub schema: WireSchema,
    #[serde(default)]
    pub format: WireFormat,
}

impl ReadSession {
    #[must_use]
    pub fn new(splits: Vec<SplitId>, schema: WireSchema, format: WireFormat) -> Self {
        Self {
            splits,
            schema,
            format,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Opened,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl EngineState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opened => "opened",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Split names must be non-empty and unique within a session.
///
/// # Errors
/// Returns [`IngestionError::Configuration`] naming the offending split.
pub fn validate_splits(splits: &[SplitId]) -> Result<()> {
    let mut seen = HashSet::with_capacity(splits.len());
    for split in splits {
        if split.as_str().trim().is_empty() {
            return Err(IngestionError::configuration("split names must not be empty"));
        }
        if !seen.insert(split) {
            return Err(IngestionError::configuration(format!("split `{split}` listed twice")));
        }
    }
    Ok(())
}

// ============================================================================
// Outcome
// ============================================================================

/// Per-worker progress of a run that did not fail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// One report per worker, ordered by worker index.
    pub workers: Vec<WorkerReport>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSummary {
    #[must_use]
    pub fn records(&self) -> u64 {
        self.workers.iter().map(|w| w.records).sum()
    }

    #[must_use]
    pub fn batches(&self) -> u64 {
        self.workers.iter().map(|w| w.batches).sum()
    }

    #[must_use]
    pub fn splits_completed(&self) -> usize {
        self.workers.iter().map(|w| w.splits_completed).sum()
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.workers.iter().map(|w| w.retries).sum()
    }
}

/// The single terminal result of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// A worker hit an unrecovered failure. Records already emitted are not retracted.
    Failed(IngestionError),
    Cancelled(RunSummary),
}

impl RunOutcome {
    #[must_use]
    pub fn state(&self) -> EngineState {
        match self {
            Self::Completed(_) => EngineState::Completed,
            Self::Failed(_) => EngineState::Failed,
            Self::Cancelled(_) => EngineState::Cancelled,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::Completed(s) | Self::Cancelled(s) => Some(s),
            Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&IngestionError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// The failure, if any; otherwise the summary of a completed or cancelled run.
    ///
    /// # Errors
    /// Returns the failure of a [`RunOutcome::Failed`] run.
    pub fn into_result(self) -> Result<RunSummary> {
        match self {
            Self::Completed(s) | Self::Cancelled(s) => Ok(s),
            Self::Failed(e) => Err(e),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    config: EngineConfig,
    session: ReadSession,
    client: Arc<dyn ReadClient>,
    selected_fields: Vec<String>,
    metrics: Option<Arc<IngestionMetrics>>,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig, session: ReadSession, client: Arc<dyn ReadClient>) -> Self {
        Self {
            config,
            session,
            client,
            selected_fields: Vec::new(),
            metrics: None,
        }
    }

    /// Output fields, in output order. Empty selects every wire field in wire order.
    #[must_use]
    pub fn with_selected_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState::Idle
    }

    /// Validate the run and compute worker assignments.
    ///
    /// # Errors
    /// Returns [`IngestionError::Configuration`] for a zero worker count, empty or
    /// duplicate split names, an invalid wire schema, a selected field the schema lacks,
    /// or a wire format this build cannot decode.
    pub fn open(self) -> Result<OpenedEngine> {
        self.config.validate()?;
        validate_splits(&self.session.splits)?;
        let layout = RowLayout::resolve(&self.selected_fields, &self.session.schema)?;
        let codec = Codec::for_format(self.session.format, &self.session.schema)?;
        let assignments = assign_all(&self.session.splits, self.config.parallelism);

        info!(
            splits = self.session.splits.len(),
            workers = self.config.parallelism,
            format = %self.session.format,
            fields = layout.len(),
            "engine opened"
        );
        for assignment in &assignments {
            debug!(worker = assignment.worker, splits = assignment.len(), "worker assignment");
        }

        Ok(OpenedEngine {
            config: self.config,
            client: self.client,
            assignments,
            layout,
            codec,
            run: Arc::new(RunState::new()),
            metrics: self.metrics,
            state: Arc::new(Mutex::new(EngineState::Opened)),
        })
    }
}

/// An engine whose assignments are fixed and which is ready to run once.
pub struct OpenedEngine {
    config: EngineConfig,
    client: Arc<dyn ReadClient>,
    assignments: Vec<WorkerAssignment>,
    layout: RowLayout,
    codec: Codec,
    run: Arc<RunState>,
    metrics: Option<Arc<IngestionMetrics>>,
    state: Arc<Mutex<EngineState>>,
}

impl OpenedEngine {
    /// The record layout every emitted record follows.
    #[must_use]
    pub fn produced_layout(&self) -> &RowLayout {
        &self.layout
    }

    #[must_use]
    pub fn assignments(&self) -> &[WorkerAssignment] {
        &self.assignments
    }

    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.config.parallelism
    }

    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.codec.format()
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the lifecycle state is poisoned.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state mutex poisoned")
    }

    /// A handle that cancels this run from any thread, before or during `run`.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            run: Arc::clone(&self.run),
        }
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().expect("engine state mutex poisoned") = state;
    }

    /// Run every worker to completion and report the single outcome.
    ///
    /// Workers run concurrently on a pool of exactly `parallelism` threads. Records go to
    /// `sink` as they are decoded.
    pub fn run(self, sink: &dyn RecordSink) -> RunOutcome {
        let started = Instant::now();
        self.set_state(EngineState::Running);
        info!(workers = self.assignments.len(), "engine running");

        let outcome = match self.run_workers(sink) {
            Ok(results) => self.conclude(results, started.elapsed()),
            Err(e) => RunOutcome::Failed(e),
        };
        self.set_state(outcome.state());

        match &outcome {
            RunOutcome::Completed(summary) => info!(
                records = summary.records(),
                retries = summary.retries(),
                elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
                "engine completed"
            ),
            RunOutcome::Cancelled(summary) => info!(records = summary.records(), "engine cancelled"),
            RunOutcome::Failed(e) => warn!(
                split = e.split().map(SplitId::as_str),
                phase = e.phase().map(|p| p.to_string()),
                error = %e,
                "engine failed"
            ),
        }
        outcome
    }

    fn run_workers(&self, sink: &dyn RecordSink) -> Result<Vec<(usize, Result<WorkerReport>)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .thread_name(|i| format!("splitflow-worker-{i}"))
            .build()?;

        let results = Mutex::new(Vec::with_capacity(self.assignments.len()));
        pool.scope(|scope| {
            for assignment in &self.assignments {
                let worker = Worker {
                    index: assignment.worker,
                    splits: &assignment.splits,
                    client: self.client.as_ref(),
                    options: &self.config.read,
                    codec: &self.codec,
                    layout: &self.layout,
                    run: &self.run,
                    metrics: self.metrics.as_deref(),
                };
                let results = &results;
                scope.spawn(move |_| {
                    let result = worker.run(sink);
                    results
                        .lock()
                        .expect("worker results mutex poisoned")
                        .push((worker.index, result));
                });
            }
        });
        Ok(results.into_inner().expect("worker results mutex poisoned"))
    }

    /// Results arrive in completion order, so the first error is the earliest failure.
    fn conclude(&self, results: Vec<(usize, Result<WorkerReport>)>, elapsed: Duration) -> RunOutcome {
        let mut workers = Vec::with_capacity(results.len());
        let mut failure = None;
        for (_, result) in results {
            match result {
                Ok(report) => workers.push(report),
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
        workers.sort_by_key(|w| w.worker);
        let summary = RunSummary { workers, elapsed };

        if self.run.was_cancelled() {
            return RunOutcome::Cancelled(summary);
        }
        match failure {
            Some(e) => RunOutcome::Failed(e),
            None => RunOutcome::Completed(summary),
        }
    }

    /// Run on a background thread, delivering records through a bounded channel of
    /// [`EngineConfig::channel_capacity`] records.
    ///
    /// Dropping the receiver cancels the run at the workers' next checkpoint. Cancelling
    /// through the handle also releases workers waiting on a full channel, so the run can
    /// be joined without draining it.
    ///
    /// # Errors
    /// Returns [`IngestionError::Thread`] if the background thread cannot be started.
    pub fn spawn(self) -> Result<(Receiver<Record>, EngineHandle)> {
        let (sender, receiver) = sync_channel(self.config.channel_capacity);
        let sink = ChannelSink::new(sender, Arc::clone(&self.run));
        let cancel = self.cancel_handle();
        let state = Arc::clone(&self.state);
        let thread = std::thread::Builder::new()
            .name("splitflow-engine".to_string())
            .spawn(move || self.run(&sink))?;
        Ok((
            receiver,
            EngineHandle {
                cancel,
                state,
                thread,
            },
        ))
    }
}

// ============================================================================
// Handles
// ============================================================================

#[derive(Debug, Clone)]
pub struct CancelHandle {
    run: Arc<RunState>,
}

impl CancelHandle {
    /// Stop the run at each worker's next split or batch boundary. A read call already
    /// in flight is not interrupted. Has no effect on a run that already stopped.
    pub fn cancel(&self) {
        if self.run.cancel() {
            info!("cancellation requested");
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.run.was_cancelled()
    }
}

/// Controls a run started with [`OpenedEngine::spawn`].
pub struct EngineHandle {
    cancel: CancelHandle,
    state: Arc<Mutex<EngineState>>,
    thread: JoinHandle<RunOutcome>,
}

impl EngineHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the lifecycle state is poisoned.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state mutex poisoned")
    }

    /// Wait for the run to finish. Records still buffered in the channel stay readable.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the engine thread.
    #[must_use]
    pub fn join(self) -> RunOutcome {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}
