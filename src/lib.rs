//! # Splitflow
//!
//! A **parallel split ingestion engine**. A remote table is exposed as a fixed list of
//! independently readable *splits*; splitflow fans out over them with a fixed pool of
//! workers, streams encoded batches from each split with bounded retry, decodes every
//! batch into uniform [`Record`]s, and delivers them to a [`RecordSink`] under cooperative
//! cancellation.
//!
//! ## Key Features
//!
//! - **Deterministic assignment** - round-robin striping of splits over `P` workers, fixed
//!   at open time
//! - **Resilient reads** - transient transport failures are retried from the last
//!   acknowledged row, invisibly to the consumer
//! - **Two wire formats** - columnar Arrow IPC batches and row-oriented Avro datums, both
//!   decoded into the same record layout
//! - **Field selection** - emit a subset of wire fields in any order
//! - **One outcome per run** - `Completed`, `Failed` (with split id and phase) or
//!   `Cancelled`
//!
//! ## Quick Start
//!
//! ```
//! use splitflow::prelude::*;
//! use splitflow::testing::{id_batches, sample_schema};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let schema = sample_schema();
//! let client = FakeReadClient::new();
//! for split in ["s0", "s1", "s2", "s3"] {
//!     client.add_split(split, id_batches(WireFormat::Arrow, &schema, 0, 2, 50)?);
//! }
//!
//! let session = ReadSession::new(
//!     ["s0", "s1", "s2", "s3"].into_iter().map(SplitId::from).collect(),
//!     schema,
//!     WireFormat::Arrow,
//! );
//! let config = EngineConfig::default().with_parallelism(2).with_channel_capacity(64);
//! let (records, handle) = Engine::new(config, session, Arc::new(client))
//!     .with_selected_fields(["id", "score"])
//!     .open()?
//!     .spawn()?;
//!
//! let count = records.iter().count();
//! assert!(handle.join().is_completed());
//! assert_eq!(count, 400);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Splits and workers
//!
//! [`assign_splits`] gives worker `i` of `P` the splits `i, i + P, i + 2P, …`. Each split
//! is owned by exactly one worker and read to the end before the worker moves on, so
//! records keep their wire order within a split and within a worker. There is no ordering
//! across workers.
//!
//! ### Reading
//!
//! A [`SplitReader`](reader::SplitReader) wraps one split's stream from a [`ReadClient`].
//! Retryable [`ErrorKind`]s reopen the stream at the current row offset, up to
//! [`ReadOptions::max_read_rows_retries`] per split. Other failures, and exhausted
//! retries, fail the run with [`IngestionError::StreamFailure`].
//!
//! ### Decoding
//!
//! The session's [`WireFormat`] selects one [`Codec`] for the whole run. A batch is
//! decoded completely before any of its records is emitted; a malformed batch fails the
//! run with [`IngestionError::DecodeFailure`] and is never retried.
//!
//! ### Lifecycle
//!
//! [`Engine`] → [`Engine::open`] → [`OpenedEngine`] → [`OpenedEngine::run`] →
//! [`RunOutcome`]. Cancellation ([`CancelHandle`]) and peer failure are observed at split
//! and batch boundaries.
//!
//! ## Feature Flags
//!
//! - `format-arrow` - Arrow IPC columnar batches (default)
//! - `format-avro` - Avro binary row batches (default)
//!
//! ## Logging
//!
//! The engine emits [`tracing`] events (`info` for lifecycle transitions, `debug` per
//! split and assignment, `warn` per retry, `error` on a worker failure). No subscriber is
//! installed.

pub mod client;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod reader;
pub mod record;
pub mod schema;
pub mod sink;
pub mod split;
pub mod testing;
pub mod worker;

// General re-exports
pub use client::{ErrorKind, RawBatch, ReadClient, ReadRowsRequest, RowStream, TransportError};
pub use codec::{Codec, WireFormat};
pub use config::{EngineConfig, ReadOptions, ResolvedReadRequest, RetryBackoff};
pub use engine::{
    CancelHandle, Engine, EngineHandle, EngineState, OpenedEngine, ReadSession, RunOutcome,
    RunSummary,
};
pub use error::{DecodeError, IngestionError, Phase, Result};
pub use metrics::{IngestionMetrics, MetricsCollector};
pub use record::{Record, Value};
pub use schema::{FieldType, RowLayout, WireField, WireSchema};
pub use sink::{ChannelSink, CollectingSink, RecordSink, SinkClosed};
pub use split::{SplitId, WorkerAssignment, assign_splits};
pub use worker::WorkerReport;

/// Everything needed to configure, open and run an engine.
pub mod prelude {
    pub use crate::client::{ErrorKind, FakeReadClient, Fault, ReadClient};
    pub use crate::codec::WireFormat;
    pub use crate::config::{EngineConfig, ReadOptions, RetryBackoff};
    pub use crate::engine::{Engine, ReadSession, RunOutcome};
    pub use crate::error::IngestionError;
    pub use crate::record::{Record, Value};
    pub use crate::schema::{FieldType, WireField, WireSchema};
    pub use crate::sink::{CollectingSink, RecordSink, SinkClosed};
    pub use crate::split::SplitId;
}
