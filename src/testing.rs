//! Testing utilities for ingestion runs.
//!
//! Everything needed to drive an [`Engine`](crate::engine::Engine) end to end without a
//! remote service:
//!
//! - **Fixtures**: a sample wire schema, deterministic rows, and encoders that turn rows
//!   into wire batches for either format
//! - **Fake client**: [`FakeReadClient`] serves scripted batches per split, injects faults,
//!   and records every read request and stream release
//! - **Assertions**: compare emitted records with detailed failure messages
//!
//! # Quick Start
//!
//! ```
//! use splitflow::prelude::*;
//! use splitflow::testing::*;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let schema = sample_schema();
//! let client = FakeReadClient::new();
//! client.add_split("s0", id_batches(WireFormat::Arrow, &schema, 0, 2, 5)?);
//! client.inject_fault("s0", Fault::AfterBatches { batches: 1, kind: ErrorKind::Aborted });
//!
//! let session = ReadSession::new(vec!["s0".into()], schema, WireFormat::Arrow);
//! let sink = CollectingSink::new();
//! let outcome = Engine::new(EngineConfig::default(), session, Arc::new(client.clone()))
//!     .open()?
//!     .run(&sink);
//!
//! assert!(outcome.is_completed());
//! assert_ids(&sink.records_for(0), &(0..10).collect::<Vec<_>>());
//! assert_eq!(client.live_streams(), 0);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use crate::client::fake::{FakeReadClient, Fault};
pub use assertions::*;
pub use fixtures::*;
