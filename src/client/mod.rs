//! Remote read service abstraction.
//!
//! - [`traits`] - the [`ReadClient`] / [`RowStream`] seam and the transport error type
//! - [`fake`] - an in-memory [`FakeReadClient`] with scripted batches and fault injection
//!
//! Session negotiation (creating the read session that yields the split list and wire
//! schema) happens before the engine opens and is not part of this seam.

pub mod fake;
pub mod traits;

pub use fake::{FakeReadClient, Fault};
pub use traits::*;
