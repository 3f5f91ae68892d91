//! Engine-level failures.
//!
//! Transient transport errors never reach this layer when a retry succeeds; what does
//! reach it is fatal to the run. Cancellation is not an error and has no variant here:
//! it is reported as [`RunOutcome::Cancelled`](crate::engine::RunOutcome::Cancelled).

use crate::client::TransportError;
use crate::split::SplitId;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestionError>;

/// Which step of the per-split pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Read,
    Decode,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Read => f.write_str("read"),
            Phase::Decode => f.write_str("decode"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestionError {
    /// The request, session or engine settings cannot produce a valid run.
    /// Raised before any split is read.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// A split's stream failed and the retry budget is spent (or the error was not
    /// retryable).
    #[error("stream failure on split {split} after {attempts} attempt(s): {source}")]
    StreamFailure {
        split: SplitId,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// A wire batch could not be decoded. Never retried.
    #[error("decode failure on split {split}, batch {batch}: {source}")]
    DecodeFailure {
        split: SplitId,
        batch: u64,
        #[source]
        source: DecodeError,
    },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to start engine thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl IngestionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The split that caused the failure, if the failure is tied to one.
    #[must_use]
    pub fn split(&self) -> Option<&SplitId> {
        match self {
            Self::StreamFailure { split, .. } | Self::DecodeFailure { split, .. } => Some(split),
            _ => None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::StreamFailure { .. } => Some(Phase::Read),
            Self::DecodeFailure { .. } => Some(Phase::Decode),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// A malformed or truncated wire batch.
///
/// `offset` is the byte position inside the batch where decoding went wrong, when the
/// format can report one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub message: String,
    pub offset: Option<u64>,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset: None,
        }
    }

    #[must_use]
    pub fn at(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} (at byte {offset})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DecodeError {}
