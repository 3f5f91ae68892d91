//! The transport seam between the engine and the remote read service.
//!
//! These traits are synchronous: a worker thread blocks in [`ReadClient::read_rows`] and
//! [`RowStream::next_batch`] until the call completes or the per-attempt timeout elapses.
//! Implementations backed by an async SDK are expected to block internally.

use crate::codec::WireFormat;
use crate::split::SplitId;
use std::error::Error;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Transport Error
// ============================================================================

/// Error raised by a [`ReadClient`] or [`RowStream`].
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub kind: ErrorKind,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    ServiceUnavailable,
    RateLimited,
    /// The server dropped the stream mid-flight; resumable from the last offset.
    Aborted,
    NotFound,
    PermissionDenied,
    InvalidArgument,
    Internal,
    Other,
}

impl ErrorKind {
    /// Whether a read failing with this kind may be retried from the last offset.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::ServiceUnavailable
                | ErrorKind::RateLimited
                | ErrorKind::Aborted
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl Error for TransportError {}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

// ============================================================================
// Read Requests and Batches
// ============================================================================

/// One streaming read call against a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRowsRequest {
    pub split: SplitId,
    /// Rows already acknowledged on this split; the server resumes after them.
    pub offset: u64,
    /// Hint for how many threads the client may use to parse responses.
    pub background_parsing_threads: usize,
    /// Hint for how many responses the client may buffer ahead.
    pub prefetch_responses: usize,
    pub endpoint: Option<String>,
    /// Bound on opening the stream; an elapsed open is reported as [`ErrorKind::Timeout`].
    pub attempt_timeout: Option<Duration>,
}

/// One unit of encoded data received from a streaming read call.
///
/// Consumed exactly once by the codec.
#[derive(Clone, PartialEq, Eq)]
pub struct RawBatch {
    pub format: WireFormat,
    /// Number of rows encoded in `data`, as carried in the response metadata.
    pub row_count: u64,
    pub data: Vec<u8>,
}

impl RawBatch {
    pub fn new(format: WireFormat, row_count: u64, data: Vec<u8>) -> Self {
        Self {
            format,
            row_count,
            data,
        }
    }
}

impl fmt::Debug for RawBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBatch")
            .field("format", &self.format)
            .field("row_count", &self.row_count)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ============================================================================
// Client Traits
// ============================================================================

/// Opens streaming reads. Shared by every worker of a run.
pub trait ReadClient: Send + Sync {
    /// Open a stream over `request.split`, starting after `request.offset` rows, waiting
    /// no longer than `request.attempt_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened. Transient kinds are retried by
    /// the caller.
    fn read_rows(&self, request: &ReadRowsRequest) -> TransportResult<Box<dyn RowStream>>;
}

/// An open server stream. Dropping it releases the underlying resource.
pub trait RowStream: Send {
    /// Block for the next batch. `Ok(None)` is end-of-stream.
    ///
    /// `timeout` bounds the wait; implementations report an elapsed wait as
    /// [`ErrorKind::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails. The stream is not used again afterwards.
    fn next_batch(&mut self, timeout: Option<Duration>) -> TransportResult<Option<RawBatch>>;
}

impl<C: ReadClient + ?Sized> ReadClient for std::sync::Arc<C> {
    fn read_rows(&self, request: &ReadRowsRequest) -> TransportResult<Box<dyn RowStream>> {
        (**self).read_rows(request)
    }
}
