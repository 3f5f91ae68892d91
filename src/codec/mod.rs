//! Decode dispatch for wire batches.
//!
//! The negotiated wire format picks one [`Codec`] for the whole run. The set of formats is
//! closed, so dispatch is a plain two-case enum rather than a plugin trait:
//!
//! - [`Codec::Columnar`] (feature `format-arrow`) - each batch is an Arrow IPC stream;
//!   every logical row of the decoded block becomes one [`Record`].
//! - [`Codec::Row`] (feature `format-avro`) - each batch is `row_count` Avro binary datums
//!   laid end to end; each datum becomes one [`Record`].
//!
//! Both variants return records in wire order, laid out per the run's [`RowLayout`], and
//! fail with a [`DecodeError`] on malformed or truncated input. Decode failures are not
//! retried here.

#[cfg(feature = "format-arrow")]
pub mod arrow;
#[cfg(feature = "format-avro")]
pub mod avro;

use crate::client::RawBatch;
use crate::error::{DecodeError, IngestionError, Result};
use crate::record::Record;
use crate::schema::{RowLayout, WireSchema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire encoding negotiated for a read session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Arrow,
    Avro,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Arrow => f.write_str("arrow"),
            WireFormat::Avro => f.write_str("avro"),
        }
    }
}

#[derive(Debug)]
pub enum Codec {
    #[cfg(feature = "format-arrow")]
    Columnar(arrow::ArrowCodec),
    #[cfg(feature = "format-avro")]
    Row(avro::AvroCodec),
}

impl Codec {
    /// Select the codec for `format`, prepared against the negotiated wire schema.
    ///
    /// # Errors
    /// Returns [`IngestionError::Configuration`] if the format's feature is disabled or the
    /// schema cannot be expressed in that format.
    pub fn for_format(format: WireFormat, schema: &WireSchema) -> Result<Self> {
        match format {
            #[cfg(feature = "format-arrow")]
            WireFormat::Arrow => Ok(Codec::Columnar(arrow::ArrowCodec::new(schema))),
            #[cfg(feature = "format-avro")]
            WireFormat::Avro => Ok(Codec::Row(avro::AvroCodec::new(schema)?)),
            #[allow(unreachable_patterns)]
            other => {
                let _ = schema;
                Err(IngestionError::configuration(format!(
                    "built without support for the {other} wire format (enable feature `format-{other}`)"
                )))
            }
        }
    }

    #[must_use]
    pub fn format(&self) -> WireFormat {
        match self {
            #[cfg(feature = "format-arrow")]
            Codec::Columnar(_) => WireFormat::Arrow,
            #[cfg(feature = "format-avro")]
            Codec::Row(_) => WireFormat::Avro,
        }
    }

    /// Decode one wire batch into records, in wire order.
    ///
    /// # Errors
    /// Returns a [`DecodeError`] if the batch is in the wrong format, malformed or truncated.
    pub fn decode(&self, batch: &RawBatch, layout: &RowLayout) -> std::result::Result<Vec<Record>, DecodeError> {
        if batch.format != self.format() {
            return Err(DecodeError::new(format!(
                "received a {} batch on a {} session",
                batch.format,
                self.format()
            )));
        }
        match self {
            #[cfg(feature = "format-arrow")]
            Codec::Columnar(codec) => {
                let records = codec.decode(&batch.data, layout)?;
                if records.len() as u64 != batch.row_count {
                    return Err(DecodeError::new(format!(
                        "batch declares {} rows but decodes to {}",
                        batch.row_count,
                        records.len()
                    )));
                }
                Ok(records)
            }
            #[cfg(feature = "format-avro")]
            Codec::Row(codec) => codec.decode(&batch.data, batch.row_count, layout),
        }
    }
}
