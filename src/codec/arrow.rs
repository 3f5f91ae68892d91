//! Columnar codec: Arrow IPC batches to records.
//!
//! Each wire batch is a self-contained Arrow IPC stream (schema message followed by one or
//! more record batch messages). The embedded schema must match the negotiated wire schema
//! field for field. Every decoded block is converted row by row into the output layout and
//! dropped before the next block is read.
//!
//! Batches come off the network, so the message framing is walked first: every declared
//! metadata and body length must fit in the bytes actually received, and row counts must
//! be plausible for the body size. Only then is the stream handed to the IPC decoder,
//! which reads bodies out of the received buffer instead of allocating them. Malformed
//! metadata that the decoder still trips over is reported as a decode error.

use crate::error::DecodeError;
use crate::record::{Record, Value};
use crate::schema::{FieldType, RowLayout, WireField, WireSchema};
use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Float64Array, Int32Array,
    Int64Array, LargeBinaryArray, LargeStringArray, StringArray, TimestampMicrosecondArray,
};
use arrow::buffer::Buffer;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::ipc::reader::StreamDecoder;
use arrow::ipc::{MessageHeader, root_as_message};
use arrow::record_batch::RecordBatch;
use std::panic::{self, AssertUnwindSafe};

type DecodeResult<T> = Result<T, DecodeError>;

const CONTINUATION_MARKER: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone)]
pub struct ArrowCodec {
    wire_names: Vec<String>,
}

impl ArrowCodec {
    #[must_use]
    pub fn new(schema: &WireSchema) -> Self {
        Self {
            wire_names: schema.field_names().map(str::to_string).collect(),
        }
    }

    /// Decode one IPC stream into records laid out per `layout`.
    ///
    /// # Errors
    /// Returns a [`DecodeError`] for empty, truncated or corrupt streams, a schema that
    /// disagrees with the wire schema, unexpected column types, or nulls in required fields.
    pub fn decode(&self, data: &[u8], layout: &RowLayout) -> DecodeResult<Vec<Record>> {
        if data.is_empty() {
            return Err(DecodeError::new("empty arrow batch").at(0));
        }
        check_framing(data)?;
        panic::catch_unwind(AssertUnwindSafe(|| self.decode_stream(data, layout)))
            .unwrap_or_else(|_| Err(DecodeError::new("corrupt arrow stream metadata").at(0)))
    }

    fn decode_stream(&self, data: &[u8], layout: &RowLayout) -> DecodeResult<Vec<Record>> {
        let mut buffer = Buffer::from_slice_ref(data);
        let mut decoder = StreamDecoder::new();
        let mut schema_checked = false;
        let mut records = Vec::new();
        let mut block_index = 0usize;

        while !buffer.is_empty() {
            let position = (data.len() - buffer.len()) as u64;
            let block = decoder.decode(&mut buffer).map_err(|e| {
                DecodeError::new(format!("corrupt arrow block {block_index}: {e}")).at(position)
            })?;
            if !schema_checked {
                if let Some(schema) = decoder.schema() {
                    self.check_schema(&schema)?;
                    schema_checked = true;
                }
            }
            if let Some(block) = block {
                append_rows(&block, layout, &mut records)?;
                block_index += 1;
            }
        }
        decoder
            .finish()
            .map_err(|e| DecodeError::new(format!("truncated arrow stream: {e}")).at(data.len() as u64))?;
        if !schema_checked {
            return Err(DecodeError::new("arrow stream carries no schema message").at(0));
        }
        Ok(records)
    }

    fn check_schema(&self, schema: &Schema) -> DecodeResult<()> {
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        if names.len() != self.wire_names.len()
            || names.iter().zip(&self.wire_names).any(|(a, b)| *a != b.as_str())
        {
            return Err(DecodeError::new(format!(
                "arrow batch fields [{}] do not match the wire schema [{}]",
                names.join(", "),
                self.wire_names.join(", ")
            )));
        }
        Ok(())
    }
}

/// Walk the encapsulated messages of an IPC stream without decoding them.
///
/// Every message must fit in `data`. Record batch messages must be uncompressed and may not
/// claim more rows than their body has bits. Nothing may follow the end-of-stream marker.
fn check_framing(data: &[u8]) -> DecodeResult<()> {
    let mut pos = 0usize;
    let mut index = 0usize;
    while pos < data.len() {
        let start = pos as u64;
        let mut prefix = read_u32(data, &mut pos)?;
        if prefix == CONTINUATION_MARKER {
            prefix = read_u32(data, &mut pos)?;
        }
        if prefix == 0 {
            if pos != data.len() {
                return Err(DecodeError::new(format!(
                    "{} bytes follow the end of the arrow stream",
                    data.len() - pos
                ))
                .at(pos as u64));
            }
            return Ok(());
        }

        let metadata_len = prefix as usize;
        let remaining = data.len() - pos;
        if metadata_len > remaining {
            return Err(DecodeError::new(format!(
                "arrow message {index} declares {metadata_len} metadata bytes, {remaining} remain"
            ))
            .at(start));
        }
        let message = root_as_message(&data[pos..pos + metadata_len]).map_err(|e| {
            DecodeError::new(format!("invalid arrow message {index}: {e}")).at(start)
        })?;
        pos += metadata_len;

        let remaining = data.len() - pos;
        let body_len = usize::try_from(message.bodyLength())
            .ok()
            .filter(|len| *len <= remaining)
            .ok_or_else(|| {
                DecodeError::new(format!(
                    "arrow message {index} declares a body of {} bytes, {remaining} remain",
                    message.bodyLength()
                ))
                .at(start)
            })?;

        match message.header_type() {
            MessageHeader::Schema | MessageHeader::NONE => {}
            MessageHeader::RecordBatch => {
                let Some(batch) = message.header_as_record_batch() else {
                    return Err(DecodeError::new(format!("arrow message {index} has no batch header")).at(start));
                };
                if batch.compression().is_some() {
                    return Err(DecodeError::new("compressed arrow batches are not supported").at(start));
                }
                let max_rows = i64::try_from(body_len).unwrap_or(i64::MAX).saturating_mul(8);
                let plausible = |n: i64| (0..=max_rows).contains(&n);
                let nodes_plausible = batch
                    .nodes()
                    .is_none_or(|nodes| nodes.iter().all(|n| plausible(n.length()) && plausible(n.null_count())));
                if !plausible(batch.length()) || !nodes_plausible {
                    return Err(DecodeError::new(format!(
                        "arrow message {index} claims more rows than its {body_len} byte body holds"
                    ))
                    .at(start));
                }
            }
            other => {
                return Err(DecodeError::new(format!("unsupported arrow message {other:?}")).at(start));
            }
        }
        pos += body_len;
        index += 1;
    }
    Ok(())
}

fn read_u32(data: &[u8], pos: &mut usize) -> DecodeResult<u32> {
    let bytes = data
        .get(*pos..*pos + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .ok_or_else(|| DecodeError::new("truncated arrow message prefix").at(*pos as u64))?;
    *pos += 4;
    Ok(u32::from_le_bytes(bytes))
}

/// The Arrow schema a batch for `schema` is expected to carry.
#[must_use]
pub fn to_arrow_schema(schema: &WireSchema) -> Schema {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| Field::new(&f.name, arrow_type(f.field_type), f.nullable))
        .collect();
    Schema::new(fields)
}

#[must_use]
pub fn arrow_type(field_type: FieldType) -> DataType {
    match field_type {
        FieldType::Boolean => DataType::Boolean,
        FieldType::Int64 => DataType::Int64,
        FieldType::Float64 => DataType::Float64,
        FieldType::String => DataType::Utf8,
        FieldType::Bytes => DataType::Binary,
        FieldType::Date => DataType::Date32,
        FieldType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

fn append_rows(block: &RecordBatch, layout: &RowLayout, out: &mut Vec<Record>) -> DecodeResult<()> {
    let columns = layout
        .fields()
        .iter()
        .enumerate()
        .map(|(pos, field)| {
            let array = block.column(layout.wire_index(pos));
            Column::bind(array, field).map(|c| (c, field))
        })
        .collect::<DecodeResult<Vec<_>>>()?;

    out.reserve(block.num_rows());
    for row in 0..block.num_rows() {
        let record = columns
            .iter()
            .map(|(column, field)| column.value(row, field))
            .collect::<DecodeResult<Record>>()?;
        out.push(record);
    }
    Ok(())
}

enum Column<'a> {
    Boolean(&'a BooleanArray),
    Int64(&'a Int64Array),
    Int32(&'a Int32Array),
    Float64(&'a Float64Array),
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
    Binary(&'a BinaryArray),
    LargeBinary(&'a LargeBinaryArray),
    Date32(&'a Date32Array),
    TimestampMicros(&'a TimestampMicrosecondArray),
}

impl<'a> Column<'a> {
    fn bind(array: &'a ArrayRef, field: &WireField) -> DecodeResult<Self> {
        let column = match (field.field_type, array.data_type()) {
            (FieldType::Boolean, DataType::Boolean) => Column::Boolean(downcast(array, field)?),
            (FieldType::Int64, DataType::Int64) => Column::Int64(downcast(array, field)?),
            (FieldType::Int64, DataType::Int32) => Column::Int32(downcast(array, field)?),
            (FieldType::Float64, DataType::Float64) => Column::Float64(downcast(array, field)?),
            (FieldType::String, DataType::Utf8) => Column::Utf8(downcast(array, field)?),
            (FieldType::String, DataType::LargeUtf8) => Column::LargeUtf8(downcast(array, field)?),
            (FieldType::Bytes, DataType::Binary) => Column::Binary(downcast(array, field)?),
            (FieldType::Bytes, DataType::LargeBinary) => {
                Column::LargeBinary(downcast(array, field)?)
            }
            (FieldType::Date, DataType::Date32) => Column::Date32(downcast(array, field)?),
            (FieldType::Timestamp, DataType::Timestamp(TimeUnit::Microsecond, _)) => {
                Column::TimestampMicros(downcast(array, field)?)
            }
            (declared, actual) => {
                return Err(DecodeError::new(format!(
                    "field `{}` is declared {declared:?} but the batch carries {actual}",
                    field.name
                )));
            }
        };
        Ok(column)
    }

    fn array(&self) -> &dyn Array {
        match self {
            Column::Boolean(a) => *a,
            Column::Int64(a) => *a,
            Column::Int32(a) => *a,
            Column::Float64(a) => *a,
            Column::Utf8(a) => *a,
            Column::LargeUtf8(a) => *a,
            Column::Binary(a) => *a,
            Column::LargeBinary(a) => *a,
            Column::Date32(a) => *a,
            Column::TimestampMicros(a) => *a,
        }
    }

    fn value(&self, row: usize, field: &WireField) -> DecodeResult<Value> {
        if self.array().is_null(row) {
            if !field.nullable {
                return Err(DecodeError::new(format!(
                    "null in required field `{}` at row {row}",
                    field.name
                )));
            }
            return Ok(Value::Null);
        }
        Ok(match self {
            Column::Boolean(a) => Value::Boolean(a.value(row)),
            Column::Int64(a) => Value::Int64(a.value(row)),
            Column::Int32(a) => Value::Int64(i64::from(a.value(row))),
            Column::Float64(a) => Value::Float64(a.value(row)),
            Column::Utf8(a) => Value::String(a.value(row).to_string()),
            Column::LargeUtf8(a) => Value::String(a.value(row).to_string()),
            Column::Binary(a) => Value::Bytes(a.value(row).to_vec()),
            Column::LargeBinary(a) => Value::Bytes(a.value(row).to_vec()),
            Column::Date32(a) => Value::Date(a.value(row)),
            Column::TimestampMicros(a) => Value::Timestamp(a.value(row)),
        })
    }
}

fn downcast<'a, T: Array + 'static>(array: &'a ArrayRef, field: &WireField) -> DecodeResult<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        DecodeError::new(format!(
            "column for `{}` has an unexpected physical layout",
            field.name
        ))
    })
}
