//! Sample data and wire encoders.
//!
//! The encoders are the inverse of the codecs: they produce exactly the bytes a read
//! service would send for a given wire schema.

use crate::client::RawBatch;
use crate::codec::WireFormat;
use crate::record::{Record, Value};
use crate::schema::{FieldType, WireField, WireSchema};
use anyhow::{Result, bail};

/// Three fields: `id` (required int64), `name` (string), `score` (float64).
///
/// # Example
///
/// ```
/// use splitflow::testing::sample_schema;
///
/// let schema = sample_schema();
/// assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["id", "name", "score"]);
/// ```
#[must_use]
pub fn sample_schema() -> WireSchema {
    WireSchema::new(vec![
        WireField::new("id", FieldType::Int64).required(),
        WireField::new("name", FieldType::String),
        WireField::new("score", FieldType::Float64),
    ])
}

/// `count` rows for [`sample_schema`] with ids `start..start + count`.
///
/// Row `i` is `[i, "row-i", i / 2]`; every seventh row has a null score.
#[must_use]
pub fn id_rows(start: i64, count: usize) -> Vec<Record> {
    (start..)
        .take(count)
        .map(|id| {
            #[allow(clippy::cast_precision_loss)]
            let score = if id % 7 == 6 { Value::Null } else { Value::Float64(id as f64 / 2.0) };
            Record::new(vec![Value::Int64(id), Value::String(format!("row-{id}")), score])
        })
        .collect()
}

/// Encode `rows` as one wire batch in `format`.
///
/// # Errors
/// Returns an error if a row does not fit `schema` or the format's feature is disabled.
pub fn encode_batch(format: WireFormat, schema: &WireSchema, rows: &[Record]) -> Result<RawBatch> {
    let data = match format {
        #[cfg(feature = "format-arrow")]
        WireFormat::Arrow => encode_arrow_batch(schema, rows)?,
        #[cfg(feature = "format-avro")]
        WireFormat::Avro => encode_avro_rows(schema, rows)?,
        #[allow(unreachable_patterns)]
        other => bail!("built without the {other} wire format"),
    };
    Ok(RawBatch::new(format, rows.len() as u64, data))
}

/// `batches` consecutive batches of `rows_per_batch` [`id_rows`], starting at `first_id`.
///
/// # Errors
/// Returns an error if encoding fails.
pub fn id_batches(
    format: WireFormat,
    schema: &WireSchema,
    first_id: i64,
    batches: usize,
    rows_per_batch: usize,
) -> Result<Vec<RawBatch>> {
    let per_batch = i64::try_from(rows_per_batch)?;
    (0..batches)
        .map(|b| {
            let start = first_id + i64::try_from(b)? * per_batch;
            encode_batch(format, schema, &id_rows(start, rows_per_batch))
        })
        .collect()
}

fn cell<'a>(row: &'a Record, index: usize, field: &WireField) -> Result<&'a Value> {
    match row.get(index) {
        Some(value) => Ok(value),
        None => bail!("row has {} values, missing field `{}`", row.len(), field.name),
    }
}

// ============================================================================
// Arrow
// ============================================================================

/// Encode `rows` as an Arrow IPC stream with a single record batch.
///
/// # Errors
/// Returns an error if a value does not match its field type or a required field is null.
#[cfg(feature = "format-arrow")]
pub fn encode_arrow_batch(schema: &WireSchema, rows: &[Record]) -> Result<Vec<u8>> {
    encode_arrow_blocks(schema, &[rows])
}

/// Encode several record batches into one Arrow IPC stream.
///
/// # Errors
/// Returns an error if a value does not match its field type or a required field is null.
#[cfg(feature = "format-arrow")]
pub fn encode_arrow_blocks(schema: &WireSchema, blocks: &[&[Record]]) -> Result<Vec<u8>> {
    use arrow::ipc::writer::StreamWriter;
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    let arrow_schema = Arc::new(crate::codec::arrow::to_arrow_schema(schema));
    let mut writer = StreamWriter::try_new(Vec::new(), &arrow_schema)?;
    for rows in blocks {
        let columns = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(index, field)| arrow_column(rows, index, field))
            .collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::try_new(Arc::clone(&arrow_schema), columns)?;
        writer.write(&batch)?;
    }
    writer.finish()?;
    Ok(writer.into_inner()?)
}

#[cfg(feature = "format-arrow")]
fn arrow_column(rows: &[Record], index: usize, field: &WireField) -> Result<arrow::array::ArrayRef> {
    use arrow::array::{
        BinaryArray, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
        TimestampMicrosecondArray,
    };
    use std::sync::Arc;

    fn column<T>(
        rows: &[Record],
        index: usize,
        field: &WireField,
        extract: impl Fn(&Value) -> Option<T>,
    ) -> Result<Vec<Option<T>>> {
        rows.iter()
            .map(|row| match cell(row, index, field)? {
                Value::Null => Ok(None),
                value => match extract(value) {
                    Some(v) => Ok(Some(v)),
                    None => bail!("value {value:?} does not fit {:?} field `{}`", field.field_type, field.name),
                },
            })
            .collect()
    }

    let array: arrow::array::ArrayRef = match field.field_type {
        FieldType::Boolean => Arc::new(BooleanArray::from(column(rows, index, field, |v| match v {
            Value::Boolean(b) => Some(*b),
            _ => None,
        })?)),
        FieldType::Int64 => Arc::new(Int64Array::from(column(rows, index, field, Value::as_i64)?)),
        FieldType::Float64 => Arc::new(Float64Array::from(column(rows, index, field, |v| match v {
            Value::Float64(f) => Some(*f),
            _ => None,
        })?)),
        FieldType::String => Arc::new(StringArray::from(column(rows, index, field, |v| {
            v.as_str().map(str::to_string)
        })?)),
        FieldType::Bytes => Arc::new(BinaryArray::from_iter(column(rows, index, field, |v| match v {
            Value::Bytes(b) => Some(b.clone()),
            _ => None,
        })?)),
        FieldType::Date => Arc::new(Date32Array::from(column(rows, index, field, |v| match v {
            Value::Date(d) => Some(*d),
            _ => None,
        })?)),
        FieldType::Timestamp => Arc::new(TimestampMicrosecondArray::from(column(rows, index, field, |v| match v {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        })?)),
    };
    Ok(array)
}

// ============================================================================
// Avro
// ============================================================================

/// Encode `rows` as consecutive Avro binary datums with no framing.
///
/// # Errors
/// Returns an error if a value does not match its field type or a required field is null.
#[cfg(feature = "format-avro")]
pub fn encode_avro_rows(schema: &WireSchema, rows: &[Record]) -> Result<Vec<u8>> {
    use apache_avro::to_avro_datum;
    use apache_avro::types::Value as AvroValue;

    let avro_schema = crate::codec::avro::to_avro_schema(schema)?;
    let mut out = Vec::new();
    for row in rows {
        let fields = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(index, field)| Ok((field.name.clone(), avro_value(cell(row, index, field)?, field)?)))
            .collect::<Result<Vec<_>>>()?;
        out.extend(to_avro_datum(&avro_schema, AvroValue::Record(fields))?);
    }
    Ok(out)
}

#[cfg(feature = "format-avro")]
fn avro_value(value: &Value, field: &WireField) -> Result<apache_avro::types::Value> {
    use apache_avro::types::Value as AvroValue;

    let inner = match (field.field_type, value) {
        (_, Value::Null) if field.nullable => return Ok(AvroValue::Union(0, Box::new(AvroValue::Null))),
        (_, Value::Null) => bail!("null in required field `{}`", field.name),
        (FieldType::Boolean, Value::Boolean(b)) => AvroValue::Boolean(*b),
        (FieldType::Int64, Value::Int64(v)) => AvroValue::Long(*v),
        (FieldType::Float64, Value::Float64(v)) => AvroValue::Double(*v),
        (FieldType::String, Value::String(s)) => AvroValue::String(s.clone()),
        (FieldType::Bytes, Value::Bytes(b)) => AvroValue::Bytes(b.clone()),
        (FieldType::Date, Value::Date(d)) => AvroValue::Date(*d),
        (FieldType::Timestamp, Value::Timestamp(t)) => AvroValue::TimestampMicros(*t),
        (declared, value) => bail!("value {value:?} does not fit {declared:?} field `{}`", field.name),
    };
    Ok(if field.nullable {
        AvroValue::Union(1, Box::new(inner))
    } else {
        inner
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_rows_are_contiguous() {
        let rows = id_rows(10, 3);
        let ids: Vec<_> = rows.iter().map(|r| r.get(0).and_then(Value::as_i64)).collect();
        assert_eq!(ids, vec![Some(10), Some(11), Some(12)]);
        assert_eq!(rows[0].get(1).and_then(Value::as_str), Some("row-10"));
        assert!(id_rows(6, 1)[0].get(2).is_some_and(Value::is_null));
    }

    #[test]
    fn required_null_is_rejected() {
        let rows = vec![Record::new(vec![Value::Null, Value::Null, Value::Null])];
        assert!(encode_batch(WireFormat::default(), &sample_schema(), &rows).is_err());
    }
}
