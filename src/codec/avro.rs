//! Row codec: Avro binary rows to records.
//!
//! A row batch is `row_count` Avro datums written back to back with no container framing;
//! the count travels in the response metadata. The reader schema is derived from the wire
//! schema once, at open time. Rows are decoded one after another from a single cursor, so
//! every row is read exactly once and the byte offset of a bad row is known.

use crate::error::{DecodeError, IngestionError};
use crate::record::{Record, Value};
use crate::schema::{FieldType, RowLayout, WireField, WireSchema};
use apache_avro::types::Value as AvroValue;
use apache_avro::{Schema as AvroSchema, from_avro_datum};
use serde_json::json;
use std::io::Cursor;

type DecodeResult<T> = Result<T, DecodeError>;

/// Record name used for the row schema derived from a wire schema.
pub const ROW_RECORD_NAME: &str = "__root__";

#[derive(Debug, Clone)]
pub struct AvroCodec {
    schema: AvroSchema,
    wire_width: usize,
}

impl AvroCodec {
    /// # Errors
    /// Returns [`IngestionError::Configuration`] if the wire schema is not a valid Avro
    /// record (for example, a field name Avro does not accept).
    pub fn new(schema: &WireSchema) -> Result<Self, IngestionError> {
        Ok(Self {
            schema: to_avro_schema(schema)?,
            wire_width: schema.len(),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &AvroSchema {
        &self.schema
    }

    /// Decode `row_count` consecutive datums from `data`.
    ///
    /// # Errors
    /// Returns a [`DecodeError`] with the byte offset of the failing row when a datum is
    /// malformed, the data runs out before `row_count` rows, or bytes are left over.
    pub fn decode(&self, data: &[u8], row_count: u64, layout: &RowLayout) -> DecodeResult<Vec<Record>> {
        let capacity = usize::try_from(row_count).unwrap_or(usize::MAX).min(data.len());
        let mut records = Vec::with_capacity(capacity);
        let mut cursor = Cursor::new(data);

        for row in 0..row_count {
            let start = cursor.position();
            if start >= data.len() as u64 {
                return Err(DecodeError::new(format!(
                    "batch declares {row_count} rows but ends after {row}"
                ))
                .at(start));
            }
            let datum = from_avro_datum(&self.schema, &mut cursor, None)
                .map_err(|e| DecodeError::new(format!("row {row}: {e}")).at(start))?;
            let record = self
                .to_record(datum, layout)
                .map_err(|e| DecodeError::new(format!("row {row}: {}", e.message)).at(start))?;
            records.push(record);
        }

        let end = cursor.position();
        if end != data.len() as u64 {
            return Err(DecodeError::new(format!(
                "{} trailing byte(s) after {row_count} rows",
                data.len() as u64 - end
            ))
            .at(end));
        }
        Ok(records)
    }

    fn to_record(&self, datum: AvroValue, layout: &RowLayout) -> DecodeResult<Record> {
        let AvroValue::Record(fields) = datum else {
            return Err(DecodeError::new("datum is not a record"));
        };
        if fields.len() != self.wire_width {
            return Err(DecodeError::new(format!(
                "datum has {} fields, wire schema has {}",
                fields.len(),
                self.wire_width
            )));
        }

        let mut cells: Vec<Option<AvroValue>> = fields.into_iter().map(|(_, v)| Some(v)).collect();
        layout
            .fields()
            .iter()
            .enumerate()
            .map(|(pos, field)| {
                let cell = cells[layout.wire_index(pos)].take().ok_or_else(|| {
                    DecodeError::new(format!("field `{}` projected twice", field.name))
                })?;
                convert(cell, field)
            })
            .collect()
    }
}

/// Build the Avro record schema matching `schema`. Nullable fields become
/// `["null", T]` unions.
///
/// # Errors
/// Returns [`IngestionError::Configuration`] if Avro rejects the schema.
pub fn to_avro_schema(schema: &WireSchema) -> Result<AvroSchema, IngestionError> {
    let fields: Vec<serde_json::Value> = schema
        .fields()
        .iter()
        .map(|f| {
            let ty = avro_type(f.field_type);
            let ty = if f.nullable { json!(["null", ty]) } else { ty };
            json!({ "name": f.name, "type": ty })
        })
        .collect();
    let record = json!({
        "type": "record",
        "name": ROW_RECORD_NAME,
        "fields": fields,
    });
    AvroSchema::parse_str(&record.to_string())
        .map_err(|e| IngestionError::configuration(format!("wire schema is not valid avro: {e}")))
}

fn avro_type(field_type: FieldType) -> serde_json::Value {
    match field_type {
        FieldType::Boolean => json!("boolean"),
        FieldType::Int64 => json!("long"),
        FieldType::Float64 => json!("double"),
        FieldType::String => json!("string"),
        FieldType::Bytes => json!("bytes"),
        FieldType::Date => json!({ "type": "int", "logicalType": "date" }),
        FieldType::Timestamp => json!({ "type": "long", "logicalType": "timestamp-micros" }),
    }
}

fn convert(value: AvroValue, field: &WireField) -> DecodeResult<Value> {
    let value = match value {
        AvroValue::Union(_, inner) => *inner,
        other => other,
    };
    let converted = match (field.field_type, value) {
        (_, AvroValue::Null) if field.nullable => Value::Null,
        (_, AvroValue::Null) => {
            return Err(DecodeError::new(format!("null in required field `{}`", field.name)));
        }
        (FieldType::Boolean, AvroValue::Boolean(b)) => Value::Boolean(b),
        (FieldType::Int64, AvroValue::Long(v)) => Value::Int64(v),
        (FieldType::Int64, AvroValue::Int(v)) => Value::Int64(i64::from(v)),
        (FieldType::Float64, AvroValue::Double(v)) => Value::Float64(v),
        (FieldType::Float64, AvroValue::Float(v)) => Value::Float64(f64::from(v)),
        (FieldType::String, AvroValue::String(s) | AvroValue::Enum(_, s)) => Value::String(s),
        (FieldType::Bytes, AvroValue::Bytes(b) | AvroValue::Fixed(_, b)) => Value::Bytes(b),
        (FieldType::Date, AvroValue::Date(d) | AvroValue::Int(d)) => Value::Date(d),
        (FieldType::Timestamp, AvroValue::TimestampMicros(t) | AvroValue::Long(t)) => {
            Value::Timestamp(t)
        }
        (FieldType::Timestamp, AvroValue::TimestampMillis(t)) => Value::Timestamp(t.saturating_mul(1000)),
        (declared, other) => {
            return Err(DecodeError::new(format!(
                "field `{}` is declared {declared:?} but the row carries {other:?}",
                field.name
            )));
        }
    };
    Ok(converted)
}
