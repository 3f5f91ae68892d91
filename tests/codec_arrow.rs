//! Tests for the columnar (Arrow IPC) codec.
#![cfg(feature = "format-arrow")]

use anyhow::Result;
use splitflow::client::RawBatch;
use splitflow::codec::{Codec, WireFormat};
use splitflow::record::{Record, Value};
use splitflow::schema::{FieldType, RowLayout, WireField, WireSchema};
use splitflow::testing::{
    assert_ids, assert_records_equal, encode_arrow_batch, encode_arrow_blocks, id_rows,
    sample_schema,
};

fn decode(schema: &WireSchema, selected: &[&str], data: Vec<u8>, rows: u64) -> Result<Vec<Record>> {
    let selected: Vec<String> = selected.iter().map(|s| (*s).to_string()).collect();
    let layout = RowLayout::resolve(&selected, schema)?;
    let codec = Codec::for_format(WireFormat::Arrow, schema)?;
    Ok(codec.decode(&RawBatch::new(WireFormat::Arrow, rows, data), &layout)?)
}

#[test]
fn test_round_trip_all_fields() -> Result<()> {
    let schema = sample_schema();
    let rows = id_rows(0, 20);
    let records = decode(&schema, &[], encode_arrow_batch(&schema, &rows)?, 20)?;
    assert_records_equal(&records, &rows);
    Ok(())
}

#[test]
fn test_projection_reorders_and_drops_fields() -> Result<()> {
    let schema = sample_schema();
    let rows = id_rows(5, 3);
    let records = decode(&schema, &["score", "id"], encode_arrow_batch(&schema, &rows)?, 3)?;
    assert_eq!(
        records[0].values(),
        &[Value::Float64(2.5), Value::Int64(5)]
    );
    // Row 6 carries a null score.
    assert_eq!(records[1].values(), &[Value::Null, Value::Int64(6)]);
    Ok(())
}

#[test]
fn test_multiple_blocks_keep_wire_order() -> Result<()> {
    let schema = sample_schema();
    let first = id_rows(0, 4);
    let second = id_rows(4, 3);
    let data = encode_arrow_blocks(&schema, &[first.as_slice(), second.as_slice()])?;
    let records = decode(&schema, &[], data, 7)?;
    assert_ids(&records, &[0, 1, 2, 3, 4, 5, 6]);
    Ok(())
}

#[test]
fn test_row_count_must_match_metadata() -> Result<()> {
    let schema = sample_schema();
    let err = decode(&schema, &[], encode_arrow_batch(&schema, &id_rows(0, 4))?, 5).unwrap_err();
    assert!(err.to_string().contains("declares 5 rows"), "{err}");
    Ok(())
}

#[test]
fn test_every_field_type() -> Result<()> {
    let schema = WireSchema::new(vec![
        WireField::new("flag", FieldType::Boolean),
        WireField::new("n", FieldType::Int64),
        WireField::new("x", FieldType::Float64),
        WireField::new("s", FieldType::String),
        WireField::new("b", FieldType::Bytes),
        WireField::new("d", FieldType::Date),
        WireField::new("ts", FieldType::Timestamp),
    ]);
    let rows = vec![
        Record::new(vec![
            Value::Boolean(true),
            Value::Int64(-3),
            Value::Float64(1.25),
            Value::String("héllo".to_string()),
            Value::Bytes(vec![0, 255, 7]),
            Value::Date(19_000),
            Value::Timestamp(1_700_000_000_000_000),
        ]),
        Record::new(vec![Value::Null; 7]),
    ];
    let records = decode(&schema, &[], encode_arrow_batch(&schema, &rows)?, 2)?;
    assert_records_equal(&records, &rows);
    Ok(())
}

#[test]
fn test_empty_batch_is_a_decode_error() -> Result<()> {
    let err = decode(&sample_schema(), &[], Vec::new(), 0).unwrap_err();
    let err = err.downcast::<splitflow::error::DecodeError>()?;
    assert_eq!(err.offset, Some(0));
    Ok(())
}

#[test]
fn test_truncated_stream_is_a_decode_error() -> Result<()> {
    let schema = sample_schema();
    let mut data = encode_arrow_batch(&schema, &id_rows(0, 50))?;
    data.truncate(data.len() / 2);
    assert!(decode(&schema, &[], data, 50).is_err());
    Ok(())
}

#[test]
fn test_corrupted_bytes_are_decode_errors_not_panics() -> Result<()> {
    let schema = sample_schema();
    let layout = RowLayout::resolve(&[], &schema)?;
    let codec = Codec::for_format(WireFormat::Arrow, &schema)?;
    let clean = encode_arrow_batch(&schema, &id_rows(0, 10))?;

    for pos in 0..clean.len() {
        for byte in [0x00, 0xff, 0x7f] {
            let mut data = clean.clone();
            data[pos] = byte;
            // A flipped value byte may still decode; anything else must come back as an error.
            if let Ok(records) = codec.decode(&RawBatch::new(WireFormat::Arrow, 10, data), &layout) {
                assert_eq!(records.len(), 10, "byte {pos} set to {byte:#x}");
            }
        }
    }
    Ok(())
}

#[test]
fn test_every_truncation_is_a_decode_error() -> Result<()> {
    let schema = sample_schema();
    let layout = RowLayout::resolve(&[], &schema)?;
    let codec = Codec::for_format(WireFormat::Arrow, &schema)?;
    let clean = encode_arrow_batch(&schema, &id_rows(0, 10))?;

    // The last eight bytes are the end-of-stream marker; every shorter cut loses rows.
    for len in 0..clean.len() - 8 {
        let batch = RawBatch::new(WireFormat::Arrow, 10, clean[..len].to_vec());
        assert!(codec.decode(&batch, &layout).is_err(), "cut at {len} bytes decoded");
    }
    Ok(())
}

#[test]
fn test_oversized_body_length_is_rejected_before_reading() -> Result<()> {
    let schema = sample_schema();
    let mut data = encode_arrow_batch(&schema, &id_rows(0, 10))?;
    // Append a record batch message whose header claims a body far beyond the buffer.
    data.truncate(data.len() - 8);
    let tail = encode_arrow_batch(&schema, &id_rows(10, 1))?;
    let schema_len = 8 + u32::from_le_bytes(tail[4..8].try_into()?) as usize;
    let mut batch_message = tail[schema_len..tail.len() - 8].to_vec();
    let body_len = batch_message.len() - 8 - u32::from_le_bytes(batch_message[4..8].try_into()?) as usize;
    batch_message.truncate(batch_message.len() - body_len);
    data.extend_from_slice(&batch_message);

    let err = decode(&schema, &[], data, 11).unwrap_err();
    let err = err.downcast::<splitflow::error::DecodeError>()?;
    assert!(err.message.contains("declares a body"), "{err}");
    Ok(())
}

#[test]
fn test_garbage_header_is_a_decode_error() {
    let result = decode(&sample_schema(), &[], vec![0xde, 0xad, 0xbe, 0xef, 1, 2, 3], 1);
    assert!(result.is_err());
}

#[test]
fn test_schema_mismatch_is_rejected() -> Result<()> {
    let other = WireSchema::new(vec![WireField::new("id", FieldType::Int64)]);
    let data = encode_arrow_batch(&other, &[Record::new(vec![Value::Int64(1)])])?;
    let err = decode(&sample_schema(), &[], data, 1).unwrap_err();
    assert!(err.to_string().contains("do not match"), "{err}");
    Ok(())
}

#[test]
fn test_wrong_format_batch_is_rejected() -> Result<()> {
    let schema = sample_schema();
    let layout = RowLayout::resolve(&[], &schema)?;
    let codec = Codec::for_format(WireFormat::Arrow, &schema)?;
    let batch = RawBatch::new(WireFormat::Avro, 1, vec![2, 0]);
    assert!(codec.decode(&batch, &layout).is_err());
    Ok(())
}
