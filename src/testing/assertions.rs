//! Assertion functions for emitted records.

use crate::record::{Record, Value};

/// The first value of each record as an id. Records whose first value is not an integer
/// map to `None`.
#[must_use]
pub fn record_ids(records: &[Record]) -> Vec<Option<i64>> {
    records
        .iter()
        .map(|r| r.get(0).and_then(Value::as_i64))
        .collect()
}

/// Assert that two record lists are equal in order and content.
///
/// # Panics
///
/// Panics if the lists differ in length or content.
pub fn assert_records_equal(actual: &[Record], expected: &[Record]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Record count mismatch:\n  Expected: {}\n  Actual: {}\n  Actual ids: {:?}",
        expected.len(),
        actual.len(),
        record_ids(actual)
    );
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(a, e, "Record mismatch at index {i}:\n  Expected: {e:?}\n  Actual: {a:?}");
    }
}

/// Assert that the records carry exactly `expected` ids, in order.
///
/// # Panics
///
/// Panics if any record's first value differs from the expected id.
///
/// # Example
///
/// ```
/// use splitflow::testing::{assert_ids, id_rows};
///
/// assert_ids(&id_rows(3, 2), &[3, 4]);
/// ```
pub fn assert_ids(records: &[Record], expected: &[i64]) {
    let actual = record_ids(records);
    let expected: Vec<Option<i64>> = expected.iter().copied().map(Some).collect();
    assert_eq!(actual, expected, "Record ids differ");
}

/// Assert that no id appears twice across `records`.
///
/// # Panics
///
/// Panics on the first duplicated id.
pub fn assert_unique_ids(records: &[Record]) {
    let mut seen = std::collections::HashSet::new();
    for id in record_ids(records) {
        assert!(seen.insert(id), "Duplicate record id {id:?}");
    }
}
