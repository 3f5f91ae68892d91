//! Wire schema, field projection and the output row layout.
//!
//! The session negotiator hands the engine a [`WireSchema`]: the physical field order of
//! every decoded batch. Callers ask for fields in their own order. [`FieldProjection`]
//! reconciles the two once, before any split is read, and [`RowLayout`] bakes the result
//! into the target layout the codecs fill.

use crate::error::{IngestionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Logical type of a wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Int64,
    Float64,
    String,
    Bytes,
    /// Days since the Unix epoch.
    Date,
    /// Microseconds since the Unix epoch, UTC.
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl WireField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Ordered `(name, type)` pairs describing decoded batches. Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireSchema {
    fields: Vec<WireField>,
}

impl WireSchema {
    #[must_use]
    pub fn new(fields: Vec<WireField>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn fields(&self) -> &[WireField] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, index: usize) -> Option<&WireField> {
        self.fields.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Position of the field called `name`, if there is exactly one.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let mut hits = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name == name)
            .map(|(i, _)| i);
        match (hits.next(), hits.next()) {
            (Some(i), None) => Some(i),
            _ => None,
        }
    }

    /// Reject empty schemas and duplicate field names.
    ///
    /// # Errors
    /// Returns [`IngestionError::Configuration`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(IngestionError::configuration("wire schema has no fields"));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(IngestionError::configuration("wire schema has an unnamed field"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(IngestionError::configuration(format!(
                    "wire schema declares field `{}` more than once",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

/// Maps each requested output position to its wire position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldProjection {
    wire_indices: Vec<usize>,
}

impl FieldProjection {
    /// Resolve `requested` field names against `schema`.
    ///
    /// An empty request selects every wire field in wire order.
    ///
    /// # Errors
    /// Every requested field must match exactly one wire field, and may be requested once.
    pub fn resolve(requested: &[String], schema: &WireSchema) -> Result<Self> {
        if requested.is_empty() {
            return Ok(Self {
                wire_indices: (0..schema.len()).collect(),
            });
        }

        let mut seen = HashSet::new();
        let mut wire_indices = Vec::with_capacity(requested.len());
        for name in requested {
            if !seen.insert(name.as_str()) {
                return Err(IngestionError::configuration(format!(
                    "field `{name}` is requested more than once"
                )));
            }
            let index = schema.index_of(name).ok_or_else(|| {
                IngestionError::configuration(format!(
                    "requested field `{name}` has no unique match in the wire schema [{}]",
                    schema.field_names().collect::<Vec<_>>().join(", ")
                ))
            })?;
            wire_indices.push(index);
        }
        Ok(Self { wire_indices })
    }

    #[must_use]
    pub fn wire_indices(&self) -> &[usize] {
        &self.wire_indices
    }

    /// True when output order already equals wire order over the full schema.
    #[must_use]
    pub fn is_identity(&self, schema: &WireSchema) -> bool {
        self.wire_indices.len() == schema.len()
            && self.wire_indices.iter().enumerate().all(|(i, w)| i == *w)
    }
}

/// The declared output row layout for a run.
///
/// Output position `i` holds `fields()[i]`, read from wire column `wire_index(i)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    fields: Vec<WireField>,
    wire_indices: Vec<usize>,
    wire_width: usize,
}

impl RowLayout {
    /// Validate `schema`, resolve the projection and build the layout.
    ///
    /// # Errors
    /// See [`WireSchema::validate`] and [`FieldProjection::resolve`].
    pub fn resolve(requested: &[String], schema: &WireSchema) -> Result<Self> {
        schema.validate()?;
        let projection = FieldProjection::resolve(requested, schema)?;
        Ok(Self::from_projection(&projection, schema))
    }

    #[must_use]
    pub fn from_projection(projection: &FieldProjection, schema: &WireSchema) -> Self {
        let fields = projection
            .wire_indices()
            .iter()
            .filter_map(|&i| schema.field(i).cloned())
            .collect();
        Self {
            fields,
            wire_indices: projection.wire_indices().to_vec(),
            wire_width: schema.len(),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[WireField] {
        &self.fields
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    #[must_use]
    pub fn wire_index(&self, position: usize) -> usize {
        self.wire_indices[position]
    }

    #[must_use]
    pub fn wire_indices(&self) -> &[usize] {
        &self.wire_indices
    }

    /// Number of fields in the wire schema the layout was resolved against.
    #[must_use]
    pub fn wire_width(&self) -> usize {
        self.wire_width
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
