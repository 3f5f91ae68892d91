//! Run configuration.
//!
//! - [`ReadOptions`] - the per-split retry/read policy handed to every split reader
//! - [`RetryBackoff`] - delay schedule between retries
//! - [`EngineConfig`] - worker count, sink channel capacity and read options
//! - [`ResolvedReadRequest`] - the already-resolved read request produced upstream,
//!   deserializable from JSON with the connector's option names
//!
//! ```
//! use splitflow::config::ResolvedReadRequest;
//!
//! let request = ResolvedReadRequest::from_json_str(r#"{
//!     "table": "bigquery-public-data.samples.shakespeare",
//!     "selectedFields": "word,word_count,",
//!     "parallelism": 4,
//!     "format": "avro"
//! }"#).unwrap();
//! assert_eq!(request.selected_fields, vec!["word", "word_count"]);
//! assert_eq!(request.engine_config().parallelism, 4);
//! ```

use crate::codec::WireFormat;
use crate::error::{IngestionError, Result};
use crate::schema::WireSchema;
use crate::split::SplitId;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Read Options
// ============================================================================

/// Delay schedule between read retries (exponential, capped).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryBackoff {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            multiplier: 2.0,
        }
    }
}

impl RetryBackoff {
    /// No delay between retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(millis)
    }
}

/// Retry policy and read hints for one split reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadOptions {
    /// Retries allowed per split after the first attempt.
    pub max_read_rows_retries: u32,
    /// Upper bound on a single blocking read call.
    pub attempt_timeout_ms: Option<u64>,
    pub background_parsing_threads: usize,
    pub prefetch_responses: usize,
    pub endpoint: Option<String>,
    pub backoff: RetryBackoff,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_read_rows_retries: 5,
            attempt_timeout_ms: None,
            background_parsing_threads: 5,
            prefetch_responses: 1,
            endpoint: None,
            backoff: RetryBackoff::default(),
        }
    }
}

impl ReadOptions {
    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_read_rows_retries = retries;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

// ============================================================================
// Engine Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Number of parallel workers (one per output partition).
    pub parallelism: usize,
    /// Capacity of the bounded channel used by [`OpenedEngine::spawn`](crate::engine::OpenedEngine::spawn).
    pub channel_capacity: usize,
    pub read: ReadOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            channel_capacity: 1024,
            read: ReadOptions::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_read_options(mut self, read: ReadOptions) -> Self {
        self.read = read;
        self
    }

    /// # Errors
    /// Parallelism and channel capacity must be at least one.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(IngestionError::configuration("parallelism must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(IngestionError::configuration("channel capacity must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Resolved Read Request
// ============================================================================

/// Fully qualified table identity, `[project.]dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableId {
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    /// # Errors
    /// Returns [`IngestionError::Configuration`] unless `name` has two or three
    /// non-empty dot-separated parts.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(IngestionError::configuration(format!("invalid table `{name}`")));
        }
        match parts.as_slice() {
            [dataset, table] => Ok(Self {
                project: None,
                dataset: (*dataset).to_string(),
                table: (*table).to_string(),
            }),
            [project, dataset, table] => Ok(Self {
                project: Some((*project).to_string()),
                dataset: (*dataset).to_string(),
                table: (*table).to_string(),
            }),
            _ => Err(IngestionError::configuration(format!(
                "invalid table `{name}`, expected [project.]dataset.table"
            ))),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldList {
    Csv(String),
    List(Vec<String>),
}

fn field_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let fields = match FieldList::deserialize(deserializer)? {
        FieldList::Csv(s) => s.split(',').map(str::to_string).collect(),
        FieldList::List(v) => v,
    };
    Ok(fields
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect())
}

/// The read request as resolved by the configuration layer.
///
/// Keys follow the connector's option names (`selectedFields`, `materializationProject`, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolvedReadRequest {
    pub parent_project: Option<String>,
    pub table: Option<String>,
    pub query: Option<String>,
    /// Row filter, already validated upstream; passed through untouched.
    pub filter: Option<String>,
    #[serde(deserialize_with = "field_list")]
    pub selected_fields: Vec<String>,
    pub parallelism: usize,
    pub max_parallelism: Option<usize>,
    pub materialization_project: Option<String>,
    pub materialization_dataset: Option<String>,
    /// Opaque credentials handle (a key file path or similar).
    pub credentials_file: Option<String>,
    pub format: WireFormat,
    pub channel_capacity: usize,
    pub read: ReadOptions,
}

impl Default for ResolvedReadRequest {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            parent_project: None,
            table: None,
            query: None,
            filter: None,
            selected_fields: Vec::new(),
            parallelism: engine.parallelism,
            max_parallelism: None,
            materialization_project: None,
            materialization_dataset: None,
            credentials_file: None,
            format: WireFormat::default(),
            channel_capacity: engine.channel_capacity,
            read: engine.read,
        }
    }
}

impl ResolvedReadRequest {
    /// Parse and validate a request from JSON.
    ///
    /// # Errors
    /// Returns [`IngestionError::Configuration`] on malformed JSON or a request that fails
    /// [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(json)
            .map_err(|e| IngestionError::configuration(format!("malformed read request: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    /// Check the request is internally consistent.
    ///
    /// A table read needs `selectedFields`; a query read needs a materialization project
    /// and dataset; exactly one of the two must be given.
    ///
    /// # Errors
    /// Returns [`IngestionError::Configuration`] listing what is missing or wrong.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        match (&self.table, &self.query) {
            (Some(_), Some(_)) => {
                return Err(IngestionError::configuration(
                    "`table` and `query` are mutually exclusive",
                ));
            }
            (None, None) => missing.push("table or query"),
            (Some(table), None) => {
                TableId::parse(table)?;
                if self.selected_fields.is_empty() {
                    missing.push("selectedFields");
                }
            }
            (None, Some(_)) => {
                if self.materialization_project.is_none() {
                    missing.push("materializationProject");
                }
                if self.materialization_dataset.is_none() {
                    missing.push("materializationDataset");
                }
            }
        }
        if !missing.is_empty() {
            return Err(IngestionError::configuration(format!(
                "missing required options: {}",
                missing.join(", ")
            )));
        }
        if self.parallelism == 0 {
            return Err(IngestionError::configuration("parallelism must be at least 1"));
        }
        if let Some(max) = self.max_parallelism {
            if self.parallelism > max {
                return Err(IngestionError::configuration(format!(
                    "parallelism {} exceeds maxParallelism {max}",
                    self.parallelism
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        self.table.as_deref().and_then(|t| TableId::parse(t).ok())
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            parallelism: self.parallelism,
            channel_capacity: self.channel_capacity,
            read: self.read.clone(),
        }
    }

    /// Check a negotiated session against this request before the engine opens.
    ///
    /// # Errors
    /// The session must use the requested wire format and carry unique, non-empty split
    /// names and a valid wire schema.
    pub fn verify_session(&self, format: WireFormat, splits: &[SplitId], schema: &WireSchema) -> Result<()> {
        if format != self.format {
            return Err(IngestionError::configuration(format!(
                "session negotiated {format} but the request asked for {}",
                self.format
            )));
        }
        crate::engine::validate_splits(splits)?;
        schema.validate()
    }
}

/// Load and validate a [`ResolvedReadRequest`] from a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read, is not valid JSON, or fails validation.
pub fn load_request(path: impl AsRef<Path>) -> anyhow::Result<ResolvedReadRequest> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let request = ResolvedReadRequest::from_json_str(&text)
        .with_context(|| format!("parse read request {}", path.display()))?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let b = RetryBackoff {
            initial_delay_ms: 100,
            max_delay_ms: 350,
            multiplier: 2.0,
        };
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(350));
        assert_eq!(RetryBackoff::none().delay(4), Duration::ZERO);
    }

    #[test]
    fn table_id_forms() {
        let t = TableId::parse("bigquery-public-data.samples.shakespeare").unwrap();
        assert_eq!(t.project.as_deref(), Some("bigquery-public-data"));
        assert_eq!(t.dataset, "samples");
        assert_eq!(t.table, "shakespeare");
        assert!(TableId::parse("dataset.table").unwrap().project.is_none());
        assert!(TableId::parse("table").is_err());
        assert!(TableId::parse("a..b").is_err());
    }
}
