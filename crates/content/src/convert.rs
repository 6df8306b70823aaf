//! Type converters selected by a content path's extension.

use crate::content::{Content, JSON_MIME};
use crate::error::{ErrorKind, Result};
use cairn_store::{Record, ResultSet};
use exn::ResultExt;
use std::collections::HashMap;
use std::sync::Arc;

/// Serialises a single record.
pub trait RecordConverter: Send + Sync {
    fn convert_record(&self, record: Record) -> Result<Content>;
}

/// Serialises a query result.
pub trait QueryConverter: Send + Sync {
    fn convert_query(&self, results: ResultSet) -> Result<Content>;
}

pub struct JsonConverter;

impl RecordConverter for JsonConverter {
    fn convert_record(&self, record: Record) -> Result<Content> {
        let bytes = serde_json::to_vec(&record).or_raise(|| ErrorKind::UnsupportedType("json".to_string()))?;
        Ok(Content::Data { bytes, mime: JSON_MIME })
    }
}

impl QueryConverter for JsonConverter {
    fn convert_query(&self, results: ResultSet) -> Result<Content> {
        let bytes = serde_json::to_vec(&results).or_raise(|| ErrorKind::UnsupportedType("json".to_string()))?;
        Ok(Content::Data { bytes, mime: JSON_MIME })
    }
}

/// Converters keyed by extension.
#[derive(Clone)]
pub struct Converters {
    records: HashMap<String, Arc<dyn RecordConverter>>,
    queries: HashMap<String, Arc<dyn QueryConverter>>,
}

impl Converters {
    /// A registry with no converters at all.
    pub fn empty() -> Self {
        Self { records: HashMap::new(), queries: HashMap::new() }
    }

    pub fn with_record(mut self, ext: impl Into<String>, converter: Arc<dyn RecordConverter>) -> Self {
        self.records.insert(ext.into(), converter);
        self
    }

    pub fn with_query(mut self, ext: impl Into<String>, converter: Arc<dyn QueryConverter>) -> Self {
        self.queries.insert(ext.into(), converter);
        self
    }

    pub fn record(&self, ext: &str) -> Option<&Arc<dyn RecordConverter>> {
        self.records.get(ext)
    }

    pub fn query(&self, ext: &str) -> Option<&Arc<dyn QueryConverter>> {
        self.queries.get(ext)
    }
}

impl Default for Converters {
    /// JSON for both records and queries.
    fn default() -> Self {
        let json = Arc::new(JsonConverter);
        Self::empty().with_record("json", json.clone()).with_query("json", json)
    }
}
