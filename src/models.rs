//! Core data models that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A scalar metadata value attached to a [`Document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Int(v as i64)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A unit of source text: one PDF page, or one chunk of a page.
///
/// Chunks are Documents whose content is bounded by the configured
/// `chunk_size`; they carry their page's metadata plus `chunk_index` and
/// `start_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "page_content")]
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }

    /// Integer metadata lookup (e.g. `page`, `chunk_index`).
    pub fn meta_int(&self, key: &str) -> Option<i64> {
        match self.metadata.get(key) {
            Some(MetadataValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Content length in characters.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Outcome of a full ingestion run.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub pages: usize,
    pub chunks: usize,
    pub successful: usize,
    pub failed: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// Whole run, from the credential check to the end of the upload.
    pub elapsed: Duration,
    /// Batch upload phase only.
    pub upload_elapsed: Duration,
}

impl IngestionResult {
    /// True iff every batch was ultimately stored.
    pub fn is_success(&self) -> bool {
        self.failed_batches == 0
    }

    /// Upload time divided by chunk count; zero for an empty run.
    pub fn average_per_chunk(&self) -> Duration {
        if self.chunks == 0 {
            return Duration::ZERO;
        }
        self.upload_elapsed / self.chunks as u32
    }
}
