//! Decoded page and record types
//!
//! A page response becomes a [`PageResult`]: the ordered records it carried plus the
//! cursor for the next page, if any.

use crate::types::{JsonObject, JsonValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Natural identity of a record: one row per (record id, collection id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Upstream identity of the entity (e.g. a person id)
    pub record_id: String,
    /// Collection the entity was harvested under
    pub collection_id: String,
}

impl RecordKey {
    /// Create a new record key
    pub fn new(record_id: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            collection_id: collection_id.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.record_id, self.collection_id)
    }
}

/// A decoded entity ready for upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Natural key
    pub key: RecordKey,
    /// Extracted scalar columns
    #[serde(default)]
    pub fields: JsonObject,
    /// Full upstream item
    pub payload: JsonValue,
    /// When this version of the record was collected
    pub collected_at: DateTime<Utc>,
}

impl Record {
    /// Create a record collected now
    pub fn new(key: RecordKey, fields: JsonObject, payload: JsonValue) -> Self {
        Self {
            key,
            fields,
            payload,
            collected_at: Utc::now(),
        }
    }

    /// Get an extracted field
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }
}

/// One decoded page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    /// Records in upstream order
    pub records: Vec<Record>,
    /// Cursor for the following page. `None` is the only termination signal.
    pub next_cursor: Option<String>,
    /// Items dropped because they had no natural key
    pub skipped: usize,
}

impl PageResult {
    /// Create a page result
    pub fn new(records: Vec<Record>, next_cursor: Option<String>) -> Self {
        Self {
            records,
            next_cursor,
            skipped: 0,
        }
    }

    /// Whether another page follows. An empty cursor still counts as more pages.
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Number of records on this page
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the page carried no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
