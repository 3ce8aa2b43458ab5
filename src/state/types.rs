//! Checkpoint types for tracking harvest progress
//!
//! One checkpoint exists per collection. It is created on the first fetch attempt,
//! advanced after every durably persisted page, and marked complete once a page
//! arrives without a next cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable progress record for one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Collection this checkpoint belongs to
    pub collection_id: String,
    /// Cursor of the next page to fetch
    #[serde(default)]
    pub cursor: Option<String>,
    /// Whether a page without next cursor has been persisted
    #[serde(default)]
    pub is_complete: bool,
    /// Last time the row was written (`None` if it was never written)
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Zero-value checkpoint for a collection that was never harvested
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            cursor: None,
            is_complete: false,
            last_updated_at: None,
        }
    }

    /// Build a checkpoint as written now
    pub fn written(
        collection_id: impl Into<String>,
        cursor: Option<&str>,
        is_complete: bool,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            cursor: cursor.map(ToString::to_string),
            is_complete,
            last_updated_at: Some(Utc::now()),
        }
    }

    /// No page has been persisted yet
    pub fn is_fresh(&self) -> bool {
        self.cursor.is_none() && !self.is_complete
    }

    /// Whether the row exists in the store
    pub fn exists(&self) -> bool {
        self.last_updated_at.is_some()
    }
}
