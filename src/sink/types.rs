//! Sink trait and result types

use crate::decode::{Record, RecordKey};
use crate::error::Result;
use async_trait::async_trait;

/// Outcome of one upsert call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Keys that did not exist before
    pub inserted: usize,
    /// Keys whose row was overwritten
    pub updated: usize,
}

impl UpsertSummary {
    /// Total rows written
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }

    /// Add another summary
    pub fn merge(&mut self, other: UpsertSummary) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Durable record storage written only through upserts
///
/// When `upsert` returns `Ok` every record is durable. A failure part-way must leave
/// already-written rows intact.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert or overwrite each record by its natural key
    async fn upsert(&self, records: &[Record]) -> Result<UpsertSummary>;

    /// Fetch one stored record
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>>;

    /// Count stored records, optionally within one collection
    async fn count(&self, collection_id: Option<&str>) -> Result<usize>;
}
