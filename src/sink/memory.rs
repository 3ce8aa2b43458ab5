//! In-memory record sink

use super::types::{RecordSink, UpsertSummary};
use crate::decode::{Record, RecordKey};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Rows of one collection, keyed by record id
type Partition = Arc<RwLock<BTreeMap<String, Record>>>;

/// Process-local sink, ordered by key
///
/// Each collection has its own lock; the outer map is only locked long enough to find
/// or create a partition, so pages of different collections are written concurrently.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSink {
    partitions: Arc<RwLock<BTreeMap<String, Partition>>>,
}

impl MemoryRecordSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all rows in key order
    pub async fn records(&self) -> Vec<Record> {
        let partitions: Vec<Partition> = self.partitions.read().await.values().cloned().collect();
        let mut records = Vec::new();
        for partition in partitions {
            records.extend(partition.read().await.values().cloned());
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    async fn partition(&self, collection_id: &str) -> Option<Partition> {
        self.partitions.read().await.get(collection_id).cloned()
    }

    pub(super) async fn partition_or_create(&self, collection_id: &str) -> Partition {
        if let Some(partition) = self.partition(collection_id).await {
            return partition;
        }
        self.partitions
            .write()
            .await
            .entry(collection_id.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn upsert(&self, records: &[Record]) -> Result<UpsertSummary> {
        let mut by_collection: BTreeMap<&str, Vec<&Record>> = BTreeMap::new();
        for record in records {
            by_collection
                .entry(record.key.collection_id.as_str())
                .or_default()
                .push(record);
        }

        let mut summary = UpsertSummary::default();
        for (collection_id, records) in by_collection {
            let partition = self.partition_or_create(collection_id).await;
            let mut rows = partition.write().await;
            for record in records {
                match rows.insert(record.key.record_id.clone(), record.clone()) {
                    Some(_) => summary.updated += 1,
                    None => summary.inserted += 1,
                }
            }
        }
        Ok(summary)
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        Ok(match self.partition(&key.collection_id).await {
            Some(partition) => partition.read().await.get(&key.record_id).cloned(),
            None => None,
        })
    }

    async fn count(&self, collection_id: Option<&str>) -> Result<usize> {
        let count = match collection_id {
            Some(id) => match self.partition(id).await {
                Some(partition) => partition.read().await.len(),
                None => 0,
            },
            None => {
                let partitions: Vec<Partition> =
                    self.partitions.read().await.values().cloned().collect();
                let mut total = 0;
                for partition in partitions {
                    total += partition.read().await.len();
                }
                total
            }
        };
        Ok(count)
    }
}
