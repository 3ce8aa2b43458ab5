//! Checkpoint store trait and in-memory implementation

use super::types::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable per-collection progress storage
///
/// `save` must be durable when it returns: the driver fetches the next page only
/// afterwards.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load a checkpoint, or a zero-value one if the collection was never saved
    async fn load(&self, collection_id: &str) -> Result<Checkpoint>;

    /// Upsert the checkpoint row. Repeating a call with the same arguments is harmless.
    async fn save(&self, collection_id: &str, cursor: Option<&str>, is_complete: bool)
        -> Result<()>;

    /// Delete the row so the next run starts from the first page.
    /// Returns whether a row existed.
    async fn reset(&self, collection_id: &str) -> Result<bool>;

    /// All stored checkpoints ordered by collection id
    async fn list(&self) -> Result<Vec<Checkpoint>>;
}

/// Process-local checkpoint store
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, collection_id: &str) -> Result<Checkpoint> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints
            .get(collection_id)
            .cloned()
            .unwrap_or_else(|| Checkpoint::new(collection_id)))
    }

    async fn save(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
        is_complete: bool,
    ) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(
            collection_id.to_string(),
            Checkpoint::written(collection_id, cursor, is_complete),
        );
        Ok(())
    }

    async fn reset(&self, collection_id: &str) -> Result<bool> {
        let mut checkpoints = self.checkpoints.write().await;
        Ok(checkpoints.remove(collection_id).is_some())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        let mut all: Vec<_> = checkpoints.values().cloned().collect();
        all.sort_by(|a, b| a.collection_id.cmp(&b.collection_id));
        Ok(all)
    }
}
