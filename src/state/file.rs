//! File-backed checkpoint store
//!
//! Keeps every checkpoint in one JSON document. Each save rewrites the document with
//! an atomic write: temp file, fsync, rename.

use super::store::CheckpointStore;
use super::types::Checkpoint;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// On-disk document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointFile {
    #[serde(default)]
    checkpoints: BTreeMap<String, Checkpoint>,
}

/// Checkpoint store persisted to a JSON file
///
/// The file is read once when the store is opened; afterwards this process owns it.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
    state: Arc<RwLock<CheckpointFile>>,
}

impl JsonFileCheckpointStore {
    /// Open a store, loading existing checkpoints if the file is present
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::checkpoint(format!("Failed to read checkpoint file: {e}")))?;
            if contents.trim().is_empty() {
                CheckpointFile::default()
            } else {
                serde_json::from_str(&contents).map_err(|e| {
                    Error::checkpoint(format!("Failed to parse checkpoint file: {e}"))
                })?
            }
        } else {
            CheckpointFile::default()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Get the checkpoint file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the document. Called with the write lock held so saves never interleave.
    async fn persist(&self, state: &CheckpointFile) -> Result<()> {
        let contents = serde_json::to_string_pretty(state)
            .map_err(|e| Error::checkpoint(format!("Failed to serialize checkpoints: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::checkpoint(format!("Failed to write checkpoint file: {e}")))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| Error::checkpoint(format!("Failed to write checkpoint file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| Error::checkpoint(format!("Failed to sync checkpoint file: {e}")))?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::checkpoint(format!("Failed to rename checkpoint file: {e}")))?;

        // The rename is only durable once the directory entry is flushed
        sync_parent_dir(&self.path)
            .await
            .map_err(|e| Error::checkpoint(format!("Failed to sync checkpoint directory: {e}")))?;

        Ok(())
    }
}

/// Flush the directory holding `path`
#[cfg(unix)]
pub(super) async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::File::open(dir).await?.sync_all().await
}

/// Directories cannot be opened as files here; rename durability is left to the OS
#[cfg(not(unix))]
pub(super) async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn load(&self, collection_id: &str) -> Result<Checkpoint> {
        let state = self.state.read().await;
        Ok(state
            .checkpoints
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
        let mut state = self.state.write().await;
        let previous = state.checkpoints.insert(
            collection_id.to_string(),
            Checkpoint::written(collection_id, cursor, is_complete),
        );

        if let Err(e) = self.persist(&state).await {
            // Keep memory consistent with disk
            match previous {
                Some(checkpoint) => state.checkpoints.insert(collection_id.to_string(), checkpoint),
                None => state.checkpoints.remove(collection_id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn reset(&self, collection_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(previous) = state.checkpoints.remove(collection_id) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&state).await {
            state.checkpoints.insert(collection_id.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let state = self.state.read().await;
        Ok(state.checkpoints.values().cloned().collect())
    }
}
