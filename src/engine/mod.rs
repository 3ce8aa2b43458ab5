//! Execution engine module
//!
//! The pagination driver: walks one collection page by page, persisting records before
//! advancing the checkpoint, and runs several collections side by side.
//!
//! # Overview
//!
//! The engine module provides:
//! - `Harvester` - drives the per-collection state machine
//! - `HarvestState` - `NotStarted`, `InProgress`, `Completed`, `Failed`
//! - `HarvestConfig` - page cap and collection concurrency
//! - `HarvestReport` / `HarvestStats` - what a run did
//!
//! # Page step
//!
//! ```text
//! fetch (rate limited, retried) ──► upsert records ──► save cursor
//! ```
//!
//! Cancellation is only observed before a fetch, so a cancelled run never stops between
//! the upsert and the cursor save.

mod types;

pub use types::{
    HarvestConfig, HarvestOutcome, HarvestReport, HarvestState, HarvestStats, HarvestStatus,
};

use crate::error::{Error, Result};
use crate::http::RetryController;
use crate::sink::RecordSink;
use crate::state::CheckpointStore;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pagination driver for one upstream API
///
/// Every collection harvested through the same `Harvester` shares its retry controller
/// and therefore its rate limiter.
#[derive(Clone)]
pub struct Harvester {
    retry: RetryController,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn RecordSink>,
    config: HarvestConfig,
    failures: Arc<RwLock<HashMap<String, String>>>,
}

impl Harvester {
    /// Create a new harvester
    pub fn new(
        retry: RetryController,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            retry,
            checkpoints,
            sink,
            config: HarvestConfig::default(),
            failures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set harvest configuration
    #[must_use]
    pub fn with_config(mut self, config: HarvestConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the harvest configuration
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Current state of a collection.
    ///
    /// A collection whose last run in this process failed reports `Failed` until it is
    /// harvested again.
    pub async fn state(&self, collection_id: &str) -> Result<HarvestState> {
        if let Some(reason) = self.failures.read().await.get(collection_id) {
            return Ok(HarvestState::failed(reason.clone()));
        }
        let checkpoint = self.checkpoints.load(collection_id).await?;
        Ok(HarvestState::from_checkpoint(&checkpoint))
    }

    /// Harvest one collection until it completes, fails, hits the page cap or is
    /// cancelled.
    ///
    /// Failures are returned as [`Error::Harvest`] carrying the collection id; the
    /// checkpoint keeps the last cursor whose page was fully persisted.
    pub async fn harvest(
        &self,
        collection_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HarvestReport> {
        self.failures.write().await.remove(collection_id);

        match self.drive(collection_id, cancel).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let kind = error_kind(&e);
                let e = match e {
                    e @ Error::MaxPagesExceeded { .. } => e,
                    e => Error::harvest(collection_id, e),
                };
                error!(collection_id, kind, error = %e, "Harvest failed");
                self.failures
                    .write()
                    .await
                    .insert(collection_id.to_string(), e.to_string());
                Err(e)
            }
        }
    }

    /// Harvest several collections, up to `config.concurrency` at once.
    ///
    /// Duplicate ids are harvested once. Outcomes are returned in input order; one
    /// collection failing does not stop the others.
    pub async fn harvest_all<I, S>(
        &self,
        collection_ids: I,
        cancel: &CancellationToken,
    ) -> Vec<HarvestOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<String> = collection_ids
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();

        info!(
            collections = ids.len(),
            concurrency = self.config.concurrency,
            "Starting harvest"
        );

        stream::iter(ids)
            .map(|collection_id| async move {
                let result = self.harvest(&collection_id, cancel).await;
                HarvestOutcome {
                    collection_id,
                    result,
                }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    async fn drive(&self, collection_id: &str, cancel: &CancellationToken) -> Result<HarvestReport> {
        let start = Instant::now();
        let mut stats = HarvestStats::new();

        let checkpoint = self.checkpoints.load(collection_id).await?;
        let state = HarvestState::from_checkpoint(&checkpoint);
        info!(collection_id, state = %state, "Harvesting collection");

        // NotStarted -> InProgress(None) -> InProgress(c1) -> ... -> Completed
        let mut cursor = match state {
            HarvestState::Completed => {
                info!(collection_id, "Collection already complete, skipping");
                return Ok(HarvestReport {
                    collection_id: collection_id.to_string(),
                    status: HarvestStatus::AlreadyComplete,
                    stats,
                });
            }
            HarvestState::InProgress { cursor } => cursor,
            _ => {
                self.checkpoints.save(collection_id, None, false).await?;
                None
            }
        };

        let status = loop {
            if cancel.is_cancelled() {
                warn!(
                    collection_id,
                    cursor = cursor.as_deref(),
                    "Harvest cancelled at page boundary"
                );
                break HarvestStatus::Cancelled { cursor };
            }
            if stats.pages_fetched >= self.config.max_pages {
                return Err(Error::MaxPagesExceeded {
                    collection_id: collection_id.to_string(),
                    max_pages: self.config.max_pages,
                });
            }
            match self.step(collection_id, cursor.as_deref(), &mut stats).await? {
                Some(next) => cursor = Some(next),
                None => break HarvestStatus::Completed,
            }
        };

        stats.set_duration(start.elapsed().as_millis() as u64);
        info!(
            collection_id,
            pages = stats.pages_fetched,
            records = stats.records_upserted(),
            skipped = stats.records_skipped,
            duration_ms = stats.duration_ms,
            "Harvest finished"
        );

        Ok(HarvestReport {
            collection_id: collection_id.to_string(),
            status,
            stats,
        })
    }

    /// Fetch, persist and checkpoint one page.
    ///
    /// Returns the cursor of the next page, or `None` once the collection is complete.
    async fn step(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
        stats: &mut HarvestStats,
    ) -> Result<Option<String>> {
        let page = self.retry.fetch(collection_id, cursor).await?;
        stats.add_page();
        stats.add_skipped(page.skipped);

        let summary = self.sink.upsert(&page.records).await?;
        stats.add_upsert(summary);

        debug!(
            collection_id,
            cursor,
            records = page.len(),
            inserted = summary.inserted,
            updated = summary.updated,
            next_cursor = page.next_cursor.as_deref(),
            "Page persisted"
        );

        match page.next_cursor {
            Some(next) => {
                self.checkpoints
                    .save(collection_id, Some(&next), false)
                    .await?;
                Ok(Some(next))
            }
            None => {
                self.checkpoints.save(collection_id, cursor, true).await?;
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester")
            .field("retry", &self.retry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn error_kind(e: &Error) -> &'static str {
    match e.fetch_error() {
        Some(fetch) => fetch.kind(),
        None => match e {
            Error::MaxPagesExceeded { .. } => "max_pages_exceeded",
            _ => "storage",
        },
    }
}
