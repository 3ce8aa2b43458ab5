//! Engine types
//!
//! Driver states, configuration and per-run statistics.

use crate::error::Error;
use crate::sink::UpsertSummary;
use crate::state::Checkpoint;
use serde::Serialize;

/// Position of one collection in the pagination state machine
///
/// ```text
/// NotStarted ──► InProgress ──► Completed
///                    │
///                    └──► Failed(reason)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HarvestState {
    /// No page has been persisted
    NotStarted,
    /// Pages remain; `cursor` is the next page to fetch (`None` for the first page)
    InProgress {
        /// Cursor of the next page
        cursor: Option<String>,
    },
    /// The last page has been persisted
    Completed,
    /// A fatal error stopped the harvest; the checkpoint keeps its last good cursor
    Failed {
        /// Why the harvest stopped
        reason: String,
    },
}

impl HarvestState {
    /// Derive the state a checkpoint puts the driver in
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        if checkpoint.is_complete {
            Self::Completed
        } else if let Some(cursor) = &checkpoint.cursor {
            Self::InProgress {
                cursor: Some(cursor.clone()),
            }
        } else {
            Self::NotStarted
        }
    }

    /// Build a failed state
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether no further transitions happen in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// Short state name
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress { .. } => "in_progress",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for HarvestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress {
                cursor: Some(cursor),
            } => write!(f, "in_progress (cursor {cursor})"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Configuration for harvest runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    /// Pages one invocation may fetch for a collection before giving up
    pub max_pages: usize,
    /// Collections harvested at once by `harvest_all`
    pub concurrency: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_pages: 10_000,
            concurrency: 4,
        }
    }
}

impl HarvestConfig {
    /// Create a new harvest config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page cap
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set how many collections run concurrently
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Statistics from one harvest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestStats {
    /// Pages fetched successfully
    pub pages_fetched: usize,
    /// Records that were new
    pub records_inserted: usize,
    /// Records that overwrote an existing row
    pub records_updated: usize,
    /// Items dropped for lacking a natural key
    pub records_skipped: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl HarvestStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a page
    pub fn add_page(&mut self) {
        self.pages_fetched += 1;
    }

    /// Add an upsert outcome
    pub fn add_upsert(&mut self, summary: UpsertSummary) {
        self.records_inserted += summary.inserted;
        self.records_updated += summary.updated;
    }

    /// Add skipped items
    pub fn add_skipped(&mut self, count: usize) {
        self.records_skipped += count;
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }

    /// Total records written
    pub fn records_upserted(&self) -> usize {
        self.records_inserted + self.records_updated
    }
}

/// How a harvest invocation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarvestStatus {
    /// The last page was persisted during this run
    Completed,
    /// The checkpoint was already complete; no requests were made
    AlreadyComplete,
    /// Stopped at a page boundary on request
    Cancelled {
        /// Cursor the next run resumes from
        cursor: Option<String>,
    },
}

impl HarvestStatus {
    /// Whether the collection is fully harvested
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed | Self::AlreadyComplete)
    }
}

/// Result of a successful harvest invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    /// Harvested collection
    pub collection_id: String,
    /// Terminal status
    #[serde(flatten)]
    pub status: HarvestStatus,
    /// Work done during this invocation
    pub stats: HarvestStats,
}

/// Outcome for one collection of a multi-collection run
#[derive(Debug)]
pub struct HarvestOutcome {
    /// Collection id
    pub collection_id: String,
    /// Report, or the error that stopped the harvest
    pub result: Result<HarvestReport, Error>,
}

impl HarvestOutcome {
    /// Whether the harvest failed
    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }
}
