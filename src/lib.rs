// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # cursor-harvest
//!
//! Checkpointed, rate-limited harvesting of cursor-paginated HTTP collections.
//!
//! Each collection is walked page by page. A page's records are upserted before its
//! cursor is checkpointed, so an interrupted harvest resumes where it stopped and a
//! re-fetched page never duplicates rows.
//!
//! ## Features
//!
//! - **Shared Rate Limiting**: One FIFO-fair limiter per upstream, across all collections
//! - **Classified Failures**: Transient errors retried with backoff, fatal errors stop the collection
//! - **Durable Checkpoints**: DuckDB, JSON file or in-memory stores
//! - **Idempotent Upserts**: Records keyed by (record id, collection id)
//! - **Cancellation**: Stops cleanly between pages
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cursor_harvest::database::DuckDbStore;
//! use cursor_harvest::decode::{PageDecoder, RecordMapper};
//! use cursor_harvest::engine::Harvester;
//! use cursor_harvest::http::{
//!     Credentials, HttpClientConfig, HttpPageFetcher, RateLimiter, RateLimiterConfig,
//!     RetryController, RetryPolicy,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> cursor_harvest::Result<()> {
//!     let config = HttpClientConfig::builder()
//!         .base_url("https://api.example.com")
//!         .credentials(Credentials::bearer("token"))
//!         .build();
//!     let fetcher = HttpPageFetcher::new(config, PageDecoder::new(), RecordMapper::new("id"))?;
//!
//!     let limiter = RateLimiter::new(&RateLimiterConfig::from_ceiling(50, 0.6));
//!     let retry = RetryController::new(Arc::new(fetcher), limiter, RetryPolicy::new());
//!
//!     let store = Arc::new(DuckDbStore::open("harvest.duckdb")?);
//!     let harvester = Harvester::new(retry, store.clone(), store);
//!
//!     let report = harvester.harvest("org-1", &CancellationToken::new()).await?;
//!     println!("{:?}", report.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Harvester (engine)                       │
//! │   NotStarted ──► InProgress ──► Completed        Failed      │
//! └──────────────────────────────────────────────────────────────┘
//!         │                         │                    │
//! ┌───────┴────────┐      ┌─────────┴──────┐    ┌────────┴───────┐
//! │      HTTP      │      │   Checkpoints  │    │      Sink      │
//! ├────────────────┤      ├────────────────┤    ├────────────────┤
//! │ Rate Limiter   │      │ DuckDB         │    │ DuckDB         │
//! │ Retry          │      │ JSON file      │    │ Memory         │
//! │ Page Fetcher   │      │ Memory         │    │                │
//! │ Decoder        │      │                │    │                │
//! └────────────────┘      └────────────────┘    └────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(missing_docs)] // TODO: Add docs before 1.0 release

// ============================================================================
// Module declarations
// ============================================================================

/// Error types and the fetch failure taxonomy
pub mod error;

/// Common types and type aliases
pub mod types;

/// Rate limiting, page fetching and retries
pub mod http;

/// Response decoding into records
pub mod decode;

/// Checkpoints and checkpoint stores
pub mod state;

/// Idempotent record sinks
pub mod sink;

/// DuckDB storage for checkpoints and records
pub mod database;

/// Pagination driver
pub mod engine;

/// Settings file
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, FetchError, Result};
pub use types::*;

// Re-export commonly used types
pub use config::HarvestSettings;
pub use engine::{HarvestConfig, HarvestReport, HarvestState, HarvestStatus, Harvester};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
