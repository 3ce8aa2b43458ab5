//! DuckDB storage support
//!
//! One embedded database file holds both the checkpoint table and the record table.
//! [`DuckDbStore`] implements [`CheckpointStore`](crate::state::CheckpointStore) and
//! [`RecordSink`](crate::sink::RecordSink), so a harvest can run against a single file.
//!
//! # Tables
//!
//! ```text
//! checkpoints(collection_id PK, "cursor", is_complete, last_updated_at)
//! records(record_id, collection_id, fields, data, collected_at, PK(record_id, collection_id))
//! ```
//!
//! External tooling may delete a checkpoint row or set `is_complete = false` to force
//! a re-harvest; the store always reads the live row.

mod store;

pub use store::DuckDbStore;
