//! Checkpoint module
//!
//! Durable per-collection progress that lets an interrupted harvest resume.
//!
//! # Overview
//!
//! The state module provides:
//! - `Checkpoint` - cursor, completion flag and last write time for one collection
//! - `CheckpointStore` - the load/save/reset interface the driver depends on
//! - `MemoryCheckpointStore` - process-local store for tests and dry runs
//! - `JsonFileCheckpointStore` - single JSON file with atomic rewrites
//!
//! The DuckDB store in `crate::database` implements the same trait.

mod file;
mod store;
mod types;

pub use file::JsonFileCheckpointStore;
pub use store::{CheckpointStore, MemoryCheckpointStore};
pub use types::Checkpoint;
