//! Upsert sink module
//!
//! Idempotent record persistence keyed by natural identity.
//!
//! Applying the same page twice leaves the stored rows exactly as applying it once:
//! an existing key has every non-key column overwritten, a new key is inserted.
//! This is what makes re-fetching a page after a crash harmless.

mod memory;
mod types;

pub use memory::MemoryRecordSink;
pub use types::{RecordSink, UpsertSummary};
