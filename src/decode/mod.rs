//! Response decoder module
//!
//! Turns page response bodies into [`PageResult`]s.
//!
//! # Overview
//!
//! - [`PageDecoder`] locates the item array and the next cursor in a JSON body.
//!   The cursor may be an opaque token or a next-page link.
//! - [`RecordMapper`] keys each item by its natural identity and extracts
//!   scalar columns; the full item is kept as the record payload.

mod decoders;
mod types;

pub use decoders::{FieldMapping, PageDecoder, RecordMapper};
pub use types::{PageResult, Record, RecordKey};
