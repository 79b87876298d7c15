//! Record model
//!
//! # Design Principles
//!
//! - Column access resolves through the table's column index
//! - Types are checked on every write, no coercion
//! - `Null` only in optional columns
//! - Only records attached to an open unit of work are writable
//! - Timestamps are stamped by the commit, never by callers

mod raw;
mod record;

pub use raw::RawRow;
pub use record::{Attachment, Record};
