//! Query and observation interface
//!
//! # Design Principles
//!
//! - Reads see the last published commit, never a unit in progress
//! - Every query runs against its own immutable snapshot
//! - Results are detached, read-only records
//! - Observers hear about a commit only when their matching set changed
//! - Observer callbacks are owned by the hub until cancelled

mod observe;
mod predicate;
mod reader;

pub use observe::{ObservationHub, Subscription};
pub use predicate::Predicate;
pub use reader::{Reader, RecordIter};
