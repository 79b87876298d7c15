//! Persistence adapter subsystem
//!
//! # Design Principles
//!
//! - Reads are served from an immutable published snapshot
//! - A unit's table batches become visible together or not at all
//! - The durable image is replaced whole, never overwritten in place
//! - Committed in-memory state is never rolled back by a failed flush
//! - Integrity failures at open are fatal
//!
//! Units committed after the last successful flush are lost if the process
//! terminates before the next flush.

mod file;
mod flusher;
pub mod image;
mod memory;
mod working_set;

use std::fmt;
use std::sync::Arc;

pub use file::{FileAdapter, FlushRetryPolicy, IMAGE_FILE_NAME};
pub use flusher::{run_flush, Flusher};
pub use memory::MemoryAdapter;
pub use working_set::{RowOp, TableRows, WorkingSet};

pub(crate) use working_set::WorkingSetCell;

use crate::clock::Timestamp;
use crate::error::{StoreError, StoreResult};
use crate::fault::{points, FaultInjector};
use crate::model::RawRow;
use crate::schema::TableDef;

/// Result of a flush request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing published since the last successful flush
    Clean,
    /// Image written for the given generation
    Written {
        generation: u64,
        bytes: u64,
        attempts: u32,
    },
}

/// Backing store primitives used by the coordinator and the query layer
pub trait PersistenceAdapter: Send + Sync + fmt::Debug {
    /// All live rows of a table, ordered by identifier
    fn read_all(&self, table: &str) -> StoreResult<Vec<RawRow>>;

    /// One live row, `NotFound` otherwise
    fn read_one(&self, table: &str, id: &str) -> StoreResult<RawRow>;

    /// Identifier is live or tombstoned
    fn contains_id(&self, table: &str, id: &str) -> StoreResult<bool>;

    /// Apply one committing unit's operations for a table to the pending
    /// working set
    fn apply_batch(&self, table: &TableDef, ops: &[RowOp]) -> StoreResult<()>;

    /// Make every pending batch visible at once
    fn publish_batches(&self, commit_ts: Timestamp) -> StoreResult<()>;

    /// Drop every pending batch
    fn discard_batches(&self);

    /// Durably write the last published working set
    fn flush(&self) -> StoreResult<FlushOutcome>;

    /// Published state not yet flushed
    fn is_dirty(&self) -> bool;

    /// Commit timestamp of the latest published unit
    fn last_commit_ts(&self) -> Timestamp;

    /// Current published working set
    fn snapshot(&self) -> Arc<WorkingSet>;
}

/// Consult the batch fault points for `table`
fn check_apply_faults(faults: &FaultInjector, table: &str) -> StoreResult<()> {
    let scoped = points::apply_batch_for(table);
    faults
        .check(points::APPLY_BATCH)
        .and_then(|_| faults.check(&scoped))
        .map_err(|e| StoreError::adapter_io(format!("apply batch to '{}' failed", table), e))
}
