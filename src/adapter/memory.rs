//! Volatile adapter
//!
//! Holds the working set only. Used by tests and by callers that do not need
//! durability; `flush` does nothing.

use std::sync::Arc;

use crate::clock::Timestamp;
use crate::error::StoreResult;
use crate::fault::FaultInjector;
use crate::model::RawRow;
use crate::schema::TableDef;

use super::{
    check_apply_faults, FlushOutcome, PersistenceAdapter, RowOp, WorkingSet, WorkingSetCell,
};

/// In-memory adapter
#[derive(Debug)]
pub struct MemoryAdapter {
    state: WorkingSetCell,
    faults: Arc<FaultInjector>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::with_faults(Arc::new(FaultInjector::new()))
    }

    /// Create an adapter that consults `faults` before each batch
    pub fn with_faults(faults: Arc<FaultInjector>) -> Self {
        Self {
            state: WorkingSetCell::new(WorkingSet::default(), 0),
            faults,
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn read_all(&self, table: &str) -> StoreResult<Vec<RawRow>> {
        Ok(self.state.read_all(table))
    }

    fn read_one(&self, table: &str, id: &str) -> StoreResult<RawRow> {
        self.state.read_one(table, id)
    }

    fn contains_id(&self, table: &str, id: &str) -> StoreResult<bool> {
        Ok(self.state.contains_id(table, id))
    }

    fn apply_batch(&self, table: &TableDef, ops: &[RowOp]) -> StoreResult<()> {
        check_apply_faults(&self.faults, table.name())?;
        self.state.apply_batch(table, ops)
    }

    fn publish_batches(&self, commit_ts: Timestamp) -> StoreResult<()> {
        self.state.publish(commit_ts);
        Ok(())
    }

    fn discard_batches(&self) {
        self.state.discard();
    }

    fn flush(&self) -> StoreResult<FlushOutcome> {
        Ok(FlushOutcome::Clean)
    }

    fn is_dirty(&self) -> bool {
        false
    }

    fn last_commit_ts(&self) -> Timestamp {
        self.state.snapshot().last_commit_ts
    }

    fn snapshot(&self) -> Arc<WorkingSet> {
        self.state.snapshot()
    }
}
