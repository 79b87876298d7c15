//! In-memory working set
//!
//! The published working set is immutable and shared through an `Arc`.
//! Readers and flushes clone the `Arc` and never block writers. A unit's
//! table batches are applied to a separate pending copy; publishing swaps the
//! pending copy in with a single pointer store, so readers see either none or
//! all of a unit's tables.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::{StoreError, StoreResult};
use crate::model::RawRow;
use crate::schema::TableDef;

/// One operation of a committed unit, for a single table
#[derive(Debug, Clone, PartialEq)]
pub enum RowOp {
    Insert(RawRow),
    Update(RawRow),
    Delete { id: String },
}

impl RowOp {
    pub fn id(&self) -> &str {
        match self {
            RowOp::Insert(row) | RowOp::Update(row) => &row.id,
            RowOp::Delete { id } => id,
        }
    }
}

/// Rows and retired identifiers of one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRows {
    /// Schema version the rows were written under
    pub version: u32,
    pub rows: BTreeMap<String, RawRow>,
    /// Identifiers of deleted rows, never reissued
    #[serde(default)]
    pub tombstones: BTreeSet<String>,
}

impl TableRows {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Identifier is live or retired
    pub fn contains_id(&self, id: &str) -> bool {
        self.rows.contains_key(id) || self.tombstones.contains(id)
    }

    /// Apply one operation
    pub fn apply(&mut self, table: &str, op: RowOp) -> StoreResult<()> {
        match op {
            RowOp::Insert(row) => {
                if self.contains_id(&row.id) {
                    return Err(StoreError::validation(
                        table,
                        format!("identifier '{}' already in use", row.id),
                    ));
                }
                self.rows.insert(row.id.clone(), row);
            }
            RowOp::Update(mut row) => {
                let existing = self
                    .rows
                    .get_mut(&row.id)
                    .ok_or_else(|| StoreError::not_found(table, &row.id))?;
                row.created_at = existing.created_at;
                *existing = row;
            }
            RowOp::Delete { id } => {
                if self.rows.remove(&id).is_none() {
                    return Err(StoreError::not_found(table, id));
                }
                self.tombstones.insert(id);
            }
        }
        Ok(())
    }
}

/// Complete state of the store as held in memory and written to disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingSet {
    /// Application schema version the image was written under
    pub app_version: u32,
    /// Commit timestamp of the latest published unit
    pub last_commit_ts: Timestamp,
    pub tables: BTreeMap<String, Arc<TableRows>>,
}

impl WorkingSet {
    pub fn table(&self, name: &str) -> Option<&Arc<TableRows>> {
        self.tables.get(name)
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }
}

/// Published working set plus the pending copy of the unit being committed
#[derive(Debug)]
pub(crate) struct WorkingSetCell {
    published: RwLock<Arc<WorkingSet>>,
    pending: Mutex<Option<WorkingSet>>,
    /// Bumped on every publish; flushes compare it to detect dirtiness
    generation: AtomicU64,
}

impl WorkingSetCell {
    pub(crate) fn new(initial: WorkingSet, generation: u64) -> Self {
        Self {
            published: RwLock::new(Arc::new(initial)),
            pending: Mutex::new(None),
            generation: AtomicU64::new(generation),
        }
    }

    /// Current published state
    pub(crate) fn snapshot(&self) -> Arc<WorkingSet> {
        let published = self.published.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*published)
    }

    /// Current published state and the generation it belongs to
    pub(crate) fn snapshot_with_generation(&self) -> (Arc<WorkingSet>, u64) {
        let published = self.published.read().unwrap_or_else(|e| e.into_inner());
        (
            Arc::clone(&*published),
            self.generation.load(Ordering::Acquire),
        )
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn read_all(&self, table: &str) -> Vec<RawRow> {
        self.snapshot()
            .table(table)
            .map(|rows| rows.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn read_one(&self, table: &str, id: &str) -> StoreResult<RawRow> {
        self.snapshot()
            .table(table)
            .and_then(|rows| rows.rows.get(id).cloned())
            .ok_or_else(|| StoreError::not_found(table, id))
    }

    pub(crate) fn contains_id(&self, table: &str, id: &str) -> bool {
        self.snapshot()
            .table(table)
            .map(|rows| rows.contains_id(id))
            .unwrap_or(false)
    }

    /// Apply one table's operations to the pending copy.
    ///
    /// The table is copied before the first operation, so a failing batch
    /// leaves the pending copy as it was.
    pub(crate) fn apply_batch(&self, table: &TableDef, ops: &[RowOp]) -> StoreResult<()> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let working = pending.get_or_insert_with(|| self.snapshot().as_ref().clone());

        let mut rows = match working.tables.get(table.name()) {
            Some(existing) => existing.as_ref().clone(),
            None => TableRows::new(table.version()),
        };
        for op in ops {
            rows.apply(table.name(), op.clone())?;
        }

        working
            .tables
            .insert(table.name().to_string(), Arc::new(rows));
        Ok(())
    }

    /// Publish the pending copy. Returns false when nothing was pending.
    pub(crate) fn publish(&self, commit_ts: Timestamp) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut working) = pending.take() else {
            return false;
        };
        working.last_commit_ts = working.last_commit_ts.max(commit_ts);

        let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
        *published = Arc::new(working);
        self.generation.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Drop the pending copy
    pub(crate) fn discard(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use crate::value::Value;

    fn table(name: &str) -> TableDef {
        TableDef::new(name, 1, vec![ColumnDef::string("label")]).unwrap()
    }

    fn row(id: &str, label: &str, ts: Timestamp) -> RawRow {
        RawRow {
            id: id.into(),
            values: BTreeMap::from([("label".to_string(), Value::from(label))]),
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_pending_invisible_until_publish() {
        let cell = WorkingSetCell::new(WorkingSet::default(), 0);
        cell.apply_batch(&table("stations"), &[RowOp::Insert(row("a", "north", 10))])
            .unwrap();

        assert!(cell.read_all("stations").is_empty());
        assert!(cell.publish(10));
        assert_eq!(cell.read_all("stations").len(), 1);
        assert_eq!(cell.generation(), 1);
        assert_eq!(cell.snapshot().last_commit_ts, 10);
    }

    #[test]
    fn test_publish_is_all_tables_at_once() {
        let cell = WorkingSetCell::new(WorkingSet::default(), 0);
        cell.apply_batch(&table("stations"), &[RowOp::Insert(row("a", "north", 10))])
            .unwrap();
        cell.apply_batch(&table("sites"), &[RowOp::Insert(row("b", "depot", 10))])
            .unwrap();

        let before = cell.snapshot();
        cell.publish(10);
        let after = cell.snapshot();

        assert_eq!(before.row_count(), 0);
        assert_eq!(after.row_count(), 2);
    }

    #[test]
    fn test_discard_drops_all_batches() {
        let cell = WorkingSetCell::new(WorkingSet::default(), 0);
        cell.apply_batch(&table("stations"), &[RowOp::Insert(row("a", "north", 10))])
            .unwrap();
        cell.discard();
        assert!(!cell.publish(10));
        assert_eq!(cell.generation(), 0);
        assert!(cell.read_all("stations").is_empty());
    }

    #[test]
    fn test_update_keeps_created_at() {
        let mut rows = TableRows::new(1);
        rows.apply("stations", RowOp::Insert(row("a", "north", 10))).unwrap();
        rows.apply("stations", RowOp::Update(row("a", "south", 20))).unwrap();

        let stored = &rows.rows["a"];
        assert_eq!(stored.created_at, 10);
        assert_eq!(stored.updated_at, 20);
        assert_eq!(stored.value("label"), &Value::from("south"));
    }

    #[test]
    fn test_delete_retires_identifier() {
        let mut rows = TableRows::new(1);
        rows.apply("stations", RowOp::Insert(row("a", "north", 10))).unwrap();
        rows.apply("stations", RowOp::Delete { id: "a".into() }).unwrap();

        assert!(rows.rows.is_empty());
        assert!(rows.contains_id("a"));
        assert!(rows
            .apply("stations", RowOp::Insert(row("a", "again", 30)))
            .is_err());
        assert!(matches!(
            rows.apply("stations", RowOp::Delete { id: "a".into() }),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_failed_batch_leaves_pending_unchanged() {
        let cell = WorkingSetCell::new(WorkingSet::default(), 0);
        let stations = table("stations");
        cell.apply_batch(&stations, &[RowOp::Insert(row("a", "north", 10))])
            .unwrap();

        let result = cell.apply_batch(
            &stations,
            &[
                RowOp::Insert(row("b", "south", 10)),
                RowOp::Update(row("missing", "x", 10)),
            ],
        );
        assert!(result.is_err());

        cell.publish(10);
        let snapshot = cell.snapshot();
        let rows = &snapshot.table("stations").unwrap().rows;
        assert!(rows.contains_key("a"));
        assert!(!rows.contains_key("b"));
    }
}
