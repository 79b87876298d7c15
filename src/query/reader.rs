//! Point and collection queries over the published state

use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use crate::adapter::{PersistenceAdapter, TableRows};
use crate::error::StoreResult;
use crate::model::Record;
use crate::schema::{SchemaRegistry, TableDef};

use super::predicate::Predicate;

/// Read access to committed records
#[derive(Debug, Clone)]
pub struct Reader {
    registry: Arc<SchemaRegistry>,
    adapter: Arc<dyn PersistenceAdapter>,
}

impl Reader {
    pub fn new(registry: Arc<SchemaRegistry>, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self { registry, adapter }
    }

    /// Definition of a declared table
    pub fn table(&self, name: &str) -> StoreResult<Arc<TableDef>> {
        self.registry.resolve(name)
    }

    /// One committed record, detached
    pub fn find(&self, table: &str, id: &str) -> StoreResult<Record> {
        let def = self.registry.resolve(table)?;
        let raw = self.adapter.read_one(def.name(), id)?;
        Ok(Record::from_raw(def, &raw, None))
    }

    /// Matching records of `table` as of now, in identifier order.
    ///
    /// The iterator holds the snapshot taken here; later commits do not
    /// affect it.
    pub fn query(&self, table: &str, predicate: Predicate) -> StoreResult<RecordIter> {
        let def = self.registry.resolve(table)?;
        predicate.validate(&def)?;
        let rows = self.adapter.snapshot().table(def.name()).cloned();
        Ok(RecordIter {
            table: def,
            rows,
            predicate,
            cursor: None,
        })
    }

    /// Number of matching records
    pub fn count(&self, table: &str, predicate: Predicate) -> StoreResult<usize> {
        Ok(self.query(table, predicate)?.count())
    }
}

/// Lazy iterator over one table snapshot
pub struct RecordIter {
    table: Arc<TableDef>,
    rows: Option<Arc<TableRows>>,
    predicate: Predicate,
    /// Last identifier yielded or skipped
    cursor: Option<String>,
}

impl Iterator for RecordIter {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let rows = self.rows.as_ref()?;
        loop {
            let (id, raw) = match &self.cursor {
                None => rows.rows.iter().next(),
                Some(last) => rows
                    .rows
                    .range::<str, _>((Excluded(last.as_str()), Unbounded))
                    .next(),
            }?;

            self.cursor = Some(id.clone());
            let record = Record::from_raw(Arc::clone(&self.table), raw, None);
            if self.predicate.matches(&record) {
                return Some(record);
            }
        }
    }
}
