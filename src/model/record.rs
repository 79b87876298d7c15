//! Typed record views
//!
//! A `Record` is a transient view over one row. Column access goes through
//! the table's column index, never through the raw mapping. Records handed
//! out inside a unit of work share their cells with the unit, so a `set` on
//! an attached record is staged for that unit's commit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::Timestamp;
use crate::error::{StoreError, StoreResult};
use crate::schema::{
    is_reserved, ColumnType, TableDef, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN,
};
use crate::value::Value;

use super::raw::RawRow;

/// Link between a record and the unit of work that produced it.
///
/// The unit closes the attachment when it reaches `Committed` or `Aborted`,
/// which turns every record it handed out read-only.
#[derive(Debug, Clone)]
pub struct Attachment(Arc<AtomicBool>);

impl Attachment {
    pub(crate) fn open() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn close(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
struct Cells {
    values: Vec<Value>,
    created_at: Option<Timestamp>,
    updated_at: Option<Timestamp>,
}

/// A typed view over one row of a table
#[derive(Clone)]
pub struct Record {
    table: Arc<TableDef>,
    id: String,
    cells: Arc<Mutex<Cells>>,
    attachment: Option<Attachment>,
}

impl Record {
    /// Build a view over a stored row
    pub(crate) fn from_raw(
        table: Arc<TableDef>,
        raw: &RawRow,
        attachment: Option<Attachment>,
    ) -> Self {
        let values = table
            .columns()
            .iter()
            .map(|column| raw.value(&column.name).clone())
            .collect();

        Self {
            id: raw.id.clone(),
            table,
            cells: Arc::new(Mutex::new(Cells {
                values,
                created_at: Some(raw.created_at),
                updated_at: Some(raw.updated_at),
            })),
            attachment,
        }
    }

    /// Build an empty record for creation; every column starts `Null`
    pub(crate) fn blank(table: Arc<TableDef>, id: String, attachment: Attachment) -> Self {
        let values = vec![Value::Null; table.columns().len()];
        Self {
            table,
            id,
            cells: Arc::new(Mutex::new(Cells {
                values,
                created_at: None,
                updated_at: None,
            })),
            attachment: Some(attachment),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn table(&self) -> &Arc<TableDef> {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    /// Whether `set` is currently allowed
    pub fn is_attached(&self) -> bool {
        self.attachment
            .as_ref()
            .map(Attachment::is_open)
            .unwrap_or(false)
    }

    /// Commit time of the creating unit, `None` before the first commit
    pub fn created_at(&self) -> Option<Timestamp> {
        self.lock().created_at
    }

    /// Commit time of the latest mutating unit, `None` before the first commit
    pub fn updated_at(&self) -> Option<Timestamp> {
        self.lock().updated_at
    }

    /// Read a column. Store-managed columns are readable too.
    pub fn get(&self, column: &str) -> StoreResult<Value> {
        match column {
            ID_COLUMN => return Ok(Value::String(self.id.clone())),
            CREATED_AT_COLUMN => return Ok(self.created_at().map(stamp_value).into()),
            UPDATED_AT_COLUMN => return Ok(self.updated_at().map(stamp_value).into()),
            _ => {}
        }

        let position = self
            .table
            .position(column)
            .ok_or_else(|| StoreError::unknown_column(self.table.name(), column))?;
        Ok(self.lock().values[position].clone())
    }

    /// Read a string column, `None` when null
    pub fn get_str(&self, column: &str) -> StoreResult<Option<String>> {
        self.expect_type(column, ColumnType::String)?;
        Ok(self.get(column)?.as_str().map(str::to_string))
    }

    /// Read a number column, `None` when null
    pub fn get_number(&self, column: &str) -> StoreResult<Option<f64>> {
        if column != CREATED_AT_COLUMN && column != UPDATED_AT_COLUMN {
            self.expect_type(column, ColumnType::Number)?;
        }
        Ok(self.get(column)?.as_number())
    }

    /// Read a boolean column, `None` when null
    pub fn get_bool(&self, column: &str) -> StoreResult<Option<bool>> {
        self.expect_type(column, ColumnType::Boolean)?;
        Ok(self.get(column)?.as_bool())
    }

    /// Write a column of an attached record
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> StoreResult<()> {
        if is_reserved(column) {
            return Err(StoreError::ReservedColumn(column.to_string()));
        }
        if !self.is_attached() {
            return Err(StoreError::DetachedRecord {
                record_id: self.id.clone(),
            });
        }

        let position = self
            .table
            .position(column)
            .ok_or_else(|| StoreError::unknown_column(self.table.name(), column))?;
        let value = value.into();
        self.table.columns()[position].check_value(&value)?;

        self.lock().values[position] = value;
        Ok(())
    }

    /// Column values keyed by name, store-managed columns excluded
    pub fn values(&self) -> BTreeMap<String, Value> {
        let cells = self.lock();
        self.table
            .columns()
            .iter()
            .zip(cells.values.iter())
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect()
    }

    /// JSON object with every column, store-managed ones included
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert(ID_COLUMN.into(), serde_json::Value::String(self.id.clone()));
        for (name, value) in self.values() {
            object.insert(name, value.to_json());
        }
        let cells = self.lock();
        object.insert(CREATED_AT_COLUMN.into(), cells.created_at.into());
        object.insert(UPDATED_AT_COLUMN.into(), cells.updated_at.into());
        serde_json::Value::Object(object)
    }

    /// Fill unset columns from their declared defaults
    pub(crate) fn apply_defaults(&self) {
        let mut cells = self.lock();
        for (position, column) in self.table.columns().iter().enumerate() {
            if cells.values[position].is_null() {
                if let Some(default) = &column.default {
                    cells.values[position] = default.clone();
                }
            }
        }
    }

    /// Check that every non-optional column holds a value
    pub(crate) fn validate(&self) -> StoreResult<()> {
        let cells = self.lock();
        let missing: Vec<&str> = self
            .table
            .columns()
            .iter()
            .zip(cells.values.iter())
            .filter(|(column, value)| !column.optional && value.is_null())
            .map(|(column, _)| column.name.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::validation(
                self.table.name(),
                format!("missing required column(s): {}", missing.join(", ")),
            ))
        }
    }

    /// Row to hand to the adapter for a commit at `commit_ts`
    pub(crate) fn to_raw(&self, commit_ts: Timestamp) -> RawRow {
        let created_at = self.created_at().unwrap_or(commit_ts);
        RawRow {
            id: self.id.clone(),
            values: self.values(),
            created_at,
            updated_at: commit_ts,
        }
    }

    /// Record the commit time once the unit is published
    pub(crate) fn stamp(&self, commit_ts: Timestamp) {
        let mut cells = self.lock();
        if cells.created_at.is_none() {
            cells.created_at = Some(commit_ts);
        }
        cells.updated_at = Some(commit_ts);
    }

    /// Column values as they stand, for `restore_values`
    pub(crate) fn snapshot_values(&self) -> Vec<Value> {
        self.lock().values.clone()
    }

    /// Put back values taken by `snapshot_values`. Every view sharing these
    /// cells sees the restored values.
    pub(crate) fn restore_values(&self, values: Vec<Value>) {
        self.lock().values = values;
    }

    /// Whether two views share the same staged cells
    #[cfg(test)]
    pub(crate) fn shares_cells(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.cells, &other.cells)
    }

    fn expect_type(&self, column: &str, expected: ColumnType) -> StoreResult<()> {
        if column == ID_COLUMN {
            return match expected {
                ColumnType::String => Ok(()),
                other => Err(StoreError::TypeMismatch {
                    column: column.to_string(),
                    expected: other.type_name(),
                    actual: ColumnType::String.type_name(),
                }),
            };
        }

        let definition = self.table.require_column(column)?;
        if definition.column_type == expected {
            Ok(())
        } else {
            Err(StoreError::TypeMismatch {
                column: column.to_string(),
                expected: expected.type_name(),
                actual: definition.column_type.type_name(),
            })
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cells> {
        self.cells.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn stamp_value(ts: Timestamp) -> f64 {
    ts as f64
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.table.name())
            .field("id", &self.id)
            .field("values", &self.values())
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;

    fn table() -> Arc<TableDef> {
        Arc::new(
            TableDef::new(
                "interventions",
                1,
                vec![
                    ColumnDef::string("station_id"),
                    ColumnDef::number("consumption"),
                    ColumnDef::string("notes").optional(),
                    ColumnDef::boolean("trace_nest").with_default(false),
                ],
            )
            .unwrap(),
        )
    }

    fn stored_row() -> RawRow {
        RawRow {
            id: "rec-1".into(),
            values: BTreeMap::from([
                ("station_id".to_string(), Value::from("STA-007")),
                ("consumption".to_string(), Value::from(75)),
                ("notes".to_string(), Value::Null),
                ("trace_nest".to_string(), Value::from(true)),
            ]),
            created_at: 1_000,
            updated_at: 2_000,
        }
    }

    #[test]
    fn test_read_accessors() {
        let record = Record::from_raw(table(), &stored_row(), None);
        assert_eq!(record.get_str("station_id").unwrap().as_deref(), Some("STA-007"));
        assert_eq!(record.get_number("consumption").unwrap(), Some(75.0));
        assert_eq!(record.get_str("notes").unwrap(), None);
        assert_eq!(record.get_bool("trace_nest").unwrap(), Some(true));
        assert_eq!(record.created_at(), Some(1_000));
        assert_eq!(record.get("updated_at").unwrap(), Value::from(2_000.0));
        assert_eq!(record.get("id").unwrap(), Value::from("rec-1"));
    }

    #[test]
    fn test_unknown_column() {
        let record = Record::from_raw(table(), &stored_row(), None);
        assert!(matches!(
            record.get("bait_type"),
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_typed_accessor_mismatch() {
        let record = Record::from_raw(table(), &stored_row(), None);
        assert!(matches!(
            record.get_bool("consumption"),
            Err(StoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_detached_record_rejects_set() {
        let mut record = Record::from_raw(table(), &stored_row(), None);
        assert!(!record.is_attached());
        let err = record.set("consumption", 25).unwrap_err();
        assert!(matches!(err, StoreError::DetachedRecord { .. }));
    }

    #[test]
    fn test_reserved_checked_before_attachment() {
        let mut record = Record::from_raw(table(), &stored_row(), None);
        let err = record.set("updated_at", 5).unwrap_err();
        assert!(matches!(err, StoreError::ReservedColumn(_)));
    }

    #[test]
    fn test_set_on_attached_record() {
        let attachment = Attachment::open();
        let mut record = Record::blank(table(), "new".into(), attachment.clone());

        record.set("station_id", "STA-001").unwrap();
        record.set("notes", Value::Null).unwrap();
        assert!(matches!(
            record.set("consumption", "high"),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            record.set("station_id", Value::Null),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            record.set("bait_type", "grain"),
            Err(StoreError::UnknownColumn { .. })
        ));

        attachment.close();
        assert!(matches!(
            record.set("station_id", "STA-002"),
            Err(StoreError::DetachedRecord { .. })
        ));
    }

    #[test]
    fn test_defaults_and_validation() {
        let mut record = Record::blank(table(), "new".into(), Attachment::open());
        record.set("station_id", "STA-001").unwrap();
        record.apply_defaults();
        assert_eq!(record.get_bool("trace_nest").unwrap(), Some(false));

        let err = record.validate().unwrap_err();
        assert!(err.to_string().contains("consumption"));

        record.set("consumption", 50).unwrap();
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_stamp_sets_created_once() {
        let record = Record::blank(table(), "new".into(), Attachment::open());
        record.stamp(100);
        record.stamp(200);
        assert_eq!(record.created_at(), Some(100));
        assert_eq!(record.updated_at(), Some(200));

        let raw = record.to_raw(300);
        assert_eq!(raw.created_at, 100);
        assert_eq!(raw.updated_at, 300);
    }

    #[test]
    fn test_clones_share_cells() {
        let attachment = Attachment::open();
        let mut record = Record::blank(table(), "new".into(), attachment);
        let view = record.clone();
        record.set("station_id", "STA-009").unwrap();
        assert_eq!(view.get_str("station_id").unwrap().as_deref(), Some("STA-009"));
        assert!(view.shares_cells(&record));
    }

    #[test]
    fn test_to_json() {
        let record = Record::from_raw(table(), &stored_row(), None);
        let json = record.to_json();
        assert_eq!(json["id"], "rec-1");
        assert_eq!(json["station_id"], "STA-007");
        assert_eq!(json["created_at"], 1_000);
        assert!(json["notes"].is_null());
    }
}
