//! Table and column definitions
//!
//! Supported column types:
//! - string: UTF-8 string
//! - number: 64-bit floating point
//! - boolean

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::value::Value;

/// Identifier column, assigned by the store at creation
pub const ID_COLUMN: &str = "id";
/// Commit time of the creating unit
pub const CREATED_AT_COLUMN: &str = "created_at";
/// Commit time of the latest mutating unit
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Columns managed by the store, never declared or written by callers
pub const RESERVED_COLUMNS: [&str; 3] = [ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// Returns whether `name` is a store-managed column
pub fn is_reserved(name: &str) -> bool {
    RESERVED_COLUMNS.contains(&name)
}

/// Primitive column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
}

impl ColumnType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
        }
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether rows may leave the column absent
    #[serde(default)]
    pub optional: bool,
    /// Value filled in at creation when the initializer leaves the column unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            optional: false,
            default: None,
        }
    }

    /// Create a required string column
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::String)
    }

    /// Create a required number column
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Number)
    }

    /// Create a required boolean column
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    /// Mark the column optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set the creation default
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Checks that `value` may be stored in this column.
    ///
    /// NaN and infinities are refused; the image stores numbers as JSON,
    /// which has no encoding for them.
    pub fn check_value(&self, value: &Value) -> StoreResult<()> {
        if let Value::Number(n) = value {
            if !n.is_finite() {
                return Err(StoreError::TypeMismatch {
                    column: self.name.clone(),
                    expected: "finite number",
                    actual: "non-finite number",
                });
            }
        }

        match value.column_type() {
            None if self.optional => Ok(()),
            Some(actual) if actual == self.column_type => Ok(()),
            _ => Err(StoreError::TypeMismatch {
                column: self.name.clone(),
                expected: self.column_type.type_name(),
                actual: value.type_name(),
            }),
        }
    }
}

/// A published table definition.
///
/// The column → position index is built once here and used by every record
/// of the table for accessor lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    name: String,
    version: u32,
    columns: Vec<ColumnDef>,
    column_index: HashMap<String, usize>,
}

impl TableDef {
    /// Build and validate a table definition
    pub fn new(name: impl Into<String>, version: u32, columns: Vec<ColumnDef>) -> StoreResult<Self> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(StoreError::schema_conflict(name, "table name must not be empty"));
        }
        if version == 0 {
            return Err(StoreError::schema_conflict(name, "schema versions start at 1"));
        }

        let mut column_index = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            if is_reserved(&column.name) {
                return Err(StoreError::ReservedColumn(column.name.clone()));
            }
            if column_index.insert(column.name.clone(), position).is_some() {
                return Err(StoreError::schema_conflict(
                    &name,
                    format!("column '{}' declared twice", column.name),
                ));
            }
            if let Some(default) = &column.default {
                if default.is_null() {
                    return Err(StoreError::schema_conflict(
                        &name,
                        format!("default of column '{}' must not be null", column.name),
                    ));
                }
                column.check_value(default)?;
            }
        }

        Ok(Self {
            name,
            version,
            columns,
            column_index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Columns in declaration order
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Accessor position of a caller column
    pub fn position(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    pub fn column(&self, column: &str) -> Option<&ColumnDef> {
        self.position(column).map(|position| &self.columns[position])
    }

    /// Same as `column` but fails with `UnknownColumn`
    pub fn require_column(&self, column: &str) -> StoreResult<&ColumnDef> {
        self.column(column)
            .ok_or_else(|| StoreError::unknown_column(&self.name, column))
    }
}

/// A reserved migration slot between two versions of a table.
///
/// Steps are declared and listed; the store never executes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStep {
    pub table: String,
    pub from_version: u32,
    pub to_version: u32,
    pub description: String,
}
