//! Schema registry
//!
//! Holds the published table definitions for the lifetime of a store handle.
//! Definitions are immutable once published; re-declaring a table is only
//! allowed with an identical definition.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::observability::{log_event_with_fields, Event};

use super::types::{ColumnDef, MigrationStep, TableDef};

/// Registry of declared tables and reserved migration steps
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: RwLock<BTreeMap<String, Arc<TableDef>>>,
    migrations: RwLock<Vec<MigrationStep>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table.
    ///
    /// Declaring the same name, version and columns again returns the
    /// already-published definition. Any difference is a `SchemaConflict`.
    pub fn declare_table(
        &self,
        name: &str,
        version: u32,
        columns: Vec<ColumnDef>,
    ) -> StoreResult<Arc<TableDef>> {
        let candidate = TableDef::new(name, version, columns)?;

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = tables.get(name) {
            if existing.version() != candidate.version() {
                return Err(StoreError::schema_conflict(
                    name,
                    format!(
                        "already declared at version {}, got version {}",
                        existing.version(),
                        candidate.version()
                    ),
                ));
            }
            if existing.columns() != candidate.columns() {
                return Err(StoreError::schema_conflict(
                    name,
                    "already declared with different columns",
                ));
            }
            return Ok(Arc::clone(existing));
        }

        let version_str = version.to_string();
        let columns_str = candidate.columns().len().to_string();
        let table = Arc::new(candidate);
        tables.insert(name.to_string(), Arc::clone(&table));
        drop(tables);

        log_event_with_fields(
            Event::SchemaDeclared,
            &[
                ("table", name),
                ("version", &version_str),
                ("columns", &columns_str),
            ],
        );

        Ok(table)
    }

    /// Look up a published table
    pub fn resolve(&self, name: &str) -> StoreResult<Arc<TableDef>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    /// All published tables, ordered by name
    pub fn tables(&self) -> Vec<Arc<TableDef>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.values().cloned().collect()
    }

    pub fn is_declared(&self, name: &str) -> bool {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.contains_key(name)
    }

    /// Reserve a migration step for a declared table.
    ///
    /// The step is recorded and listed but never executed.
    pub fn declare_migration(
        &self,
        table: &str,
        from_version: u32,
        to_version: u32,
        description: impl Into<String>,
    ) -> StoreResult<()> {
        self.resolve(table)?;
        if to_version <= from_version {
            return Err(StoreError::schema_conflict(
                table,
                format!(
                    "migration must move forward, got {} -> {}",
                    from_version, to_version
                ),
            ));
        }

        let step = MigrationStep {
            table: table.to_string(),
            from_version,
            to_version,
            description: description.into(),
        };

        let mut migrations = self.migrations.write().unwrap_or_else(|e| e.into_inner());
        if migrations
            .iter()
            .any(|m| m.table == step.table && m.from_version == from_version)
        {
            return Err(StoreError::schema_conflict(
                table,
                format!("migration from version {} already declared", from_version),
            ));
        }
        migrations.push(step);
        drop(migrations);

        let from_str = from_version.to_string();
        let to_str = to_version.to_string();
        log_event_with_fields(
            Event::MigrationDeclared,
            &[("table", table), ("from", &from_str), ("to", &to_str)],
        );
        Ok(())
    }

    /// Reserved migration steps in declaration order
    pub fn migrations(&self) -> Vec<MigrationStep> {
        self.migrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Application schema version: the highest declared table version
    pub fn app_version(&self) -> u32 {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.values().map(|t| t.version()).max().unwrap_or(0)
    }
}
