//! Schema registry subsystem
//!
//! Tables are declared once, before any unit of work touches them.
//!
//! # Design Principles
//!
//! - Declared columns are the only writable columns
//! - `id`, `created_at` and `updated_at` belong to the store
//! - Published definitions never change for the life of a handle
//! - Versions are explicit and checked against the durable image at open
//! - Migration steps are reserved, never executed

mod registry;
mod types;

pub use registry::SchemaRegistry;
pub use types::{
    is_reserved, ColumnDef, ColumnType, MigrationStep, TableDef, CREATED_AT_COLUMN, ID_COLUMN,
    RESERVED_COLUMNS, UPDATED_AT_COLUMN,
};
