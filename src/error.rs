//! Store error types
//!
//! Every failure surfaced by the store maps to one `StoreError` variant with a
//! stable code of the form `FSTORE_<NAME>`. Codes, severities and recovery
//! hints are part of the contract exposed to the UI layer.
//!
//! Error codes:
//! - FSTORE_SCHEMA_CONFLICT (REJECT)
//! - FSTORE_UNKNOWN_TABLE (REJECT)
//! - FSTORE_UNKNOWN_COLUMN (REJECT)
//! - FSTORE_TYPE_MISMATCH (REJECT)
//! - FSTORE_RESERVED_COLUMN (REJECT)
//! - FSTORE_DETACHED_RECORD (REJECT)
//! - FSTORE_VALIDATION_ERROR (REJECT)
//! - FSTORE_NOT_FOUND (REJECT)
//! - FSTORE_TRANSACTION_TIMEOUT (ERROR)
//! - FSTORE_ADAPTER_IO_ERROR (ERROR)
//! - FSTORE_SCHEMA_VERSION_MISMATCH (FATAL)
//! - FSTORE_DATA_CORRUPTION (FATAL)
//! - FSTORE_CONFIG_ERROR (FATAL)

use std::fmt;
use std::io;

use thiserror::Error;

/// Severity levels for store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Caller request rejected, store state unchanged
    Reject,
    /// Operation failed, store keeps serving
    Error,
    /// Startup must not proceed
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Affordance the UI layer should present for a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The same unit of work may be retried as-is
    Retry,
    /// The operator must fix the submitted values
    CorrectInput,
    /// Nothing the operator can do
    None,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Table re-declared with a different definition
    #[error("Schema conflict on table '{table}': {reason}")]
    SchemaConflict { table: String, reason: String },

    /// Table was never declared
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Column is not part of the table
    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Value type differs from the declared column type
    #[error("Type mismatch on column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Store-managed column written by a caller
    #[error("Column '{0}' is managed by the store")]
    ReservedColumn(String),

    /// Record mutated outside of an open unit of work
    #[error("Record '{record_id}' is not attached to an open unit of work")]
    DetachedRecord { record_id: String },

    /// Row content rejected
    #[error("Validation failed on table '{table}': {reason}")]
    Validation { table: String, reason: String },

    /// No live record with this identifier
    #[error("Record '{id}' not found in table '{table}'")]
    NotFound { table: String, id: String },

    /// Unit of work held the write slot for too long
    #[error("Unit of work '{unit}' exceeded the maximum hold time of {max_hold_ms} ms")]
    TransactionTimeout { unit: String, max_hold_ms: u64 },

    /// Durable store read or write failure
    #[error("Adapter I/O error: {message}")]
    AdapterIo {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Stored schema version differs from the registered one
    #[error("Schema version mismatch for '{table}': stored {stored}, registered {registered}")]
    SchemaVersionMismatch {
        table: String,
        stored: u32,
        registered: u32,
    },

    /// Durable image failed integrity checks
    #[error("Data corruption: {0}")]
    DataCorruption(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Create an adapter I/O error with its underlying cause
    pub fn adapter_io(message: impl Into<String>, source: io::Error) -> Self {
        Self::AdapterIo {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an adapter I/O error without an underlying cause
    pub fn adapter_io_no_source(message: impl Into<String>) -> Self {
        Self::AdapterIo {
            message: message.into(),
            source: None,
        }
    }

    /// Create a not found error
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a schema conflict error
    pub fn schema_conflict(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown column error
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaConflict { .. } => "FSTORE_SCHEMA_CONFLICT",
            Self::UnknownTable(_) => "FSTORE_UNKNOWN_TABLE",
            Self::UnknownColumn { .. } => "FSTORE_UNKNOWN_COLUMN",
            Self::TypeMismatch { .. } => "FSTORE_TYPE_MISMATCH",
            Self::ReservedColumn(_) => "FSTORE_RESERVED_COLUMN",
            Self::DetachedRecord { .. } => "FSTORE_DETACHED_RECORD",
            Self::Validation { .. } => "FSTORE_VALIDATION_ERROR",
            Self::NotFound { .. } => "FSTORE_NOT_FOUND",
            Self::TransactionTimeout { .. } => "FSTORE_TRANSACTION_TIMEOUT",
            Self::AdapterIo { .. } => "FSTORE_ADAPTER_IO_ERROR",
            Self::SchemaVersionMismatch { .. } => "FSTORE_SCHEMA_VERSION_MISMATCH",
            Self::DataCorruption(_) => "FSTORE_DATA_CORRUPTION",
            Self::Config(_) => "FSTORE_CONFIG_ERROR",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            Self::TransactionTimeout { .. } | Self::AdapterIo { .. } => Severity::Error,
            Self::SchemaVersionMismatch { .. } | Self::DataCorruption(_) | Self::Config(_) => {
                Severity::Fatal
            }
            _ => Severity::Reject,
        }
    }

    /// Returns the affordance the UI layer should offer
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::AdapterIo { .. } | Self::TransactionTimeout { .. } => Recovery::Retry,
            Self::Validation { .. } | Self::TypeMismatch { .. } => Recovery::CorrectInput,
            _ => Recovery::None,
        }
    }

    /// Returns whether startup must stop
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
