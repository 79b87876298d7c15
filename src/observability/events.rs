//! Observable store events
//!
//! Every log line the store emits names one of these events.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Configuration loaded and validated
    ConfigLoaded,
    /// Table definition registered
    SchemaDeclared,
    /// Migration step reserved
    MigrationDeclared,
    /// Durable image loaded at open
    ImageLoaded,
    /// Leftover temporary image removed at open
    StaleTempRemoved,
    /// Image holds a table the registry does not declare
    UndeclaredTable,
    /// Stored application schema version replaced by the registry's
    AppVersionChanged,
    /// Stored schema disagrees with registry (FATAL)
    SchemaVersionMismatch,
    /// Durable image failed integrity checks (FATAL)
    DataCorruption,
    /// Store handle torn down
    Shutdown,

    // Units of work
    /// Write slot granted
    UnitBegin,
    /// Unit committed and published
    UnitCommit,
    /// Unit discarded
    UnitAbort,
    /// Unit force-aborted after exceeding max hold
    UnitTimeout,

    // Flush
    /// Flush attempt failed, will retry
    FlushRetry,
    /// Flush gave up after all attempts
    FlushFailed,
    /// Background flusher started
    FlusherStarted,
    /// Background flusher stopped
    FlusherStopped,

    // Observation
    /// Subscription registered
    SubscriptionOpened,
    /// Subscription cancelled
    SubscriptionCancelled,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::SchemaDeclared => "SCHEMA_DECLARED",
            Event::MigrationDeclared => "MIGRATION_DECLARED",
            Event::ImageLoaded => "IMAGE_LOADED",
            Event::StaleTempRemoved => "STALE_TEMP_REMOVED",
            Event::UndeclaredTable => "UNDECLARED_TABLE",
            Event::AppVersionChanged => "APP_VERSION_CHANGED",
            Event::SchemaVersionMismatch => "SCHEMA_VERSION_MISMATCH",
            Event::DataCorruption => "DATA_CORRUPTION",
            Event::Shutdown => "STORE_SHUTDOWN",

            Event::UnitBegin => "UNIT_BEGIN",
            Event::UnitCommit => "UNIT_COMMIT",
            Event::UnitAbort => "UNIT_ABORT",
            Event::UnitTimeout => "UNIT_TIMEOUT",

            Event::FlushRetry => "FLUSH_RETRY",
            Event::FlushFailed => "FLUSH_FAILED",
            Event::FlusherStarted => "FLUSHER_STARTED",
            Event::FlusherStopped => "FLUSHER_STOPPED",

            Event::SubscriptionOpened => "SUBSCRIPTION_OPENED",
            Event::SubscriptionCancelled => "SUBSCRIPTION_CANCELLED",
        }
    }

    /// Returns true if this event means startup cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::SchemaVersionMismatch | Event::DataCorruption)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
