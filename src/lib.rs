//! fieldstore - a transactional, reactive, on-device record store
//!
//! Holds field intervention records on a disconnected device. Writes go
//! through serialized units of work, reads see the last committed state,
//! and live queries are re-delivered after every commit that changes them.
//! Committed state reaches disk on the next flush.

pub mod adapter;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod fault;
pub mod intervention;
pub mod model;
pub mod observability;
pub mod query;
pub mod schema;
pub mod store;
pub mod txn;
pub mod value;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use model::Record;
pub use query::{Predicate, Subscription};
pub use schema::{ColumnDef, ColumnType, SchemaRegistry, TableDef};
pub use store::{Store, StoreBuilder};
pub use txn::{CommitReceipt, Transaction, UnitState};
pub use value::Value;
