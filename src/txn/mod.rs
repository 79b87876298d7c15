//! Transaction coordinator subsystem
//!
//! # Design Principles
//!
//! - One writer at a time, served in arrival order
//! - A unit is atomic: all of its operations are published or none are
//! - Units are totally ordered by a monotonic commit timestamp
//! - Readers never wait on an open unit
//! - Change notifications go out in commit order, before the slot is released
//! - No unit holds the slot past its maximum hold time

mod coordinator;
mod slot;
mod unit;

pub use coordinator::{CommitReceipt, Coordinator, Transaction};
pub use unit::UnitState;
