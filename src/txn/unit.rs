//! Unit of work state machine
//!
//! ```text
//! Open ──commit──► Committing ──ok──► Committed
//!   │                  │
//!   └─abort/timeout─►  └─failure─►  Aborted
//! ```

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::model::Attachment;

/// Lifecycle state of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Open,
    Committing,
    Committed,
    Aborted,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Open => "OPEN",
            UnitState::Committing => "COMMITTING",
            UnitState::Committed => "COMMITTED",
            UnitState::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Committed | UnitState::Aborted)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
struct UnitStatus {
    state: UnitState,
    timed_out: bool,
}

/// State shared between a unit's owner and the write slot
#[derive(Debug)]
pub(crate) struct UnitShared {
    name: String,
    status: Mutex<UnitStatus>,
    attachment: Attachment,
}

impl UnitShared {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Mutex::new(UnitStatus {
                state: UnitState::Open,
                timed_out: false,
            }),
            attachment: Attachment::open(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    pub(crate) fn state(&self) -> UnitState {
        self.lock().state
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.lock().timed_out
    }

    /// Abort an `Open` unit that exceeded its hold time.
    ///
    /// Returns false when the unit already left `Open`.
    pub(crate) fn force_timeout(&self) -> bool {
        let mut status = self.lock();
        if status.state != UnitState::Open {
            return false;
        }
        status.state = UnitState::Aborted;
        status.timed_out = true;
        self.attachment.close();
        true
    }

    /// `Open → Committing`
    pub(crate) fn begin_commit(&self, max_hold_ms: u64) -> StoreResult<()> {
        let mut status = self.lock();
        match status.state {
            UnitState::Open => {
                status.state = UnitState::Committing;
                Ok(())
            }
            _ => Err(self.timeout_error(max_hold_ms)),
        }
    }

    /// Move to a terminal state. Records handed out by the unit become
    /// read-only.
    pub(crate) fn finish(&self, state: UnitState) {
        debug_assert!(state.is_terminal());
        let mut status = self.lock();
        if !status.state.is_terminal() {
            status.state = state;
        }
        self.attachment.close();
    }

    pub(crate) fn timeout_error(&self, max_hold_ms: u64) -> StoreError {
        StoreError::TransactionTimeout {
            unit: self.name.clone(),
            max_hold_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, UnitStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}
