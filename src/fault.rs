//! Fault point injection for testing adapter failure paths
//!
//! Adapters consult a `FaultInjector` at named points. An armed point turns
//! the next N checks into I/O errors, which the adapter reports exactly like a
//! real disk failure. Disarmed points cost one map lookup.
//!
//! Points can also be armed from the `FIELDSTORE_FAULT_POINT` environment
//! variable (`name` or `name:count`) for manual crash drills against the CLI.
//!
//! # Usage
//!
//! ```ignore
//! let faults = Arc::new(FaultInjector::new());
//! faults.arm(points::APPLY_BATCH, 1);
//! let adapter = MemoryAdapter::with_faults(faults.clone());
//! ```

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

/// Environment variable read by `FaultInjector::from_env`
pub const FAULT_ENV_VAR: &str = "FIELDSTORE_FAULT_POINT";

/// All defined fault point names
pub mod points {
    /// Before a table batch is applied to the pending working set.
    /// `apply_batch:<table>` targets a single table.
    pub const APPLY_BATCH: &str = "apply_batch";

    /// Before the temporary image file is written
    pub const FLUSH_BEFORE_WRITE: &str = "flush_before_write";

    /// After the temporary image is synced, before it replaces the live image
    pub const FLUSH_BEFORE_RENAME: &str = "flush_before_rename";

    /// Get all fault point names
    pub fn all() -> &'static [&'static str] {
        &[APPLY_BATCH, FLUSH_BEFORE_WRITE, FLUSH_BEFORE_RENAME]
    }

    /// Table-scoped variant of `APPLY_BATCH`
    pub fn apply_batch_for(table: &str) -> String {
        format!("{}:{}", APPLY_BATCH, table)
    }
}

/// Registry of armed fault points with remaining trigger counts
#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: Mutex<HashMap<String, u32>>,
}

impl FaultInjector {
    /// Create an injector with nothing armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an injector armed from `FIELDSTORE_FAULT_POINT`
    pub fn from_env() -> Self {
        let injector = Self::new();
        if let Ok(setting) = std::env::var(FAULT_ENV_VAR) {
            // `apply_batch:interventions` is a point name, `apply_batch:3` a count
            let (name, times) = match setting.rsplit_once(':') {
                Some((name, count)) => match count.parse::<u32>() {
                    Ok(times) => (name.to_string(), times),
                    Err(_) => (setting.clone(), 1),
                },
                None => (setting.clone(), 1),
            };
            injector.arm(&name, times);
        }
        injector
    }

    /// Make the next `times` checks of `point` fail
    pub fn arm(&self, point: &str, times: u32) {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        if times == 0 {
            armed.remove(point);
        } else {
            armed.insert(point.to_string(), times);
        }
    }

    /// Disarm a point
    pub fn disarm(&self, point: &str) {
        self.arm(point, 0);
    }

    /// Check if a point is currently armed
    pub fn is_armed(&self, point: &str) -> bool {
        let armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        armed.get(point).copied().unwrap_or(0) > 0
    }

    /// Consume one trigger of `point`, failing if it was armed
    pub fn check(&self, point: &str) -> io::Result<()> {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        let Some(remaining) = armed.get_mut(point) else {
            return Ok(());
        };

        *remaining -= 1;
        if *remaining == 0 {
            armed.remove(point);
        }

        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("injected fault at {}", point),
        ))
    }
}
