//! Process-wide write slot
//!
//! A ticket lock: every `begin()` draws a ticket and waits until its number
//! is served, so writers run in arrival order. A waiter that finds the
//! holder past its maximum hold time force-aborts it and advances the queue.
//!
//! Lock order: slot state before unit status.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::observability::{log_event_at, Event, MetricsRegistry, Severity};

use super::unit::UnitShared;

/// Minimum wait between hold-time checks
const MIN_WAIT: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct Holder {
    ticket: u64,
    unit: Arc<UnitShared>,
    acquired_at: Instant,
}

#[derive(Debug, Default)]
struct SlotState {
    next_ticket: u64,
    serving: u64,
    holder: Option<Holder>,
}

impl SlotState {
    fn release(&mut self, ticket: u64) -> bool {
        if self.holder.as_ref().map(|h| h.ticket) != Some(ticket) {
            return false;
        }
        self.holder = None;
        self.serving += 1;
        true
    }
}

/// FIFO single-writer slot
#[derive(Debug, Default)]
pub(crate) struct WriteSlot {
    state: Mutex<SlotState>,
    turn: Condvar,
}

impl WriteSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until `unit` holds the slot. Returns its ticket and the instant
    /// the slot was granted.
    pub(crate) fn acquire(
        &self,
        unit: Arc<UnitShared>,
        max_hold: Duration,
        metrics: &MetricsRegistry,
    ) -> (u64, Instant) {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        loop {
            if state.serving == ticket && state.holder.is_none() {
                let acquired_at = Instant::now();
                state.holder = Some(Holder {
                    ticket,
                    unit,
                    acquired_at,
                });
                return (ticket, acquired_at);
            }

            let overdue = state.holder.as_ref().and_then(|holder| {
                let held = holder.acquired_at.elapsed();
                (held >= max_hold).then(|| (holder.ticket, Arc::clone(&holder.unit), held))
            });
            if let Some((overdue_ticket, overdue_unit, held)) = overdue {
                // A committing holder finishes on its own
                if overdue_unit.force_timeout() {
                    state.release(overdue_ticket);
                    metrics.increment_units_timed_out();
                    metrics.increment_units_aborted();
                    log_event_at(
                        Severity::Warn,
                        Event::UnitTimeout,
                        &[
                            ("unit", overdue_unit.name()),
                            ("held_ms", &held.as_millis().to_string()),
                            ("forced_by", "queued_writer"),
                        ],
                    );
                    self.turn.notify_all();
                    continue;
                }
            }

            let wait = match &state.holder {
                Some(holder) => max_hold
                    .saturating_sub(holder.acquired_at.elapsed())
                    .max(MIN_WAIT),
                None => max_hold.max(MIN_WAIT),
            };

            let (guard, _) = self
                .turn
                .wait_timeout(state, wait)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    /// Release the slot held under `ticket`. No-op when the ticket no longer
    /// holds it.
    pub(crate) fn release(&self, ticket: u64) {
        let released = self.lock().release(ticket);
        if released {
            self.turn.notify_all();
        }
    }

    /// Writers waiting for the slot
    pub(crate) fn queued(&self) -> usize {
        let state = self.lock();
        let active = u64::from(state.holder.is_some());
        (state.next_ticket - state.serving).saturating_sub(active) as usize
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
