//! Transaction coordinator
//!
//! Serializes every mutation into units of work. A unit stages creates,
//! updates and deletes locally; nothing reaches the adapter until commit.
//! Commit applies one batch per touched table to the adapter's pending
//! working set and publishes them together, or discards them all.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::adapter::{PersistenceAdapter, RowOp};
use crate::clock::{Clock, Timestamp};
use crate::error::{StoreError, StoreResult};
use crate::model::Record;
use crate::observability::{log_event_at, log_event_with_fields, Event, MetricsRegistry, Severity};
use crate::query::ObservationHub;
use crate::schema::{SchemaRegistry, TableDef};

use super::slot::WriteSlot;
use super::unit::{UnitShared, UnitState};

/// Identifier draws per creation before giving up
const MAX_ID_ATTEMPTS: usize = 16;

/// Shared writer state behind every `Transaction`
#[derive(Debug)]
pub struct Coordinator {
    registry: Arc<SchemaRegistry>,
    adapter: Arc<dyn PersistenceAdapter>,
    clock: Arc<dyn Clock>,
    hub: Arc<ObservationHub>,
    metrics: Arc<MetricsRegistry>,
    slot: WriteSlot,
    max_hold: Duration,
}

impl Coordinator {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        adapter: Arc<dyn PersistenceAdapter>,
        clock: Arc<dyn Clock>,
        hub: Arc<ObservationHub>,
        metrics: Arc<MetricsRegistry>,
        max_hold: Duration,
    ) -> Self {
        Self {
            registry,
            adapter,
            clock,
            hub,
            metrics,
            slot: WriteSlot::new(),
            max_hold,
        }
    }

    /// Open a unit of work, blocking until the write slot is ours.
    ///
    /// Callers are served in arrival order. A holder past `max_hold` is
    /// force-aborted by the next waiter.
    pub fn begin(self: &Arc<Self>, name: &str) -> StoreResult<Transaction> {
        let unit = Arc::new(UnitShared::new(name));
        let (ticket, opened_at) =
            self.slot
                .acquire(Arc::clone(&unit), self.max_hold, &self.metrics);

        log_event_at(
            Severity::Trace,
            Event::UnitBegin,
            &[("unit", name), ("ticket", &ticket.to_string())],
        );

        Ok(Transaction {
            coordinator: Arc::clone(self),
            unit,
            ticket,
            opened_at,
            staged: Vec::new(),
            released: false,
        })
    }

    /// Writers waiting for the slot
    pub fn queued(&self) -> usize {
        self.slot.queued()
    }

    pub fn max_hold(&self) -> Duration {
        self.max_hold
    }

    fn max_hold_ms(&self) -> u64 {
        u64::try_from(self.max_hold.as_millis()).unwrap_or(u64::MAX)
    }
}

/// One staged operation, in staging order
#[derive(Debug)]
enum Staged {
    Create(Record),
    Update(Record),
    Delete { table: Arc<TableDef>, id: String },
}

impl Staged {
    fn table(&self) -> &Arc<TableDef> {
        match self {
            Staged::Create(record) | Staged::Update(record) => record.table(),
            Staged::Delete { table, .. } => table,
        }
    }

    fn id(&self) -> &str {
        match self {
            Staged::Create(record) | Staged::Update(record) => record.id(),
            Staged::Delete { id, .. } => id,
        }
    }

    fn matches(&self, table: &str, id: &str) -> bool {
        self.table().name() == table && self.id() == id
    }
}

/// Outcome of a committed unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReceipt {
    pub unit: String,
    pub commit_ts: Timestamp,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Tables touched, in first-touch order
    pub tables: Vec<String>,
}

impl CommitReceipt {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// An open unit of work holding the write slot.
///
/// Dropping an unfinished transaction aborts it.
#[derive(Debug)]
pub struct Transaction {
    coordinator: Arc<Coordinator>,
    unit: Arc<UnitShared>,
    ticket: u64,
    opened_at: Instant,
    staged: Vec<Staged>,
    released: bool,
}

impl Transaction {
    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn state(&self) -> UnitState {
        self.unit.state()
    }

    /// Stage a new record of `table`.
    ///
    /// The initializer receives an attached record with every column unset.
    /// Defaults are filled afterwards; required columns left unset fail
    /// with `Validation`.
    pub fn create<F>(&mut self, table: &str, initializer: F) -> StoreResult<Record>
    where
        F: FnOnce(&mut Record) -> StoreResult<()>,
    {
        self.ensure_open()?;
        let def = self.coordinator.registry.resolve(table)?;
        let id = self.allocate_id(&def, || uuid::Uuid::new_v4().simple().to_string())?;

        let mut record = Record::blank(def, id, self.unit.attachment().clone());
        initializer(&mut record)?;
        self.ensure_open()?;

        record.apply_defaults();
        record.validate()?;

        self.staged.push(Staged::Create(record.clone()));
        Ok(record)
    }

    /// Stage a mutation of an existing record.
    ///
    /// Returns the attached view the mutator wrote to. Updating the same
    /// record twice in one unit stages a single update.
    pub fn update<F>(&mut self, record: &Record, mutator: F) -> StoreResult<Record>
    where
        F: FnOnce(&mut Record) -> StoreResult<()>,
    {
        self.ensure_open()?;
        let def = self.coordinator.registry.resolve(record.table_name())?;

        if let Some(staged) = self.find_staged(def.name(), record.id()) {
            let mut attached = match staged {
                Staged::Create(r) | Staged::Update(r) => r.clone(),
                Staged::Delete { .. } => {
                    return Err(StoreError::not_found(def.name(), record.id()))
                }
            };
            // A failing mutator must not leave half its writes staged
            let before = attached.snapshot_values();
            if let Err(e) = mutator(&mut attached) {
                attached.restore_values(before);
                return Err(e);
            }
            self.ensure_open()?;
            return Ok(attached);
        }

        let raw = self.coordinator.adapter.read_one(def.name(), record.id())?;
        let mut attached = Record::from_raw(def, &raw, Some(self.unit.attachment().clone()));
        mutator(&mut attached)?;
        self.ensure_open()?;

        self.staged.push(Staged::Update(attached.clone()));
        Ok(attached)
    }

    /// Stage a delete. The identifier is retired for good once committed.
    pub fn delete(&mut self, record: &Record) -> StoreResult<()> {
        self.ensure_open()?;
        let def = self.coordinator.registry.resolve(record.table_name())?;

        let position = self
            .staged
            .iter()
            .position(|s| s.matches(def.name(), record.id()));

        let Some(i) = position else {
            self.coordinator.adapter.read_one(def.name(), record.id())?;
            self.staged.push(Staged::Delete {
                table: def,
                id: record.id().to_string(),
            });
            return Ok(());
        };

        match &self.staged[i] {
            Staged::Delete { .. } => {
                return Err(StoreError::not_found(def.name(), record.id()));
            }
            Staged::Create(_) => {
                // Never published, nothing to retire
                self.staged.remove(i);
            }
            Staged::Update(_) => {
                self.staged[i] = Staged::Delete {
                    table: def,
                    id: record.id().to_string(),
                };
            }
        }
        Ok(())
    }

    /// Commit the unit.
    ///
    /// All staged operations become visible together under one commit
    /// timestamp, then observers of the touched tables are notified before
    /// the write slot is released. On failure nothing is published and the
    /// unit ends `Aborted`.
    ///
    /// Visibility is not durability: the unit reaches disk with the next
    /// flush.
    pub fn commit(mut self) -> StoreResult<CommitReceipt> {
        let result = self.commit_inner();
        self.release();
        result
    }

    fn commit_inner(&mut self) -> StoreResult<CommitReceipt> {
        let max_hold_ms = self.coordinator.max_hold_ms();
        if let Err(e) = self.ensure_open() {
            self.log_abort(&e.to_string());
            return Err(e);
        }
        self.unit.begin_commit(max_hold_ms)?;

        let commit_ts = self
            .coordinator
            .clock
            .now_millis()
            .max(self.coordinator.adapter.last_commit_ts());

        match self.apply(commit_ts) {
            Ok(receipt) => {
                for staged in &self.staged {
                    if let Staged::Create(record) | Staged::Update(record) = staged {
                        record.stamp(commit_ts);
                    }
                }
                self.unit.finish(UnitState::Committed);

                let metrics = &self.coordinator.metrics;
                metrics.increment_units_committed();
                metrics.add_record_ops(
                    receipt.created as u64,
                    receipt.updated as u64,
                    receipt.deleted as u64,
                );

                log_event_with_fields(
                    Event::UnitCommit,
                    &[
                        ("unit", self.unit.name()),
                        ("commit_ts", &commit_ts.to_string()),
                        ("created", &receipt.created.to_string()),
                        ("updated", &receipt.updated.to_string()),
                        ("deleted", &receipt.deleted.to_string()),
                        ("tables", &receipt.tables.join(",")),
                    ],
                );

                if !receipt.is_empty() {
                    self.coordinator.hub.notify(&receipt.tables);
                }
                Ok(receipt)
            }
            Err(e) => {
                self.coordinator.adapter.discard_batches();
                self.unit.finish(UnitState::Aborted);
                self.coordinator.metrics.increment_units_aborted();
                self.log_abort(&e.to_string());
                Err(e)
            }
        }
    }

    /// Group staged operations per table and hand them to the adapter
    fn apply(&self, commit_ts: Timestamp) -> StoreResult<CommitReceipt> {
        let mut receipt = CommitReceipt {
            unit: self.unit.name().to_string(),
            commit_ts,
            created: 0,
            updated: 0,
            deleted: 0,
            tables: Vec::new(),
        };
        if self.staged.is_empty() {
            return Ok(receipt);
        }

        let mut batches: Vec<(Arc<TableDef>, Vec<RowOp>)> = Vec::new();
        for staged in &self.staged {
            let op = match staged {
                Staged::Create(record) => {
                    record.validate()?;
                    receipt.created += 1;
                    RowOp::Insert(record.to_raw(commit_ts))
                }
                Staged::Update(record) => {
                    receipt.updated += 1;
                    RowOp::Update(record.to_raw(commit_ts))
                }
                Staged::Delete { id, .. } => {
                    receipt.deleted += 1;
                    RowOp::Delete { id: id.clone() }
                }
            };

            let table = staged.table();
            match batches.iter_mut().find(|(t, _)| t.name() == table.name()) {
                Some((_, ops)) => ops.push(op),
                None => batches.push((Arc::clone(table), vec![op])),
            }
        }

        let adapter = &self.coordinator.adapter;
        for (table, ops) in &batches {
            adapter.apply_batch(table, ops)?;
        }
        adapter.publish_batches(commit_ts)?;

        receipt.tables = batches
            .iter()
            .map(|(t, _)| t.name().to_string())
            .collect();
        Ok(receipt)
    }

    /// Discard every staged operation and release the slot
    pub fn abort(mut self) {
        self.abort_inner("requested");
        self.release();
    }

    fn abort_inner(&mut self, reason: &str) {
        if self.unit.state().is_terminal() {
            return;
        }
        self.staged.clear();
        self.unit.finish(UnitState::Aborted);
        self.coordinator.metrics.increment_units_aborted();
        self.log_abort(reason);
    }

    /// Check the unit is still `Open` and within its hold time
    fn ensure_open(&self) -> StoreResult<()> {
        let max_hold_ms = self.coordinator.max_hold_ms();
        if self.opened_at.elapsed() >= self.coordinator.max_hold && self.unit.force_timeout() {
            self.coordinator.metrics.increment_units_timed_out();
            self.coordinator.metrics.increment_units_aborted();
            log_event_at(
                Severity::Warn,
                Event::UnitTimeout,
                &[("unit", self.unit.name()), ("forced_by", "owner")],
            );
        }

        match self.unit.state() {
            UnitState::Open => Ok(()),
            _ => Err(self.unit.timeout_error(max_hold_ms)),
        }
    }

    fn find_staged(&self, table: &str, id: &str) -> Option<&Staged> {
        self.staged.iter().find(|s| s.matches(table, id))
    }

    /// Draw identifiers until one is unused in the table and in this unit
    fn allocate_id<G>(&self, table: &TableDef, mut generate: G) -> StoreResult<String>
    where
        G: FnMut() -> String,
    {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = generate();
            let staged = self
                .staged
                .iter()
                .any(|s| s.matches(table.name(), &candidate));
            if !staged
                && !self
                    .coordinator
                    .adapter
                    .contains_id(table.name(), &candidate)?
            {
                return Ok(candidate);
            }
        }
        Err(StoreError::validation(
            table.name(),
            "could not allocate an unused identifier",
        ))
    }

    fn log_abort(&self, reason: &str) {
        log_event_with_fields(
            Event::UnitAbort,
            &[("unit", self.unit.name()), ("reason", reason)],
        );
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.coordinator.slot.release(self.ticket);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.abort_inner("dropped");
        self.release();
    }
}
