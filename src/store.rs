//! Store handle
//!
//! Ties the schema registry, a persistence adapter, the transaction
//! coordinator, the observation hub and the background flusher together.
//! Collaborators receive a `Store` (usually behind an `Arc`) explicitly;
//! there is no global instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::adapter::{
    run_flush, FileAdapter, FlushOutcome, Flusher, MemoryAdapter, PersistenceAdapter, WorkingSet,
};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::model::Record;
use crate::observability::{
    log_event_with_fields, Event, Logger, MetricsRegistry, MetricsSnapshot, ObservationScope,
};
use crate::query::{ObservationHub, Predicate, Reader, RecordIter, Subscription};
use crate::schema::SchemaRegistry;
use crate::txn::{Coordinator, Transaction};

const DEFAULT_MAX_HOLD: Duration = Duration::from_secs(30);

/// Builder for a `Store` over any adapter
pub struct StoreBuilder {
    registry: Arc<SchemaRegistry>,
    adapter: Option<Arc<dyn PersistenceAdapter>>,
    clock: Arc<dyn Clock>,
    max_hold: Duration,
    flush_interval: Option<Duration>,
}

impl StoreBuilder {
    fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            adapter: None,
            clock: Arc::new(SystemClock),
            max_hold: DEFAULT_MAX_HOLD,
            flush_interval: None,
        }
    }

    /// Persistence adapter; an in-memory one when unset
    pub fn adapter(mut self, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Longest a unit may hold the write slot
    pub fn max_hold(mut self, max_hold: Duration) -> Self {
        self.max_hold = max_hold;
        self
    }

    /// Start a background flusher with this cadence
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    pub fn build(self) -> StoreResult<Store> {
        let adapter: Arc<dyn PersistenceAdapter> = match self.adapter {
            Some(adapter) => adapter,
            None => Arc::new(MemoryAdapter::new()),
        };
        let metrics = Arc::new(MetricsRegistry::new());
        let hub = Arc::new(ObservationHub::new(
            Arc::clone(&self.registry),
            Arc::clone(&adapter),
            Arc::clone(&metrics),
        ));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&self.registry),
            Arc::clone(&adapter),
            self.clock,
            Arc::clone(&hub),
            Arc::clone(&metrics),
            self.max_hold,
        ));

        let flusher = match self.flush_interval {
            Some(interval) => Some(Flusher::start(
                Arc::clone(&adapter),
                Arc::clone(&metrics),
                interval,
            )?),
            None => None,
        };

        Ok(Store {
            reader: Reader::new(Arc::clone(&self.registry), Arc::clone(&adapter)),
            registry: self.registry,
            adapter,
            coordinator,
            hub,
            metrics,
            flusher: Mutex::new(flusher),
            closed: AtomicBool::new(false),
        })
    }
}

/// Handle to an open store
pub struct Store {
    registry: Arc<SchemaRegistry>,
    adapter: Arc<dyn PersistenceAdapter>,
    coordinator: Arc<Coordinator>,
    reader: Reader,
    hub: Arc<ObservationHub>,
    metrics: Arc<MetricsRegistry>,
    flusher: Mutex<Option<Flusher>>,
    closed: AtomicBool,
}

impl Store {
    pub fn builder(registry: Arc<SchemaRegistry>) -> StoreBuilder {
        StoreBuilder::new(registry)
    }

    /// Store with no durable state
    pub fn in_memory(registry: Arc<SchemaRegistry>) -> StoreResult<Self> {
        Self::builder(registry).build()
    }

    /// Open the file-backed store described by `config`.
    ///
    /// Every table must be declared in `registry` before this call. Fails
    /// with `SchemaVersionMismatch` or `DataCorruption` when the image on
    /// disk cannot be used as is.
    pub fn open(config: &StoreConfig, registry: Arc<SchemaRegistry>) -> StoreResult<Self> {
        config.validate()?;
        Logger::set_min_severity(config.severity()?);

        let data_dir = config.data_dir.display().to_string();
        let scope = ObservationScope::with_fields("STORE_OPEN", &[("data_dir", &data_dir)]);

        let opened = FileAdapter::open(&config.data_dir, &registry, config.retry_policy())
            .and_then(|adapter| {
                Self::builder(registry)
                    .adapter(Arc::new(adapter))
                    .max_hold(config.max_hold())
                    .flush_interval(config.flush_interval())
                    .build()
            });

        match opened {
            Ok(store) => {
                scope.complete_with_fields(&[(
                    "tables",
                    &store.registry.tables().len().to_string(),
                )]);
                Ok(store)
            }
            Err(e) if e.is_fatal() => {
                scope.fail_fatal(&e.to_string());
                Err(e)
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    /// Open a unit of work, waiting for the write slot.
    ///
    /// The returned transaction must be committed or aborted; dropping it
    /// aborts.
    pub fn begin(&self, name: &str) -> StoreResult<Transaction> {
        self.coordinator.begin(name)
    }

    /// Run `work` inside a unit: commit when it returns `Ok`, abort when it
    /// returns `Err`.
    ///
    /// A successful return means the unit is visible to every reader, not
    /// that it is on disk. It reaches disk with the next flush.
    pub fn write<T, F>(&self, name: &str, work: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> StoreResult<T>,
    {
        let mut txn = self.begin(name)?;
        match work(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort();
                Err(e)
            }
        }
    }

    /// One committed record, detached
    pub fn find(&self, table: &str, id: &str) -> StoreResult<Record> {
        self.reader.find(table, id)
    }

    /// Committed records of `table` matching `predicate`, in identifier order
    pub fn query(&self, table: &str, predicate: Predicate) -> StoreResult<RecordIter> {
        self.reader.query(table, predicate)
    }

    pub fn count(&self, table: &str, predicate: Predicate) -> StoreResult<usize> {
        self.reader.count(table, predicate)
    }

    /// Register a live query. `callback` runs once now with the current
    /// matching set and again after each commit that changes it.
    ///
    /// Callbacks run on the committing thread while it holds the write slot,
    /// so a callback must not begin a unit itself.
    pub fn observe<F>(
        &self,
        table: &str,
        predicate: Predicate,
        callback: F,
    ) -> StoreResult<Subscription>
    where
        F: Fn(&[Record]) + Send + Sync + 'static,
    {
        self.hub.observe(table, predicate, callback)
    }

    /// Write the committed state to durable storage now.
    ///
    /// Commits made since the last successful flush are lost if the
    /// process dies before one happens.
    pub fn flush(&self) -> StoreResult<FlushOutcome> {
        run_flush(self.adapter.as_ref(), &self.metrics)
    }

    /// Committed state not yet flushed
    pub fn is_dirty(&self) -> bool {
        self.adapter.is_dirty()
    }

    pub fn last_commit_ts(&self) -> Timestamp {
        self.adapter.last_commit_ts()
    }

    /// Published working set, for inspection
    pub fn working_set(&self) -> Arc<WorkingSet> {
        self.adapter.snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Writers waiting for the slot
    pub fn queued_writers(&self) -> usize {
        self.coordinator.queued()
    }

    /// Live observers
    pub fn observers(&self) -> usize {
        self.hub.active_count()
    }

    /// Stop the background flusher and flush what it left dirty.
    ///
    /// Returns the final flush error, if any; the committed state stays in
    /// memory and `flush` may be retried. Only the first call does work.
    /// The store stays usable afterwards; further commits are only written
    /// by explicit `flush` calls.
    pub fn shutdown(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let result = match flusher {
            Some(mut flusher) => flusher.stop().map(|_| ()),
            None => Ok(()),
        };

        let dirty = if self.is_dirty() { "true" } else { "false" };
        match &result {
            Ok(()) => log_event_with_fields(Event::Shutdown, &[("dirty", dirty)]),
            Err(e) => log_event_with_fields(
                Event::Shutdown,
                &[("dirty", dirty), ("error", &e.to_string())],
            ),
        }
        result
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("adapter", &self.adapter)
            .field("observers", &self.hub.active_count())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Callers that need the outcome call `shutdown` themselves
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::schema::ColumnDef;
    use tempfile::TempDir;

    fn registry() -> Arc<SchemaRegistry> {
        let registry = Arc::new(SchemaRegistry::new());
        registry
            .declare_table(
                "stations",
                1,
                vec![ColumnDef::string("label"), ColumnDef::number("level")],
            )
            .unwrap();
        registry
    }

    fn add_station(store: &Store, label: &str, level: i32) -> StoreResult<Record> {
        store.write("add station", |txn| {
            txn.create("stations", |r| {
                r.set("label", label)?;
                r.set("level", level)
            })
        })
    }

    #[test]
    fn test_write_commits_on_ok() {
        let store = Store::in_memory(registry()).unwrap();
        let record = add_station(&store, "north", 25).unwrap();

        let found = store.find("stations", record.id()).unwrap();
        assert_eq!(found.get_str("label").unwrap().as_deref(), Some("north"));
        assert_eq!(store.metrics().units_committed, 1);
    }

    #[test]
    fn test_write_aborts_on_err() {
        let store = Store::in_memory(registry()).unwrap();
        let result: StoreResult<()> = store.write("half done", |txn| {
            txn.create("stations", |r| {
                r.set("label", "north")?;
                r.set("level", 0)
            })?;
            Err(StoreError::validation("stations", "operator cancelled"))
        });

        assert!(result.is_err());
        assert_eq!(store.count("stations", Predicate::All).unwrap(), 0);
        assert_eq!(store.metrics().units_aborted, 1);
    }

    #[test]
    fn test_commit_timestamps_come_from_clock() {
        let clock = Arc::new(ManualClock::new(5_000));
        let store = Store::builder(registry())
            .clock(clock.clone())
            .build()
            .unwrap();

        let first = add_station(&store, "a", 0).unwrap();
        clock.advance(10);
        let second = add_station(&store, "b", 0).unwrap();

        assert_eq!(first.created_at(), Some(5_000));
        assert_eq!(second.updated_at(), Some(5_010));
        assert_eq!(store.last_commit_ts(), 5_010);
    }

    #[test]
    fn test_open_flush_and_reopen() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path());

        let id = {
            let store = Store::open(&config, registry()).unwrap();
            let record = add_station(&store, "depot", 50).unwrap();
            assert!(store.is_dirty());
            store.flush().unwrap();
            assert!(!store.is_dirty());
            record.id().to_string()
        };

        let store = Store::open(&config, registry()).unwrap();
        let found = store.find("stations", &id).unwrap();
        assert_eq!(found.get_number("level").unwrap(), Some(50.0));
    }

    #[test]
    fn test_shutdown_flushes_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path());

        let store = Store::open(&config, registry()).unwrap();
        add_station(&store, "depot", 50).unwrap();
        store.shutdown().unwrap();
        assert!(!store.is_dirty());
        store.shutdown().unwrap();
        drop(store);

        let reopened = Store::open(&config, registry()).unwrap();
        assert_eq!(reopened.count("stations", Predicate::All).unwrap(), 1);
    }

    #[test]
    fn test_observe_through_store() {
        let store = Store::in_memory(registry()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = store
            .observe("stations", Predicate::All, move |records: &[Record]| {
                sink.lock().unwrap().push(records.len())
            })
            .unwrap();

        add_station(&store, "north", 0).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(store.observers(), 1);
        sub.cancel();
        assert_eq!(store.observers(), 0);
    }
}
