//! Live observation of query results
//!
//! An observer is a table, a predicate and a callback. The callback gets the
//! full matching set once at registration and again after every committed
//! unit that touched the table and changed that set.
//!
//! Notifications run on the committing thread while it still holds the
//! write slot, so they arrive in commit order. A callback must not begin a
//! unit of work synchronously.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::adapter::PersistenceAdapter;
use crate::clock::Timestamp;
use crate::error::StoreResult;
use crate::model::Record;
use crate::observability::{log_event_at, Event, MetricsRegistry, Severity};
use crate::schema::{SchemaRegistry, TableDef};
use crate::value::Value;

use super::predicate::Predicate;
use super::reader::Reader;

type Callback = Box<dyn Fn(&[Record]) + Send + Sync>;

/// Identity and content of a delivered matching set
type Fingerprint = Vec<(String, Option<Timestamp>, BTreeMap<String, Value>)>;

fn fingerprint(records: &[Record]) -> Fingerprint {
    records
        .iter()
        .map(|r| (r.id().to_string(), r.updated_at(), r.values()))
        .collect()
}

struct Observer {
    table: Arc<TableDef>,
    predicate: Predicate,
    callback: Callback,
    /// Last delivered set; the lock also serializes deliveries
    delivered: Mutex<Option<Fingerprint>>,
    active: AtomicBool,
}

/// Registry of live observers
pub struct ObservationHub {
    reader: Reader,
    metrics: Arc<MetricsRegistry>,
    next_id: AtomicU64,
    observers: Mutex<BTreeMap<u64, Arc<Observer>>>,
}

impl ObservationHub {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        adapter: Arc<dyn PersistenceAdapter>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            reader: Reader::new(registry, adapter),
            metrics,
            next_id: AtomicU64::new(1),
            observers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register an observer and deliver the current matching set to it
    /// before returning.
    pub fn observe<F>(
        self: &Arc<Self>,
        table: &str,
        predicate: Predicate,
        callback: F,
    ) -> StoreResult<Subscription>
    where
        F: Fn(&[Record]) + Send + Sync + 'static,
    {
        let table = self.reader.table(table)?;
        predicate.validate(&table)?;

        let observer = Arc::new(Observer {
            table: Arc::clone(&table),
            predicate,
            callback: Box::new(callback),
            delivered: Mutex::new(None),
            active: AtomicBool::new(true),
        });
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Held across registration so a concurrent commit waits for the
        // initial delivery and then compares against it
        let mut delivered = observer
            .delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        self.lock_observers().insert(id, Arc::clone(&observer));

        log_event_at(
            Severity::Trace,
            Event::SubscriptionOpened,
            &[("subscription", &id.to_string()), ("table", table.name())],
        );

        let records = self.matching(&observer);
        (observer.callback)(&records);
        self.metrics.increment_notifications();
        *delivered = Some(fingerprint(&records));
        drop(delivered);

        Ok(Subscription {
            id,
            table: table.name().to_string(),
            hub: Arc::downgrade(self),
        })
    }

    /// Re-evaluate observers of `tables` after a commit
    pub(crate) fn notify(&self, tables: &[String]) {
        let targets: Vec<Arc<Observer>> = self
            .lock_observers()
            .values()
            .filter(|o| tables.iter().any(|t| t == o.table.name()))
            .cloned()
            .collect();

        for observer in targets {
            let mut delivered = observer
                .delivered
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !observer.active.load(Ordering::Acquire) {
                continue;
            }

            let records = self.matching(&observer);
            let current = fingerprint(&records);
            if delivered.as_ref() == Some(&current) {
                continue;
            }

            (observer.callback)(&records);
            self.metrics.increment_notifications();
            *delivered = Some(current);
        }
    }

    /// Number of registered observers
    pub fn active_count(&self) -> usize {
        self.lock_observers().len()
    }

    fn cancel(&self, id: u64) -> bool {
        let removed = self.lock_observers().remove(&id);
        match removed {
            Some(observer) => {
                observer.active.store(false, Ordering::Release);
                log_event_at(
                    Severity::Trace,
                    Event::SubscriptionCancelled,
                    &[
                        ("subscription", &id.to_string()),
                        ("table", observer.table.name()),
                    ],
                );
                true
            }
            None => false,
        }
    }

    fn is_registered(&self, id: u64) -> bool {
        self.lock_observers().contains_key(&id)
    }

    fn matching(&self, observer: &Observer) -> Vec<Record> {
        // Validated at registration and table definitions never change
        self.reader
            .query(observer.table.name(), observer.predicate.clone())
            .map(|iter| iter.collect())
            .unwrap_or_default()
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Arc<Observer>>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ObservationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationHub")
            .field("observers", &self.active_count())
            .finish()
    }
}

/// Handle to a registered observer.
///
/// Dropping the handle leaves the observer registered; call `cancel`.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    table: String,
    hub: Weak<ObservationHub>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Stop deliveries. Returns false when already cancelled.
    pub fn cancel(&self) -> bool {
        self.hub
            .upgrade()
            .map(|hub| hub.cancel(self.id))
            .unwrap_or(false)
    }

    pub fn is_active(&self) -> bool {
        self.hub
            .upgrade()
            .map(|hub| hub.is_registered(self.id))
            .unwrap_or(false)
    }
}
