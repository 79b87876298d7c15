//! Observation Tests
//!
//! - Initial delivery happens before observe returns
//! - One notification per commit that changes the matching set
//! - Notifications arrive in commit order
//! - Unrelated tables and aborted units notify nobody
//! - Cancellation is idempotent

use std::sync::{Arc, Mutex};
use std::thread;

use fieldstore::adapter::MemoryAdapter;
use fieldstore::fault::{points, FaultInjector};
use fieldstore::{ColumnDef, Predicate, Record, SchemaRegistry, Store};

// =============================================================================
// Helper Functions
// =============================================================================

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
        .declare_table("sites", 1, vec![ColumnDef::string("name")])
        .unwrap();
    registry
}

type Deliveries = Arc<Mutex<Vec<Vec<String>>>>;

/// Callback that records the labels of every delivered set
fn collector() -> (Deliveries, impl Fn(&[Record]) + Send + Sync + 'static) {
    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deliveries);
    let callback = move |records: &[Record]| {
        let labels = records
            .iter()
            .map(|r| r.get_str("label").unwrap().unwrap_or_default())
            .collect();
        sink.lock().unwrap().push(labels);
    };
    (deliveries, callback)
}

fn add_station(store: &Store, label: &str, level: i32) -> Record {
    store
        .write("add station", |txn| {
            txn.create("stations", |r| {
                r.set("label", label)?;
                r.set("level", level)
            })
        })
        .unwrap()
}

// =============================================================================
// Delivery Tests
// =============================================================================

/// The current matching set is delivered once before observe returns.
#[test]
fn test_initial_delivery() {
    let store = Store::in_memory(registry()).unwrap();
    add_station(&store, "alpha", 50);

    let (deliveries, callback) = collector();
    let sub = store
        .observe("stations", Predicate::All, callback)
        .unwrap();

    assert_eq!(*deliveries.lock().unwrap(), vec![vec!["alpha".to_string()]]);
    assert!(sub.is_active());
    assert_eq!(sub.table(), "stations");
}

/// Commits that leave the matching set alone deliver nothing.
#[test]
fn test_one_notification_per_changing_commit() {
    let store = Store::in_memory(registry()).unwrap();
    let (deliveries, callback) = collector();
    let _sub = store
        .observe("stations", Predicate::gte("level", 50), callback)
        .unwrap();

    let low = add_station(&store, "low", 25);
    add_station(&store, "high", 75);
    store
        .write("site", |txn| txn.create("sites", |r| r.set("name", "yard")))
        .unwrap();
    store
        .write("still low", |txn| txn.update(&low, |r| r.set("level", 0)))
        .unwrap();
    store
        .write("raise", |txn| txn.update(&low, |r| r.set("level", 100)))
        .unwrap();
    store.write("delete", |txn| txn.delete(&low)).unwrap();

    // Records arrive in identifier order; compare label sets
    let seen: Vec<Vec<String>> = deliveries
        .lock()
        .unwrap()
        .iter()
        .map(|labels| {
            let mut sorted = labels.clone();
            sorted.sort();
            sorted
        })
        .collect();
    assert_eq!(
        seen,
        vec![
            vec![],
            vec!["high".to_string()],
            vec!["high".to_string(), "low".to_string()],
            vec!["high".to_string()],
        ]
    );
}

/// Commits that change a matched record's values notify even when the
/// set of identifiers is unchanged.
#[test]
fn test_value_change_notifies() {
    let store = Store::in_memory(registry()).unwrap();
    let record = add_station(&store, "alpha", 50);

    let (deliveries, callback) = collector();
    let _sub = store.observe("stations", Predicate::All, callback).unwrap();

    store
        .write("rename", |txn| txn.update(&record, |r| r.set("label", "beta")))
        .unwrap();

    assert_eq!(
        *deliveries.lock().unwrap(),
        vec![vec!["alpha".to_string()], vec!["beta".to_string()]]
    );
}

/// Failed and aborted units notify nobody.
#[test]
fn test_aborted_units_are_silent() {
    let faults = Arc::new(FaultInjector::new());
    let store = Store::builder(registry())
        .adapter(Arc::new(MemoryAdapter::with_faults(Arc::clone(&faults))))
        .build()
        .unwrap();

    let (deliveries, callback) = collector();
    let _sub = store.observe("stations", Predicate::All, callback).unwrap();

    let mut txn = store.begin("abandoned").unwrap();
    txn.create("stations", |r| {
        r.set("label", "ghost")?;
        r.set("level", 0)
    })
    .unwrap();
    txn.abort();

    faults.arm(points::APPLY_BATCH, 1);
    let failed = store.write("failed", |txn| {
        txn.create("stations", |r| {
            r.set("label", "ghost")?;
            r.set("level", 0)
        })
    });
    assert!(failed.is_err());

    assert_eq!(deliveries.lock().unwrap().len(), 1);
}

// =============================================================================
// Ordering Tests
// =============================================================================

/// Concurrent commits are observed one at a time, in commit order.
#[test]
fn test_notifications_follow_commit_order() {
    const WRITERS: usize = 10;
    let store = Arc::new(Store::in_memory(registry()).unwrap());

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sizes);
    let _sub = store
        .observe("stations", Predicate::All, move |records: &[Record]| {
            sink.lock().unwrap().push(records.len());
        })
        .unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                add_station(&store, &format!("s{}", i), 0);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*sizes.lock().unwrap(), (0..=WRITERS).collect::<Vec<_>>());
    assert_eq!(store.metrics().notifications, WRITERS as u64 + 1);
}

// =============================================================================
// Cancellation Tests
// =============================================================================

/// Cancel stops deliveries and a second cancel is a no-op.
#[test]
fn test_cancel_is_idempotent() {
    let store = Store::in_memory(registry()).unwrap();
    let (deliveries, callback) = collector();
    let sub = store.observe("stations", Predicate::All, callback).unwrap();

    assert!(sub.cancel());
    assert!(!sub.cancel());
    assert!(!sub.is_active());

    add_station(&store, "late", 25);
    assert_eq!(deliveries.lock().unwrap().len(), 1);
    assert_eq!(store.observers(), 0);
}

/// Observers of different tables are independent.
#[test]
fn test_observers_per_table() {
    let store = Store::in_memory(registry()).unwrap();
    let (stations, on_stations) = collector();
    let sites = Arc::new(Mutex::new(0usize));
    let sites_sink = Arc::clone(&sites);

    let _a = store
        .observe("stations", Predicate::All, on_stations)
        .unwrap();
    let _b = store
        .observe("sites", Predicate::All, move |_: &[Record]| {
            *sites_sink.lock().unwrap() += 1;
        })
        .unwrap();

    add_station(&store, "alpha", 0);
    add_station(&store, "beta", 0);

    assert_eq!(stations.lock().unwrap().len(), 3);
    assert_eq!(*sites.lock().unwrap(), 1);
}

/// Observing an unknown table or column fails without registering.
#[test]
fn test_invalid_observation_rejected() {
    let store = Store::in_memory(registry()).unwrap();
    assert!(store
        .observe("visits", Predicate::All, |_: &[Record]| {})
        .is_err());
    assert!(store
        .observe("stations", Predicate::eq("owner", "x"), |_: &[Record]| {})
        .is_err());
    assert_eq!(store.observers(), 0);
}
