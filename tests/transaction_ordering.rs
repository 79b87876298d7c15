//! Transaction Ordering Tests
//!
//! - Writers are granted the slot in arrival order
//! - N concurrent writers each commit exactly once, never interleaved
//! - updated_at never goes backwards across commits
//! - A unit held past its maximum hold time is force-aborted

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use fieldstore::clock::ManualClock;
use fieldstore::{ColumnDef, Predicate, SchemaRegistry, Store, StoreError, UnitState};

// =============================================================================
// Helper Functions
// =============================================================================

fn registry() -> Arc<SchemaRegistry> {
    let registry = Arc::new(SchemaRegistry::new());
    registry
        .declare_table(
            "visits",
            1,
            vec![ColumnDef::string("writer"), ColumnDef::number("seq")],
        )
        .unwrap();
    registry
}

fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

// =============================================================================
// FIFO Tests
// =============================================================================

/// Writers queued behind an open unit are served in arrival order.
#[test]
fn test_writers_served_in_arrival_order() {
    const WRITERS: usize = 6;
    let store = Arc::new(Store::in_memory(registry()).unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));

    let gate = store.begin("gate").unwrap();

    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let writer_store = Arc::clone(&store);
        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            writer_store
                .write(&format!("writer-{}", i), |txn| {
                    order.lock().unwrap().push(i);
                    txn.create("visits", |r| {
                        r.set("writer", format!("writer-{}", i))?;
                        r.set("seq", i as u32)
                    })
                })
                .unwrap();
        }));
        wait_until("writer to queue", || store.queued_writers() == i + 1);
    }

    gate.commit().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), (0..WRITERS).collect::<Vec<_>>());
    assert_eq!(store.queued_writers(), 0);
}

/// Every concurrent writer commits exactly once and each unit's
/// operations stay contiguous.
#[test]
fn test_concurrent_writers_commit_once_each() {
    const WRITERS: usize = 8;
    const PER_UNIT: u32 = 3;
    let store = Arc::new(Store::in_memory(registry()).unwrap());
    let sequence = Arc::new(Mutex::new(0u32));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let sequence = Arc::clone(&sequence);
            thread::spawn(move || {
                store
                    .write("batch", |txn| {
                        for _ in 0..PER_UNIT {
                            let seq = {
                                let mut next = sequence.lock().unwrap();
                                *next += 1;
                                *next
                            };
                            txn.create("visits", |r| {
                                r.set("writer", format!("w{}", i))?;
                                r.set("seq", seq)
                            })?;
                        }
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut rows: Vec<(u32, String, i64)> = store
        .query("visits", Predicate::All)
        .unwrap()
        .map(|r| {
            (
                r.get_number("seq").unwrap().unwrap() as u32,
                r.get_str("writer").unwrap().unwrap(),
                r.updated_at().unwrap(),
            )
        })
        .collect();
    rows.sort_by_key(|(seq, _, _)| *seq);

    assert_eq!(rows.len(), WRITERS * PER_UNIT as usize);
    assert_eq!(store.metrics().units_committed, WRITERS as u64);

    // Each unit's sequence numbers form one contiguous run
    for chunk in rows.chunks(PER_UNIT as usize) {
        assert!(chunk.iter().all(|(_, writer, _)| writer == &chunk[0].1));
        assert!(chunk.iter().all(|(_, _, ts)| *ts == chunk[0].2));
    }

    // Commit timestamps follow commit order
    for pair in rows.windows(2) {
        assert!(pair[1].2 >= pair[0].2);
    }
}

// =============================================================================
// Timestamp Tests
// =============================================================================

/// A clock stepping backwards never produces an earlier commit timestamp.
#[test]
fn test_updated_at_is_monotonic_when_clock_regresses() {
    let clock = Arc::new(ManualClock::new(10_000));
    let store = Store::builder(registry()).clock(clock.clone()).build().unwrap();

    let record = store
        .write("first", |txn| {
            txn.create("visits", |r| {
                r.set("writer", "a")?;
                r.set("seq", 1)
            })
        })
        .unwrap();
    assert_eq!(record.updated_at(), Some(10_000));

    clock.set(9_000);
    let updated = store
        .write("second", |txn| txn.update(&record, |r| r.set("seq", 2)))
        .unwrap();

    assert_eq!(updated.updated_at(), Some(10_000));
    assert_eq!(updated.created_at(), Some(10_000));

    clock.set(12_000);
    let again = store
        .write("third", |txn| txn.update(&updated, |r| r.set("seq", 3)))
        .unwrap();
    assert_eq!(again.created_at(), Some(10_000));
    assert_eq!(again.updated_at(), Some(12_000));
}

/// All records of one unit carry the same commit timestamp.
#[test]
fn test_single_timestamp_per_unit() {
    let clock = Arc::new(ManualClock::new(500));
    let store = Store::builder(registry()).clock(clock).build().unwrap();

    let (a, b) = store
        .write("pair", |txn| {
            let a = txn.create("visits", |r| {
                r.set("writer", "a")?;
                r.set("seq", 1)
            })?;
            let b = txn.create("visits", |r| {
                r.set("writer", "b")?;
                r.set("seq", 2)
            })?;
            Ok((a, b))
        })
        .unwrap();

    assert_eq!(a.created_at(), Some(500));
    assert_eq!(a.updated_at(), b.updated_at());
}

// =============================================================================
// Maximum Hold Time Tests
// =============================================================================

/// A stalled unit is force-aborted by the next writer and its owner sees
/// TransactionTimeout.
#[test]
fn test_stalled_unit_times_out() {
    let store = Arc::new(
        Store::builder(registry())
            .max_hold(Duration::from_millis(50))
            .build()
            .unwrap(),
    );

    let mut stalled = store.begin("stalled").unwrap();
    let staged = stalled
        .create("visits", |r| {
            r.set("writer", "stalled")?;
            r.set("seq", 1)
        })
        .unwrap();

    let next = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store
                .write("next", |txn| {
                    txn.create("visits", |r| {
                        r.set("writer", "next")?;
                        r.set("seq", 2)
                    })
                })
                .unwrap()
        })
    };
    let committed = next.join().unwrap();

    assert_eq!(stalled.state(), UnitState::Aborted);
    assert!(!staged.is_attached());
    assert!(matches!(
        stalled.create("visits", |r| r.set("seq", 3)),
        Err(StoreError::TransactionTimeout { .. })
    ));
    let err = stalled.commit().unwrap_err();
    assert!(matches!(err, StoreError::TransactionTimeout { .. }));

    let writers: Vec<String> = store
        .query("visits", Predicate::All)
        .unwrap()
        .map(|r| r.get_str("writer").unwrap().unwrap())
        .collect();
    assert_eq!(writers, vec!["next".to_string()]);
    assert!(store.find("visits", committed.id()).is_ok());

    let metrics = store.metrics();
    assert_eq!(metrics.units_timed_out, 1);
    assert_eq!(metrics.units_committed, 1);
}

/// The owner notices its own expired hold time at the next operation.
#[test]
fn test_owner_detects_own_timeout() {
    let store = Store::builder(registry())
        .max_hold(Duration::from_millis(20))
        .build()
        .unwrap();

    let mut txn = store.begin("slow").unwrap();
    thread::sleep(Duration::from_millis(40));

    assert!(matches!(
        txn.create("visits", |r| {
            r.set("writer", "slow")?;
            r.set("seq", 1)
        }),
        Err(StoreError::TransactionTimeout { .. })
    ));
    drop(txn);

    // The slot is free again
    store
        .write("after", |txn| {
            txn.create("visits", |r| {
                r.set("writer", "after")?;
                r.set("seq", 2)
            })
        })
        .unwrap();
    assert_eq!(store.count("visits", Predicate::All).unwrap(), 1);
}
