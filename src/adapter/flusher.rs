//! Background flusher
//!
//! Flushes a dirty adapter on a fixed cadence and once more when stopped.
//! Tick failures are logged and counted; the next tick tries again. The
//! final flush runs on the stopping thread and its result is returned.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

use super::{FlushOutcome, PersistenceAdapter};

/// Flush `adapter` and record the outcome in `metrics`
pub fn run_flush(
    adapter: &dyn PersistenceAdapter,
    metrics: &MetricsRegistry,
) -> StoreResult<FlushOutcome> {
    match adapter.flush() {
        Ok(outcome) => {
            if let FlushOutcome::Written { bytes, .. } = outcome {
                metrics.record_flush(bytes);
            }
            Ok(outcome)
        }
        Err(e) => {
            metrics.increment_flush_failures();
            Err(e)
        }
    }
}

#[derive(Debug)]
struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the background flush thread
#[derive(Debug)]
pub struct Flusher {
    adapter: Arc<dyn PersistenceAdapter>,
    metrics: Arc<MetricsRegistry>,
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    /// Spawn the flush thread
    pub fn start(
        adapter: Arc<dyn PersistenceAdapter>,
        metrics: Arc<MetricsRegistry>,
        interval: Duration,
    ) -> StoreResult<Self> {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let thread_adapter = Arc::clone(&adapter);
        let thread_metrics = Arc::clone(&metrics);
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("fieldstore-flusher".into())
            .spawn(move || flush_loop(thread_adapter, thread_metrics, interval, thread_signal))
            .map_err(|e| StoreError::adapter_io("failed to spawn flusher thread", e))?;

        log_event_with_fields(
            Event::FlusherStarted,
            &[("interval_ms", &interval.as_millis().to_string())],
        );

        Ok(Self {
            adapter,
            metrics,
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the thread, then flush whatever is still dirty.
    ///
    /// Returns the final flush result. Once stopped, later calls do nothing
    /// and return `Ok(FlushOutcome::Clean)`.
    pub fn stop(&mut self) -> StoreResult<FlushOutcome> {
        let Some(handle) = self.handle.take() else {
            return Ok(FlushOutcome::Clean);
        };

        {
            let mut stopped = self.signal.stopped.lock().unwrap_or_else(|e| e.into_inner());
            *stopped = true;
        }
        self.signal.wake.notify_all();

        // A panicked flush thread leaves the adapter as it was
        let _ = handle.join();

        if self.adapter.is_dirty() {
            run_flush(self.adapter.as_ref(), &self.metrics)
        } else {
            Ok(FlushOutcome::Clean)
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        // Failures are already logged by the adapter and counted
        let _ = self.stop();
    }
}

fn flush_loop(
    adapter: Arc<dyn PersistenceAdapter>,
    metrics: Arc<MetricsRegistry>,
    interval: Duration,
    signal: Arc<Signal>,
) {
    loop {
        let stopped = {
            let guard = signal.stopped.lock().unwrap_or_else(|e| e.into_inner());
            let (guard, _) = signal
                .wake
                .wait_timeout_while(guard, interval, |stopped| !*stopped)
                .unwrap_or_else(|e| e.into_inner());
            *guard
        };

        if stopped {
            break;
        }

        if adapter.is_dirty() {
            // Failures are logged by the adapter and counted here
            let _ = run_flush(adapter.as_ref(), &metrics);
        }
    }

    log_event_with_fields(
        Event::FlusherStopped,
        &[("dirty", if adapter.is_dirty() { "true" } else { "false" })],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FileAdapter, FlushRetryPolicy, RowOp};
    use crate::fault::{points, FaultInjector};
    use crate::model::RawRow;
    use crate::schema::{ColumnDef, SchemaRegistry};
    use std::collections::BTreeMap;
    use std::time::Instant;
    use tempfile::TempDir;

    fn setup(temp: &TempDir) -> (Arc<FileAdapter>, SchemaRegistry) {
        let registry = SchemaRegistry::new();
        registry
            .declare_table("stations", 1, vec![ColumnDef::string("label")])
            .unwrap();
        let adapter =
            FileAdapter::open(temp.path(), &registry, FlushRetryPolicy::default()).unwrap();
        (Arc::new(adapter), registry)
    }

    fn commit(adapter: &FileAdapter, registry: &SchemaRegistry) {
        let table = registry.resolve("stations").unwrap();
        let row = RawRow {
            id: "a".into(),
            values: BTreeMap::from([("label".to_string(), crate::value::Value::from("north"))]),
            created_at: 1,
            updated_at: 1,
        };
        adapter.apply_batch(&table, &[RowOp::Insert(row)]).unwrap();
        adapter.publish_batches(1).unwrap();
    }

    #[test]
    fn test_periodic_flush() {
        let temp = TempDir::new().unwrap();
        let (adapter, registry) = setup(&temp);
        let metrics = Arc::new(MetricsRegistry::new());
        let mut flusher =
            Flusher::start(adapter.clone(), metrics.clone(), Duration::from_millis(10)).unwrap();

        commit(&adapter, &registry);
        let deadline = Instant::now() + Duration::from_secs(5);
        while adapter.is_dirty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!adapter.is_dirty());

        flusher.stop().unwrap();
        assert!(!flusher.is_running());
        assert!(metrics.snapshot().flushes >= 1);
    }

    #[test]
    fn test_final_flush_on_stop() {
        let temp = TempDir::new().unwrap();
        let (adapter, registry) = setup(&temp);
        let metrics = Arc::new(MetricsRegistry::new());
        let mut flusher =
            Flusher::start(adapter.clone(), metrics, Duration::from_secs(3600)).unwrap();

        commit(&adapter, &registry);
        assert!(adapter.is_dirty());
        assert!(matches!(
            flusher.stop().unwrap(),
            FlushOutcome::Written { .. }
        ));
        assert!(!adapter.is_dirty());

        // Second stop is a no-op
        assert_eq!(flusher.stop().unwrap(), FlushOutcome::Clean);
    }

    #[test]
    fn test_final_flush_failure_returned() {
        let temp = TempDir::new().unwrap();
        let registry = SchemaRegistry::new();
        registry
            .declare_table("stations", 1, vec![ColumnDef::string("label")])
            .unwrap();
        let faults = Arc::new(FaultInjector::new());
        let retry = FlushRetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let adapter = Arc::new(
            FileAdapter::open_with_faults(temp.path(), &registry, retry, Arc::clone(&faults))
                .unwrap(),
        );
        let metrics = Arc::new(MetricsRegistry::new());
        let mut flusher =
            Flusher::start(adapter.clone(), metrics.clone(), Duration::from_secs(3600)).unwrap();

        commit(&adapter, &registry);
        faults.arm(points::FLUSH_BEFORE_WRITE, 2);

        assert!(matches!(flusher.stop(), Err(StoreError::AdapterIo { .. })));
        assert!(adapter.is_dirty());
        assert_eq!(metrics.snapshot().flush_failures, 1);
    }
}
