//! File-backed adapter
//!
//! The durable state is a single framed image at `<data_dir>/data/store.dat`.
//! A flush serializes the published snapshot, writes it to `store.dat.tmp`,
//! fsyncs it, renames it over `store.dat` and fsyncs the directory. A crash
//! at any point leaves either the previous image or the new one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::clock::Timestamp;
use crate::error::{StoreError, StoreResult};
use crate::fault::{points, FaultInjector};
use crate::model::RawRow;
use crate::observability::{log_event_at, log_event_with_fields, Event, ObservationScope, Severity};
use crate::schema::{SchemaRegistry, TableDef};

use super::{
    check_apply_faults, image, FlushOutcome, PersistenceAdapter, RowOp, TableRows, WorkingSet,
    WorkingSetCell,
};

/// Image file name inside `<data_dir>/data`
pub const IMAGE_FILE_NAME: &str = "store.dat";

const TEMP_SUFFIX: &str = "tmp";

/// Retry schedule for failed flushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRetryPolicy {
    /// Total attempts per flush, first one included
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled after each failure
    pub backoff: Duration,
}

impl Default for FlushRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Adapter backed by a single image file
#[derive(Debug)]
pub struct FileAdapter {
    dir: PathBuf,
    image_path: PathBuf,
    temp_path: PathBuf,
    state: WorkingSetCell,
    /// Generation of the last image written
    flushed_generation: AtomicU64,
    flush_lock: Mutex<()>,
    retry: FlushRetryPolicy,
    faults: Arc<FaultInjector>,
}

impl FileAdapter {
    /// Open the image under `data_dir`, creating it when absent.
    ///
    /// Fault points are armed from `FIELDSTORE_FAULT_POINT`.
    pub fn open(
        data_dir: &Path,
        registry: &SchemaRegistry,
        retry: FlushRetryPolicy,
    ) -> StoreResult<Self> {
        Self::open_with_faults(
            data_dir,
            registry,
            retry,
            Arc::new(FaultInjector::from_env()),
        )
    }

    /// Open with an explicit fault injector
    pub fn open_with_faults(
        data_dir: &Path,
        registry: &SchemaRegistry,
        retry: FlushRetryPolicy,
        faults: Arc<FaultInjector>,
    ) -> StoreResult<Self> {
        let dir = data_dir.join("data");
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::adapter_io(format!("failed to create {}", dir.display()), e)
        })?;

        let image_path = dir.join(IMAGE_FILE_NAME);
        let temp_path = dir.join(format!("{}.{}", IMAGE_FILE_NAME, TEMP_SUFFIX));

        // An interrupted flush leaves only the temporary file behind
        if temp_path.exists() {
            fs::remove_file(&temp_path).map_err(|e| {
                StoreError::adapter_io(format!("failed to remove {}", temp_path.display()), e)
            })?;
            log_event_with_fields(
                Event::StaleTempRemoved,
                &[("path", &temp_path.display().to_string())],
            );
        }

        let existing = if image_path.exists() {
            let bytes = fs::read(&image_path).map_err(|e| {
                StoreError::adapter_io(format!("failed to read {}", image_path.display()), e)
            })?;
            match image::decode(&bytes) {
                Ok(working_set) => Some(working_set),
                Err(e) => {
                    log_event_with_fields(
                        Event::DataCorruption,
                        &[
                            ("path", &image_path.display().to_string()),
                            ("reason", &e.to_string()),
                        ],
                    );
                    return Err(e);
                }
            }
        } else {
            None
        };

        let image_existed = existing.is_some();
        let mut working_set = existing.unwrap_or_default();
        let changed = reconcile(&mut working_set, registry)?;

        let generation = u64::from(changed || !image_existed);
        let adapter = Self {
            dir,
            image_path,
            temp_path,
            state: WorkingSetCell::new(working_set, generation),
            flushed_generation: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
            retry,
            faults,
        };

        if !image_existed {
            adapter.flush()?;
        }

        let snapshot = adapter.state.snapshot();
        log_event_with_fields(
            Event::ImageLoaded,
            &[
                ("path", &adapter.image_path.display().to_string()),
                ("tables", &snapshot.tables.len().to_string()),
                ("rows", &snapshot.row_count().to_string()),
                ("created", if image_existed { "false" } else { "true" }),
            ],
        );

        Ok(adapter)
    }

    /// Path of the durable image
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Write `bytes` as the new image, retrying with exponential backoff
    fn write_with_retry(&self, bytes: &[u8]) -> StoreResult<u32> {
        let mut attempt = 0;
        let mut backoff = self.retry.backoff;
        let max_attempts = self.retry.max_attempts.max(1);

        loop {
            attempt += 1;
            match self.write_image(bytes) {
                Ok(()) => return Ok(attempt),
                Err(e) if attempt < max_attempts => {
                    log_event_at(
                        Severity::Warn,
                        Event::FlushRetry,
                        &[
                            ("attempt", &attempt.to_string()),
                            ("backoff_ms", &backoff.as_millis().to_string()),
                            ("reason", &e.to_string()),
                        ],
                    );
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    log_event_at(
                        Severity::Error,
                        Event::FlushFailed,
                        &[
                            ("attempts", &attempt.to_string()),
                            ("reason", &e.to_string()),
                        ],
                    );
                    return Err(e);
                }
            }
        }
    }

    /// One copy-then-swap attempt. The temporary file is removed on failure.
    fn write_image(&self, bytes: &[u8]) -> StoreResult<()> {
        let result = self.write_image_inner(bytes);
        if result.is_err() && self.temp_path.exists() {
            // Best effort, the next open removes it anyway
            let _ = fs::remove_file(&self.temp_path);
        }
        result
    }

    fn write_image_inner(&self, bytes: &[u8]) -> StoreResult<()> {
        self.faults
            .check(points::FLUSH_BEFORE_WRITE)
            .map_err(|e| StoreError::adapter_io("image write failed", e))?;

        let mut file = File::create(&self.temp_path).map_err(|e| {
            StoreError::adapter_io(format!("failed to create {}", self.temp_path.display()), e)
        })?;
        file.write_all(bytes).map_err(|e| {
            StoreError::adapter_io(format!("failed to write {}", self.temp_path.display()), e)
        })?;
        file.sync_all().map_err(|e| {
            StoreError::adapter_io(format!("fsync failed for {}", self.temp_path.display()), e)
        })?;
        drop(file);

        self.faults
            .check(points::FLUSH_BEFORE_RENAME)
            .map_err(|e| StoreError::adapter_io("image rename failed", e))?;

        fs::rename(&self.temp_path, &self.image_path).map_err(|e| {
            StoreError::adapter_io(
                format!(
                    "failed to rename {} to {}",
                    self.temp_path.display(),
                    self.image_path.display()
                ),
                e,
            )
        })?;

        fsync_dir(&self.dir)
    }
}

/// Check stored table versions against the registry and add declared tables
/// missing from the image. Returns whether the working set changed.
fn reconcile(working_set: &mut WorkingSet, registry: &SchemaRegistry) -> StoreResult<bool> {
    let mut changed = false;

    for table in registry.tables() {
        match working_set.tables.get(table.name()) {
            Some(stored) if stored.version != table.version() => {
                let err = StoreError::SchemaVersionMismatch {
                    table: table.name().to_string(),
                    stored: stored.version,
                    registered: table.version(),
                };
                log_event_with_fields(
                    Event::SchemaVersionMismatch,
                    &[
                        ("table", table.name()),
                        ("stored", &stored.version.to_string()),
                        ("registered", &table.version().to_string()),
                    ],
                );
                return Err(err);
            }
            Some(_) => {}
            None => {
                working_set.tables.insert(
                    table.name().to_string(),
                    Arc::new(TableRows::new(table.version())),
                );
                changed = true;
            }
        }
    }

    // Kept on disk untouched; nothing can read or write them
    for name in undeclared_tables(working_set, registry) {
        log_event_at(Severity::Warn, Event::UndeclaredTable, &[("table", &name)]);
    }

    let app_version = registry.app_version();
    if working_set.app_version != app_version {
        log_event_at(
            Severity::Warn,
            Event::AppVersionChanged,
            &[
                ("stored", &working_set.app_version.to_string()),
                ("registered", &app_version.to_string()),
            ],
        );
        working_set.app_version = app_version;
        changed = true;
    }

    Ok(changed)
}

/// Tables present in the image but not declared in `registry`
fn undeclared_tables(working_set: &WorkingSet, registry: &SchemaRegistry) -> Vec<String> {
    working_set
        .tables
        .keys()
        .filter(|name| !registry.is_declared(name))
        .cloned()
        .collect()
}

/// fsync a directory so a rename inside it is durable
fn fsync_dir(path: &Path) -> StoreResult<()> {
    let dir = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| StoreError::adapter_io(format!("failed to open {}", path.display()), e))?;

    dir.sync_all().map_err(|e| {
        StoreError::adapter_io(format!("fsync directory failed: {}", path.display()), e)
    })
}

impl PersistenceAdapter for FileAdapter {
    fn read_all(&self, table: &str) -> StoreResult<Vec<RawRow>> {
        Ok(self.state.read_all(table))
    }

    fn read_one(&self, table: &str, id: &str) -> StoreResult<RawRow> {
        self.state.read_one(table, id)
    }

    fn contains_id(&self, table: &str, id: &str) -> StoreResult<bool> {
        Ok(self.state.contains_id(table, id))
    }

    fn apply_batch(&self, table: &TableDef, ops: &[RowOp]) -> StoreResult<()> {
        check_apply_faults(&self.faults, table.name())?;
        self.state.apply_batch(table, ops)
    }

    fn publish_batches(&self, commit_ts: Timestamp) -> StoreResult<()> {
        self.state.publish(commit_ts);
        Ok(())
    }

    fn discard_batches(&self) {
        self.state.discard();
    }

    fn flush(&self) -> StoreResult<FlushOutcome> {
        let _guard = self.flush_lock.lock().unwrap_or_else(|e| e.into_inner());

        let (snapshot, generation) = self.state.snapshot_with_generation();
        if generation == self.flushed_generation.load(Ordering::Acquire) {
            return Ok(FlushOutcome::Clean);
        }

        let generation_str = generation.to_string();
        let scope = ObservationScope::with_fields("FLUSH", &[("generation", &generation_str)]);

        let bytes = match image::encode(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                scope.fail(&e.to_string());
                return Err(e);
            }
        };

        match self.write_with_retry(&bytes) {
            Ok(attempts) => {
                self.flushed_generation.store(generation, Ordering::Release);
                scope.complete_with_fields(&[
                    ("bytes", &bytes.len().to_string()),
                    ("attempts", &attempts.to_string()),
                ]);
                Ok(FlushOutcome::Written {
                    generation,
                    bytes: bytes.len() as u64,
                    attempts,
                })
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn is_dirty(&self) -> bool {
        self.state.generation() != self.flushed_generation.load(Ordering::Acquire)
    }

    fn last_commit_ts(&self) -> Timestamp {
        self.state.snapshot().last_commit_ts
    }

    fn snapshot(&self) -> Arc<WorkingSet> {
        self.state.snapshot()
    }
}
