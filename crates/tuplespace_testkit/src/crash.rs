//! Crash recovery testing for persistent spaces.
//!
//! This module simulates crashes at various points and verifies that the
//! space recovers to its last committed state.
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - Committed entries survive a reopen
//! 2. **Crash before commit** - Entries of a running transaction vanish
//! 3. **Torn log tail** - A half-written last frame is cut off on open
//! 4. **Backend failure** - A failing batch aborts the transaction
//!
//! ## Usage
//!
//! ```rust
//! use tuplespace_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
//! assert!(harness.test_committed_data_survives().passed);
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tuplespace_core::{
    Config, ContainerDefinition, CoordinatorKind, CoordinatorSpec, CoreError, CoreResult, Count,
    RequestContext, Selector, Space, SpaceDir, Value, WriteEntry,
};
use tuplespace_storage::{StorageBackend, StorageError, StorageResult, WriteBatch};

const CONTAINER: &str = "crash";

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash while a transaction is still running.
    BeforeCommit,
    /// Crash after the commit batch reached the log.
    AfterCommit,
    /// Crash in the middle of appending the last frame.
    DuringLogWrite,
    /// The backend rejects the commit batch.
    DuringApply,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected entries after recovery.
    pub expected_entries: usize,
    /// Actual entries after recovery.
    pub actual_entries: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, entries: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_entries: entries,
            actual_entries: entries,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_entries: expected,
            actual_entries: actual,
            error: Some(error.to_string()),
        }
    }

    fn compare(description: &str, expected: usize, actual: usize) -> Self {
        if expected == actual {
            Self::pass(description, expected)
        } else {
            Self::fail(description, expected, actual, "entry count mismatch")
        }
    }
}

/// A storage backend wrapper that can simulate crashes.
///
/// After the configured number of batches every `apply` fails and no
/// further change reaches the inner backend.
pub struct CrashableBackend {
    inner: Arc<dyn StorageBackend>,
    crash_after_batches: AtomicUsize,
    batches_applied: AtomicUsize,
    crashed: AtomicBool,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            crash_after_batches: AtomicUsize::new(usize::MAX),
            batches_applied: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        }
    }

    /// Sets the backend to crash once `batches` more batches were applied.
    pub fn crash_after(&self, batches: usize) {
        let applied = self.batches_applied.load(Ordering::SeqCst);
        self.crash_after_batches
            .store(applied.saturating_add(batches), Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.crash_after_batches.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// The wrapped backend, holding whatever was applied before the crash.
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    fn crash(&self) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "simulated crash during apply",
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        if self.has_crashed()
            || self.batches_applied.load(Ordering::SeqCst)
                >= self.crash_after_batches.load(Ordering::SeqCst)
        {
            return Err(self.crash());
        }
        self.inner.apply(batch)?;
        self.batches_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn len(&self) -> StorageResult<usize> {
        self.inner.len()
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Path to the test space directory.
    pub space_path: PathBuf,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
    _temp_dir: Option<TempDir>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new(space_path: impl AsRef<Path>) -> Self {
        Self {
            space_path: space_path.as_ref().to_path_buf(),
            results: Vec::new(),
            _temp_dir: None,
        }
    }

    /// Creates a new harness in a temporary directory.
    pub fn with_temp_dir() -> std::io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let mut harness = Self::new(temp_dir.path().join("space"));
        harness._temp_dir = Some(temp_dir);
        Ok(harness)
    }

    fn open_fresh(&self) -> CoreResult<Space> {
        if self.space_path.exists() {
            std::fs::remove_dir_all(&self.space_path)?;
        }
        Space::open(&self.space_path)
    }

    fn reopen(&self) -> CoreResult<Space> {
        Space::open(&self.space_path)
    }

    fn log_path(&self) -> CoreResult<PathBuf> {
        Ok(SpaceDir::open(&self.space_path, false)?.log_path())
    }

    /// Runs every scenario and returns the results.
    pub fn run_all(&mut self) -> Vec<CrashRecoveryResult> {
        for point in [
            CrashPoint::AfterCommit,
            CrashPoint::BeforeCommit,
            CrashPoint::DuringLogWrite,
            CrashPoint::DuringApply,
        ] {
            self.run(point);
        }
        self.results.clone()
    }

    /// Runs the scenario for `point`.
    pub fn run(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        match point {
            CrashPoint::AfterCommit => self.test_committed_data_survives(),
            CrashPoint::BeforeCommit => self.test_uncommitted_data_discarded(),
            CrashPoint::DuringLogWrite => self.test_torn_tail_discarded(),
            CrashPoint::DuringApply => self.test_failed_apply_rolls_back(),
        }
    }

    fn record(&mut self, description: &str, expected: usize, outcome: CoreResult<usize>) -> CrashRecoveryResult {
        let result = match outcome {
            Ok(actual) => CrashRecoveryResult::compare(description, expected, actual),
            Err(e) => CrashRecoveryResult::fail(description, expected, 0, &e.to_string()),
        };
        self.results.push(result.clone());
        result
    }

    /// Tests that committed entries survive a crash.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let space = self.open_fresh()?;
            let c = create(&space)?;
            for i in 0..10 {
                write(&space, c, i, RequestContext::new())?;
            }
            // Dropping without close still releases the directory lock.
            drop(space);

            count(&self.reopen()?)
        })();
        self.record("Committed data survives crash", 10, outcome)
    }

    /// Tests that entries of an unfinished transaction are discarded.
    pub fn test_uncommitted_data_discarded(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let space = self.open_fresh()?;
            let c = create(&space)?;
            write(&space, c, 0, RequestContext::new())?;

            let tx = space.begin_transaction()?;
            for i in 1..5 {
                write(&space, c, i, RequestContext::new().transaction(tx))?;
            }
            drop(space);

            count(&self.reopen()?)
        })();
        self.record("Uncommitted data discarded after crash", 1, outcome)
    }

    /// Tests that a half-written last frame is cut off and the entries
    /// of earlier frames are kept.
    pub fn test_torn_tail_discarded(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let space = self.open_fresh()?;
            let c = create(&space)?;
            for i in 0..3 {
                write(&space, c, i, RequestContext::new())?;
            }
            space.close()?;
            drop(space);

            // Cut one byte off the frame of the last write.
            let log = self.log_path()?;
            let file = OpenOptions::new().write(true).open(&log)?;
            let len = file.metadata()?.len();
            file.set_len(len.saturating_sub(1))?;
            drop(file);

            count(&self.reopen()?)
        })();
        self.record("Torn log tail discarded", 2, outcome)
    }

    /// Tests that a batch the backend rejects aborts its transaction in
    /// memory too, and that nothing of it reaches storage.
    pub fn test_failed_apply_rolls_back(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let inner: Arc<dyn StorageBackend> = Arc::new(tuplespace_storage::InMemoryBackend::new());
            let backend = Arc::new(CrashableBackend::new(Arc::clone(&inner)));
            let space = Space::open_with_backend(
                Config::default(),
                Arc::clone(&backend) as Arc<dyn StorageBackend>,
            )?;
            let c = create(&space)?;
            write(&space, c, 0, RequestContext::new())?;

            backend.crash_after(0);
            if write(&space, c, 1, RequestContext::new()).is_ok() {
                return Err(CoreError::internal("write succeeded on a crashed backend"));
            }
            let live = count(&space)?;
            if live != 1 {
                return Err(CoreError::internal(format!(
                    "{live} entries visible after failed commit"
                )));
            }
            space.close()?;
            drop(space);

            count(&Space::open_with_backend(Config::default(), inner)?)
        })();
        self.record("Failed apply rolls back", 1, outcome)
    }
}

fn create(space: &Space) -> CoreResult<tuplespace_core::ContainerRef> {
    space.create_container(
        ContainerDefinition::named(CONTAINER).obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo)),
        RequestContext::new(),
    )
}

fn write(
    space: &Space,
    container: tuplespace_core::ContainerRef,
    i: i64,
    ctx: RequestContext,
) -> CoreResult<()> {
    space
        .write(container.id, vec![WriteEntry::new(Value::Integer(i))], ctx)
        .map(|_| ())
}

fn count(space: &Space) -> CoreResult<usize> {
    let c = space.lookup_container(CONTAINER, RequestContext::new())?;
    space.test(c.id, vec![Selector::fifo(Count::All)], RequestContext::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_passed(result: &CrashRecoveryResult) {
        assert!(result.passed, "{}: {:?}", result.description, result);
    }

    #[test]
    fn test_committed_data_survives() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        assert_passed(&harness.test_committed_data_survives());
    }

    #[test]
    fn test_uncommitted_data_discarded() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        assert_passed(&harness.test_uncommitted_data_discarded());
    }

    #[test]
    fn test_torn_tail_discarded() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        assert_passed(&harness.test_torn_tail_discarded());
    }

    #[test]
    fn test_failed_apply_rolls_back() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        assert_passed(&harness.test_failed_apply_rolls_back());
    }

    #[test]
    fn test_run_all_collects_results() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        let results = harness.run_all();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.passed), "{results:?}");
    }

    #[test]
    fn test_crashable_backend_stops_applying() {
        let inner: Arc<dyn StorageBackend> = Arc::new(tuplespace_storage::InMemoryBackend::new());
        let backend = CrashableBackend::new(Arc::clone(&inner));
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v".to_vec());

        backend.crash_after(1);
        backend.apply(&batch).unwrap();
        assert!(backend.apply(&batch).is_err());
        assert!(backend.has_crashed());
        assert_eq!(inner.len().unwrap(), 1);

        backend.reset();
        backend.apply(&batch).unwrap();
    }
}
