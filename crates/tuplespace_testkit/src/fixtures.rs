//! Test fixtures and space helpers.
//!
//! Provides convenience functions for setting up test spaces
//! and common test scenarios.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tuplespace_core::{
    Config, ContainerDefinition, ContainerRef, CoordinatorKind, CoordinatorSpec, RequestContext,
    Space,
};
use tuplespace_storage::{InMemoryBackend, StorageBackend};

/// A test space with automatic cleanup.
pub struct TestSpace {
    /// The space instance.
    pub space: Space,
    backend: Option<Arc<InMemoryBackend>>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestSpace {
    /// Creates a space without persistence.
    pub fn memory() -> Self {
        Self {
            space: Space::open_in_memory().expect("Failed to open in-memory space"),
            backend: None,
            temp_dir: None,
        }
    }

    /// Creates a space persisted to an [`InMemoryBackend`] that outlives
    /// the space, so it can be reopened with [`TestSpace::reopen`].
    pub fn backed() -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let space = Space::open_with_backend(
            Config::default(),
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
        )
        .expect("Failed to open backed space");
        Self {
            space,
            backend: Some(backend),
            temp_dir: None,
        }
    }

    /// Creates a space in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let space = Space::open(&Self::space_path(&temp_dir)).expect("Failed to open file space");
        Self {
            space,
            backend: None,
            temp_dir: Some(temp_dir),
        }
    }

    fn space_path(dir: &TempDir) -> PathBuf {
        dir.path().join("space")
    }

    /// Returns the space directory if file-based, None otherwise.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(Self::space_path)
    }

    /// Returns the backend of a [`TestSpace::backed`] space.
    pub fn backend(&self) -> Option<&Arc<InMemoryBackend>> {
        self.backend.as_ref()
    }

    /// Closes the space and opens it again over the same storage.
    ///
    /// A memory-only space comes back empty.
    pub fn reopen(self) -> Self {
        let Self {
            space,
            backend,
            temp_dir,
        } = self;
        space.close().expect("Failed to close space");
        drop(space);

        let space = match (&backend, &temp_dir) {
            (Some(backend), _) => Space::open_with_backend(
                Config::default(),
                Arc::clone(backend) as Arc<dyn StorageBackend>,
            ),
            (None, Some(dir)) => Space::open(&Self::space_path(dir)),
            (None, None) => Space::open_in_memory(),
        }
        .expect("Failed to reopen space");

        Self {
            space,
            backend,
            temp_dir,
        }
    }
}

impl std::ops::Deref for TestSpace {
    type Target = Space;

    fn deref(&self) -> &Self::Target {
        &self.space
    }
}

/// Runs a test with a temporary in-memory space.
///
/// # Example
///
/// ```rust
/// use tuplespace_testkit::with_temp_space;
/// use tuplespace_core::{ContainerDefinition, RequestContext};
///
/// with_temp_space(|space| {
///     let c = space
///         .create_container(ContainerDefinition::named("test"), RequestContext::new())
///         .unwrap();
///     assert_eq!(space.containers(), vec![c]);
/// });
/// ```
pub fn with_temp_space<F, R>(f: F) -> R
where
    F: FnOnce(&Space) -> R,
{
    let test_space = TestSpace::memory();
    f(&test_space.space)
}

/// Runs a test with a temporary file-based space.
pub fn with_file_space<F, R>(f: F) -> R
where
    F: FnOnce(&Space, &Path) -> R,
{
    let test_space = TestSpace::file();
    let path = test_space.path().expect("File space should have a path");
    f(&test_space.space, &path)
}

/// Creates a container with a single obligatory coordinator of `kind`.
pub fn container(space: &Space, name: &str, kind: CoordinatorKind) -> ContainerRef {
    space
        .create_container(
            ContainerDefinition::named(name).obligatory(CoordinatorSpec::new(kind)),
            RequestContext::new(),
        )
        .expect("Failed to create container")
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use tuplespace_core::{Value, WriteEntry};

    /// Creates a space with a FIFO container `queue` holding the integers
    /// `0..entry_count` in order.
    pub fn populated_queue(entry_count: usize) -> (TestSpace, ContainerRef) {
        let test_space = TestSpace::memory();
        let queue = container(&test_space, "queue", CoordinatorKind::Fifo);
        if entry_count > 0 {
            let entries = (0..entry_count)
                .map(|i| WriteEntry::new(Value::Integer(i as i64)))
                .collect();
            test_space
                .write(queue.id, entries, RequestContext::new())
                .expect("Failed to write entries");
        }
        (test_space, queue)
    }

    /// A seat record `{seat, row}`; a `None` row is a template wildcard.
    pub fn seat(number: i64, row: Option<&str>) -> Value {
        Value::record([
            ("seat", Value::Integer(number)),
            ("row", row.map_or(Value::Null, Value::from)),
        ])
    }

    /// Creates a space with a Linda container `Seats` holding one record
    /// per `(seat, row)` pair.
    pub fn seats(pairs: &[(i64, &str)]) -> (TestSpace, ContainerRef) {
        let test_space = TestSpace::memory();
        let seats = container(&test_space, "Seats", CoordinatorKind::Linda);
        let entries = pairs
            .iter()
            .map(|(number, row)| WriteEntry::new(seat(*number, Some(row))))
            .collect();
        test_space
            .write(seats.id, entries, RequestContext::new())
            .expect("Failed to write seats");
        (test_space, seats)
    }

    /// Creates a space with several unbounded containers.
    pub fn multi_container_space(container_count: usize) -> (TestSpace, Vec<ContainerRef>) {
        let test_space = TestSpace::memory();
        let containers = (0..container_count)
            .map(|i| container(&test_space, &format!("container_{i}"), CoordinatorKind::Any))
            .collect();
        (test_space, containers)
    }
}
