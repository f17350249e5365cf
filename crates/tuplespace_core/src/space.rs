//! Space facade.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use tuplespace_storage::{FileBackend, StorageBackend};

use crate::access::AccessManager;
use crate::aspects::Aspect;
use crate::config::{Config, PersistenceConfig};
use crate::container::{ContainerDefinition, ContainerStatsSnapshot, Entry};
use crate::context::RequestContext;
use crate::coordination::{CoordinatorRegistry, Selector};
use crate::deadlock::DeadlockCycle;
use crate::dir::SpaceDir;
use crate::error::{CoreError, CoreResult};
use crate::persistence::PersistenceContext;
use crate::runtime::{Engine, Operation, OperationResult, RequestHandle, WriteEntry};
use crate::stats::StatsSnapshot;
use crate::types::{AspectId, ContainerId, ContainerRef, TransactionId};

/// A running tuple space.
///
/// `Space` is the entry point: it owns the worker threads, the
/// containers, the transaction manager and, when persistent, the locked
/// space directory.
///
/// # Opening a Space
///
/// ```rust,ignore
/// use tuplespace_core::{ContainerDefinition, RequestContext, Selector, Count, Space, WriteEntry};
/// use std::path::Path;
///
/// let space = Space::open(Path::new("my_space"))?;
/// let jobs = space.create_container(ContainerDefinition::named("jobs"), RequestContext::new())?;
/// space.write(jobs.id, vec![WriteEntry::new("job-1")], RequestContext::new())?;
/// let taken = space.take(jobs.id, vec![Selector::any(Count::Exactly(1))], RequestContext::new())?;
/// space.close()?;
/// ```
///
/// # In-Memory Spaces
///
/// ```
/// use tuplespace_core::Space;
///
/// let space = Space::open_in_memory().unwrap();
/// assert!(space.is_open());
/// ```
pub struct Space {
    engine: Arc<Engine>,
    /// Locked directory of a file-backed space.
    dir: Option<SpaceDir>,
    is_open: RwLock<bool>,
}

impl Space {
    /// Opens or creates a file-backed space in `path`.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryLocked` if another process has the space open,
    /// or a storage error if the log cannot be replayed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a file-backed space in `path` with `config`.
    ///
    /// The persistence setting of `config` is ignored; `path` wins.
    ///
    /// # Errors
    ///
    /// See [`Space::open`].
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        Self::builder().config(config).path(path).open()
    }

    /// Opens a space on an already open backend.
    ///
    /// # Errors
    ///
    /// Fails if the backend content cannot be restored.
    pub fn open_with_backend(config: Config, backend: Arc<dyn StorageBackend>) -> CoreResult<Self> {
        Self::builder().config(config).backend(backend).open()
    }

    /// Opens a space as described by `config.persistence`.
    ///
    /// # Errors
    ///
    /// See [`Space::open`].
    pub fn with_config(config: Config) -> CoreResult<Self> {
        Self::builder().config(config).open()
    }

    /// Opens a non-persistent space with the default configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the worker threads cannot be spawned.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::builder().open()
    }

    /// Starts a builder for spaces with access control or custom
    /// coordinators.
    #[must_use]
    pub fn builder() -> SpaceBuilder {
        SpaceBuilder::default()
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Queues a request and returns its handle.
    ///
    /// # Errors
    ///
    /// Fails if the space is closed or the context names a transaction
    /// that is not running.
    pub fn submit(&self, operation: Operation, ctx: RequestContext) -> CoreResult<RequestHandle> {
        self.ensure_open()?;
        self.engine.submit(operation, ctx)
    }

    /// Runs a request and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns the request's failure.
    pub fn execute(&self, operation: Operation, ctx: RequestContext) -> CoreResult<OperationResult> {
        self.submit(operation, ctx)?.wait()
    }

    /// Creates a container.
    ///
    /// # Errors
    ///
    /// Fails with `ContainerNameNotAvailable` for a taken name or with a
    /// coordinator definition error.
    pub fn create_container(
        &self,
        definition: ContainerDefinition,
        ctx: RequestContext,
    ) -> CoreResult<ContainerRef> {
        let result = self.execute(Operation::CreateContainer(definition), ctx)?;
        result
            .container()
            .ok_or_else(|| CoreError::internal(format!("create returned {result:?}")))
    }

    /// Looks a container up by name.
    ///
    /// # Errors
    ///
    /// Returns `ContainerNotFound` if no visible container has the name.
    pub fn lookup_container(&self, name: &str, ctx: RequestContext) -> CoreResult<ContainerRef> {
        let result = self.execute(Operation::LookupContainer(name.to_string()), ctx)?;
        result
            .container()
            .ok_or_else(|| CoreError::internal(format!("lookup returned {result:?}")))
    }

    /// Destroys a container when the transaction commits.
    ///
    /// # Errors
    ///
    /// Fails if the container is locked or unknown.
    pub fn destroy_container(&self, container: ContainerId, ctx: RequestContext) -> CoreResult<()> {
        self.execute(Operation::DestroyContainer(container), ctx)
            .map(|_| ())
    }

    /// Locks a container exclusively for the transaction.
    ///
    /// # Errors
    ///
    /// Fails if the container is locked by another transaction.
    pub fn lock_container(&self, container: ContainerId, ctx: RequestContext) -> CoreResult<()> {
        self.execute(Operation::LockContainer(container), ctx)
            .map(|_| ())
    }

    /// Writes entries.
    ///
    /// # Errors
    ///
    /// Fails if the container is full, a key is taken, or coordination
    /// data is missing.
    pub fn write(
        &self,
        container: ContainerId,
        entries: Vec<WriteEntry>,
        ctx: RequestContext,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        self.execute(Operation::Write { container, entries }, ctx)
            .map(OperationResult::into_entries)
    }

    /// Reads entries.
    ///
    /// # Errors
    ///
    /// Fails if the selection cannot be satisfied in time.
    pub fn read(
        &self,
        container: ContainerId,
        selectors: Vec<Selector>,
        ctx: RequestContext,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        self.execute(
            Operation::Read {
                container,
                selectors,
            },
            ctx,
        )
        .map(OperationResult::into_entries)
    }

    /// Takes entries.
    ///
    /// # Errors
    ///
    /// Fails if the selection cannot be satisfied in time.
    pub fn take(
        &self,
        container: ContainerId,
        selectors: Vec<Selector>,
        ctx: RequestContext,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        self.execute(
            Operation::Take {
                container,
                selectors,
            },
            ctx,
        )
        .map(OperationResult::into_entries)
    }

    /// Takes entries and returns how many.
    ///
    /// # Errors
    ///
    /// Fails if the selection cannot be satisfied in time.
    pub fn delete(
        &self,
        container: ContainerId,
        selectors: Vec<Selector>,
        ctx: RequestContext,
    ) -> CoreResult<usize> {
        self.execute(
            Operation::Delete {
                container,
                selectors,
            },
            ctx,
        )
        .map(|r| r.count())
    }

    /// Reads entries and returns how many.
    ///
    /// # Errors
    ///
    /// Fails if the selection cannot be satisfied in time.
    pub fn test(
        &self,
        container: ContainerId,
        selectors: Vec<Selector>,
        ctx: RequestContext,
    ) -> CoreResult<usize> {
        self.execute(
            Operation::Test {
                container,
                selectors,
            },
            ctx,
        )
        .map(|r| r.count())
    }

    /// Registers an aspect for a container, or space-wide for `None`.
    ///
    /// # Errors
    ///
    /// Fails if the container is unknown or access is denied.
    pub fn add_aspect(
        &self,
        container: Option<ContainerId>,
        aspect: Arc<dyn Aspect>,
        ctx: RequestContext,
    ) -> CoreResult<AspectId> {
        let result = self.execute(Operation::AddAspect { container, aspect }, ctx)?;
        result
            .aspect()
            .ok_or_else(|| CoreError::internal(format!("add aspect returned {result:?}")))
    }

    /// Unregisters an aspect.
    ///
    /// # Errors
    ///
    /// Fails if the aspect is unknown.
    pub fn remove_aspect(&self, aspect: AspectId, ctx: RequestContext) -> CoreResult<()> {
        self.execute(Operation::RemoveAspect(aspect), ctx).map(|_| ())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins an explicit transaction.
    ///
    /// # Errors
    ///
    /// Fails if the space is closed.
    pub fn begin_transaction(&self) -> CoreResult<TransactionId> {
        self.ensure_open()?;
        self.engine.begin_transaction()
    }

    /// Commits a transaction.
    ///
    /// Waits up to `Config::commit_wait_timeout` for its running requests.
    /// If they do not finish in time the commit fails with `Timeout` and
    /// the transaction keeps running.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not running, an aspect rejects the
    /// commit, or the backend batch cannot be applied (the transaction is
    /// then rolled back).
    pub fn commit_transaction(&self, tx: TransactionId) -> CoreResult<()> {
        self.commit_transaction_with(tx, &RequestContext::new().transaction(tx))
    }

    /// Commits a transaction, handing `ctx` to the aspects.
    ///
    /// # Errors
    ///
    /// See [`Space::commit_transaction`].
    pub fn commit_transaction_with(&self, tx: TransactionId, ctx: &RequestContext) -> CoreResult<()> {
        self.ensure_open()?;
        self.engine.end_transaction(tx, true, ctx)
    }

    /// Rolls a transaction back.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not running or its requests do not
    /// finish in time.
    pub fn rollback_transaction(&self, tx: TransactionId) -> CoreResult<()> {
        self.ensure_open()?;
        self.engine
            .end_transaction(tx, false, &RequestContext::new().transaction(tx))
    }

    /// Runs `f` in a new transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back if it
    /// returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the commit.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(TransactionId) -> CoreResult<T>,
    {
        let tx = self.begin_transaction()?;
        match f(tx) {
            Ok(value) => {
                self.commit_transaction(tx)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback_transaction(tx) {
                    tracing::warn!(%tx, error = %rollback, "rollback after failure");
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Identity of the space, stable across restarts of a persistent space.
    #[must_use]
    pub fn space_id(&self) -> uuid::Uuid {
        self.engine.containers().space_id()
    }

    /// Runtime counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats().snapshot()
    }

    /// Operation counters of one container.
    ///
    /// # Errors
    ///
    /// Returns `ContainerNotFound` for an unknown id.
    pub fn container_stats(&self, container: ContainerId) -> CoreResult<ContainerStatsSnapshot> {
        Ok(self.engine.containers().get(container)?.stats())
    }

    /// Every container, including uncommitted ones, in id order.
    #[must_use]
    pub fn containers(&self) -> Vec<ContainerRef> {
        self.engine
            .containers()
            .containers()
            .iter()
            .map(|c| c.reference())
            .collect()
    }

    /// Number of running transactions, implicit ones included.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.engine.transactions().active_count()
    }

    /// Number of blocked requests.
    #[must_use]
    pub fn parked_requests(&self) -> usize {
        self.engine.waits().len()
    }

    /// Wait-for cycles currently present.
    #[must_use]
    pub fn deadlock_cycles(&self) -> Vec<DeadlockCycle> {
        self.engine.deadlocks().cycles()
    }

    /// Number of registered aspects.
    #[must_use]
    pub fn aspect_count(&self) -> usize {
        self.engine.aspects().len()
    }

    /// Returns true if committed transactions reach a backend.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.engine.persistence().is_some()
    }

    /// Directory of a file-backed space.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(SpaceDir::path)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Closes the space.
    ///
    /// Blocked and queued requests fail, worker threads are joined and the
    /// backend is synced. Transactions still running are discarded.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for backend errors.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.engine.shutdown();
        *is_open = false;
        Ok(())
    }

    /// Checks if the space is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation("space is closed"))
        }
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space")
            .field("engine", &self.engine)
            .field("path", &self.path())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Configures and opens a [`Space`].
///
/// ```
/// use std::sync::Arc;
/// use tuplespace_core::{AccessRule, Config, RuleAccessManager, Space};
///
/// let space = Space::builder()
///     .config(Config::default().worker_threads(2))
///     .access_manager(Arc::new(RuleAccessManager::new(vec![AccessRule::permit()])))
///     .open()
///     .unwrap();
/// assert_eq!(space.config().worker_threads, 2);
/// ```
#[derive(Default)]
pub struct SpaceBuilder {
    config: Config,
    path: Option<std::path::PathBuf>,
    backend: Option<Arc<dyn StorageBackend>>,
    registry: Option<CoordinatorRegistry>,
    access: Option<Arc<dyn AccessManager>>,
}

impl SpaceBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Persists the space in `path`, overriding `config.persistence`.
    #[must_use]
    pub fn path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }

    /// Persists the space in `backend`. Wins over any path.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Uses a registry with custom coordinator kinds.
    #[must_use]
    pub fn registry(mut self, registry: CoordinatorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Enables access control.
    #[must_use]
    pub fn access_manager(mut self, access: Arc<dyn AccessManager>) -> Self {
        self.access = Some(access);
        self
    }

    /// Opens the space.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryLocked` if the directory is in use, a storage
    /// error if the log cannot be replayed, or a restore error.
    pub fn open(self) -> CoreResult<Space> {
        let path = self.path.or(match &self.config.persistence {
            PersistenceConfig::File { dir } => Some(dir.clone()),
            PersistenceConfig::InMemory => None,
        });

        let (dir, backend) = match (self.backend, path) {
            (Some(backend), _) => (None, Some(backend)),
            (None, Some(path)) => {
                let dir = SpaceDir::open(&path, true)?;
                let file = FileBackend::open_with_create_dirs(&dir.log_path())?;
                // Commits sync through the persistence context.
                file.set_sync_on_apply(false);
                let report = file.replay_report();
                info!(path = %path.display(), report = ?report, "space log replayed");
                (Some(dir), Some(Arc::new(file) as Arc<dyn StorageBackend>))
            }
            (None, None) => (None, None),
        };

        let persistence = backend
            .map(|b| Arc::new(PersistenceContext::new(b, self.config.sync_on_commit)));
        let engine = Engine::start(
            self.config,
            persistence,
            self.registry.unwrap_or_default(),
            self.access,
        )?;
        Ok(Space {
            engine,
            dir,
            is_open: RwLock::new(true),
        })
    }
}

impl fmt::Debug for SpaceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpaceBuilder")
            .field("config", &self.config)
            .field("path", &self.path)
            .field("backend", &self.backend.is_some())
            .field("access", &self.access.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestTimeout;
    use crate::coordination::{CoordinatorKind, CoordinatorSpec, Count};
    use tempfile::tempdir;
    use tuplespace_codec::Value;

    fn ctx() -> RequestContext {
        RequestContext::new()
    }

    fn values(entries: &[Arc<Entry>]) -> Vec<Value> {
        entries.iter().map(|e| e.value().clone()).collect()
    }

    #[test]
    fn open_in_memory() {
        let space = Space::open_in_memory().unwrap();
        assert!(space.is_open());
        assert!(!space.is_persistent());
        assert!(space.path().is_none());
    }

    #[test]
    fn write_then_take_fifo() {
        let space = Space::open_in_memory().unwrap();
        let def = ContainerDefinition::named("q")
            .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo));
        let q = space.create_container(def, ctx()).unwrap();
        space
            .write(
                q.id,
                vec![WriteEntry::new(1), WriteEntry::new(2), WriteEntry::new(3)],
                ctx(),
            )
            .unwrap();
        let taken = space
            .take(q.id, vec![Selector::fifo(Count::Exactly(2))], ctx())
            .unwrap();
        assert_eq!(values(&taken), [Value::from(1), Value::from(2)]);
        assert_eq!(
            space
                .test(q.id, vec![Selector::fifo(Count::All)], ctx())
                .unwrap(),
            1
        );
        assert_eq!(space.lookup_container("q", ctx()).unwrap(), q);
    }

    #[test]
    fn transaction_helper_commits_and_rolls_back() {
        let space = Space::open_in_memory().unwrap();
        let c = space
            .create_container(ContainerDefinition::new(), ctx())
            .unwrap();

        space
            .transaction(|tx| {
                space.write(c.id, vec![WriteEntry::new("kept")], ctx().transaction(tx))?;
                Ok(())
            })
            .unwrap();
        let failed: CoreResult<()> = space.transaction(|tx| {
            space.write(c.id, vec![WriteEntry::new("dropped")], ctx().transaction(tx))?;
            Err(CoreError::invalid_operation("abort"))
        });
        assert!(failed.is_err());

        let all = space
            .read(c.id, vec![Selector::any(Count::All)], ctx())
            .unwrap();
        assert_eq!(values(&all), [Value::from("kept")]);
        assert_eq!(space.active_transactions(), 0);
    }

    #[test]
    fn zero_timeout_fails_fast() {
        let space = Space::open_in_memory().unwrap();
        let c = space
            .create_container(ContainerDefinition::new(), ctx())
            .unwrap();
        let err = space
            .take(
                c.id,
                vec![Selector::any(Count::Exactly(1))],
                ctx().timeout(RequestTimeout::Zero),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::CountNotMet { .. }));
        assert_eq!(space.parked_requests(), 0);
    }

    #[test]
    fn closed_space_rejects_requests() {
        let space = Space::open_in_memory().unwrap();
        space.close().unwrap();
        space.close().unwrap();
        assert!(!space.is_open());
        assert!(space.begin_transaction().is_err());
        assert!(space
            .create_container(ContainerDefinition::new(), ctx())
            .is_err());
    }

    #[test]
    fn file_space_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("space");
        let id = {
            let space = Space::open(&path).unwrap();
            assert!(space.is_persistent());
            let c = space
                .create_container(ContainerDefinition::named("jobs"), ctx())
                .unwrap();
            space
                .write(c.id, vec![WriteEntry::new("a"), WriteEntry::new("b")], ctx())
                .unwrap();
            space.close().unwrap();
            space.space_id()
        };

        let space = Space::open(&path).unwrap();
        assert_eq!(space.space_id(), id);
        let jobs = space.lookup_container("jobs", ctx()).unwrap();
        let all = space
            .read(jobs.id, vec![Selector::any(Count::All)], ctx())
            .unwrap();
        assert_eq!(values(&all), [Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn second_open_of_a_directory_is_refused() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("space");
        let _first = Space::open(&path).unwrap();
        assert!(matches!(
            Space::open(&path),
            Err(CoreError::DirectoryLocked)
        ));
    }
}
