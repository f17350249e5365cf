//! Executes tasks: one sub-transaction per attempt, parking on conflicts,
//! waking others afterwards.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::access::{AccessManager, AuthorizationResult};
use crate::aspects::{AspectCall, AspectManager, AspectResult};
use crate::config::Config;
use crate::container::{ContainerDescriptor, ContainerManager, Entry};
use crate::context::{RequestContext, RequestTimeout};
use crate::coordination::{CoordinatorRegistry, EntryFilter};
use crate::deadlock::DeadlockDetector;
use crate::error::{BlockReason, CoreError, CoreResult};
use crate::isolation::{LockTable, SubTransaction, Transaction, TransactionManager, TransactionStatus};
use crate::persistence::{PersistenceContext, StoredSpace};
use crate::runtime::operation::{Operation, OperationKind, OperationResult};
use crate::runtime::pool::WorkerPool;
use crate::runtime::task::{RequestHandle, Task};
use crate::stats::SpaceStats;
use crate::types::{ContainerId, TaskId, TransactionId};
use crate::wait::{
    BlockedOn, Enqueued, EventCategory, TimeoutProcessor, WaitCreateContainerLogItem,
    WaitDestroyContainerLogItem, WaitManager,
};

/// How one attempt ended.
enum Outcome {
    Done {
        result: OperationResult,
        containers: BTreeSet<ContainerId>,
        events: Vec<EventCategory>,
    },
    Failed {
        error: CoreError,
        containers: BTreeSet<ContainerId>,
    },
    Blocked {
        on: BlockedOn,
        error: CoreError,
        containers: BTreeSet<ContainerId>,
    },
}

fn closed() -> CoreError {
    CoreError::invalid_operation("space is closed")
}

/// Everything a running space shares between its threads.
pub(crate) struct Engine {
    config: Config,
    stats: Arc<SpaceStats>,
    txs: TransactionManager,
    containers: Arc<ContainerManager>,
    waits: Arc<WaitManager>,
    deadlocks: Arc<DeadlockDetector>,
    aspects: AspectManager,
    access: Option<Arc<dyn AccessManager>>,
    persistence: Option<Arc<PersistenceContext>>,
    pool: OnceLock<WorkerPool>,
    timeouts: OnceLock<TimeoutProcessor>,
    next_task: AtomicU64,
    closed: AtomicBool,
}

impl Engine {
    /// Builds the engine, restores persisted state and starts the worker
    /// and timeout threads.
    pub(crate) fn start(
        config: Config,
        persistence: Option<Arc<PersistenceContext>>,
        registry: CoordinatorRegistry,
        access: Option<Arc<dyn AccessManager>>,
    ) -> CoreResult<Arc<Self>> {
        let space = match &persistence {
            Some(p) => p.space_id()?,
            None => uuid::Uuid::new_v4(),
        };
        let stats = Arc::new(SpaceStats::new());
        let deadlocks = Arc::new(DeadlockDetector::new(
            config.deadlock_detection,
            Arc::clone(&stats),
        ));
        let locks = Arc::new(LockTable::new());

        let engine = Arc::new_cyclic(|weak: &Weak<Engine>| {
            let rescheduler = Weak::clone(weak);
            let waits = Arc::new(WaitManager::new(
                Arc::clone(&deadlocks),
                Arc::clone(&stats),
                Box::new(move |task: Arc<Task>| match rescheduler.upgrade() {
                    Some(engine) => engine.schedule(task),
                    None => {
                        task.complete(Err(closed()));
                    }
                }),
            ));
            Engine {
                txs: TransactionManager::new(persistence.clone(), Arc::clone(&stats)),
                containers: Arc::new(ContainerManager::new(space, locks, registry)),
                waits,
                deadlocks,
                aspects: AspectManager::new(),
                access,
                persistence,
                pool: OnceLock::new(),
                timeouts: OnceLock::new(),
                next_task: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                stats,
                config,
            }
        });

        if let Some(p) = &engine.persistence {
            engine.restore(p.load()?)?;
        }

        let pool = WorkerPool::start(Arc::downgrade(&engine), engine.config.worker_threads)?;
        let _ = engine.pool.set(pool);
        let weak = Arc::downgrade(&engine);
        let timeouts = TimeoutProcessor::start(
            Arc::clone(&engine.waits),
            Box::new(move |task: Arc<Task>| {
                if let Some(engine) = weak.upgrade() {
                    engine.fail_timeout(&task);
                } else {
                    task.complete(Err(closed()));
                }
            }),
        );
        match timeouts {
            Ok(t) => {
                let _ = engine.timeouts.set(t);
            }
            Err(e) => {
                engine.shutdown();
                return Err(e);
            }
        }
        info!(space = %space, workers = engine.config.worker_threads, "space started");
        Ok(engine)
    }

    fn restore(&self, stored: StoredSpace) -> CoreResult<()> {
        let (containers, entries) = (stored.containers.len(), stored.entries.len());
        for descriptor in stored.containers {
            let container = self.containers.restore(descriptor)?;
            self.waits.add_container(container.id());
        }
        for (cid, eid, stored) in stored.entries {
            self.containers
                .get(cid)?
                .restore_entry(stored.into_entry(eid, cid))?;
        }
        if stored.orphans > 0 {
            warn!(orphans = stored.orphans, "skipped entries without a container");
        }
        info!(containers, entries, "space restored");
        Ok(())
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn stats(&self) -> &Arc<SpaceStats> {
        &self.stats
    }

    pub(crate) fn containers(&self) -> &Arc<ContainerManager> {
        &self.containers
    }

    pub(crate) fn transactions(&self) -> &TransactionManager {
        &self.txs
    }

    pub(crate) fn waits(&self) -> &WaitManager {
        &self.waits
    }

    pub(crate) fn deadlocks(&self) -> &DeadlockDetector {
        &self.deadlocks
    }

    pub(crate) fn aspects(&self) -> &AspectManager {
        &self.aspects
    }

    pub(crate) fn persistence(&self) -> Option<&Arc<PersistenceContext>> {
        self.persistence.as_ref()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(closed())
        } else {
            Ok(())
        }
    }

    /// Binds a request to its transaction and queues it.
    ///
    /// Without an explicit transaction in `ctx` the request runs in an
    /// implicit one that lives until the request finishes.
    pub(crate) fn submit(&self, operation: Operation, ctx: RequestContext) -> CoreResult<RequestHandle> {
        self.ensure_open()?;
        let tx = match ctx.transaction {
            Some(id) => self.txs.get(id)?,
            None => self.txs.begin(true)?,
        };
        let isolation = ctx.isolation.unwrap_or(self.config.default_isolation_level);
        let timeout = ctx.timeout.unwrap_or(self.config.default_request_timeout);
        let id = TaskId::new(self.next_task.fetch_add(1, Ordering::SeqCst));
        let kind = operation.kind();
        let task = Arc::new(Task::new(id, operation, ctx, isolation, timeout, tx));
        trace!(task = %id, op = %kind, tx = %task.transaction_id(), "request submitted");
        let handle = task.handle();
        self.schedule(task);
        Ok(handle)
    }

    fn schedule(&self, task: Arc<Task>) {
        match self.pool.get() {
            Some(pool) => pool.schedule(task),
            None => {
                task.complete(Err(closed()));
            }
        }
    }

    /// Runs one attempt of `task` on the calling worker.
    pub(crate) fn run(&self, task: Arc<Task>) {
        if task.is_done() {
            return;
        }
        if self.is_closed() {
            self.abandon(&task);
            return;
        }
        task.begin_attempt(self.waits.now());
        let outcome = self.execute(&task);
        self.conclude(task, outcome);
    }

    fn execute(&self, task: &Task) -> Outcome {
        let tx = task.transaction();
        let stx = match tx.new_sub_transaction() {
            Ok(stx) => stx,
            Err(error) => {
                return Outcome::Failed {
                    error,
                    containers: BTreeSet::new(),
                }
            }
        };
        let op = task.operation();
        let call = AspectCall {
            kind: op.kind(),
            container: op.container(),
            transaction: tx.id(),
            context: task.context(),
        };

        let mut events = Vec::new();
        match self.aspects.pre(&call) {
            AspectResult::Ok => {}
            AspectResult::OkWithEvents(more) => events.extend(more),
            AspectResult::Skip => {
                trace!(task = %task.id(), "operation skipped by aspect");
                return self.commit_attempt(task, &stx, OperationResult::Skipped, events);
            }
            AspectResult::NotOk(error) => return self.abort_attempt(task, &stx, error),
            AspectResult::Reschedule => return self.reschedule_attempt(task, &stx),
        }

        let (result, affected) = match self.apply(task, &stx) {
            Ok(done) => done,
            Err(error) => return self.abort_attempt(task, &stx, error),
        };

        match self.aspects.post(&call, &affected) {
            AspectResult::Ok | AspectResult::Skip => {}
            AspectResult::OkWithEvents(more) => events.extend(more),
            AspectResult::NotOk(error) => return self.abort_attempt(task, &stx, error),
            AspectResult::Reschedule => return self.reschedule_attempt(task, &stx),
        }

        match op.kind() {
            OperationKind::Write => events.push(EventCategory::Insert),
            OperationKind::Take | OperationKind::Delete => events.push(EventCategory::Remove),
            _ => {}
        }
        self.commit_attempt(task, &stx, result, events)
    }

    fn affected_containers(task: &Task, stx: &SubTransaction) -> BTreeSet<ContainerId> {
        let mut containers = stx.accessed_containers();
        containers.extend(task.operation().container());
        containers
    }

    fn commit_attempt(
        &self,
        task: &Task,
        stx: &SubTransaction,
        result: OperationResult,
        mut events: Vec<EventCategory>,
    ) -> Outcome {
        if let Err(error) = stx.commit() {
            return self.abort_attempt(task, stx, error);
        }
        events.push(EventCategory::UnlockShortTerm);
        events.sort_unstable();
        events.dedup();
        Outcome::Done {
            result,
            containers: Self::affected_containers(task, stx),
            events,
        }
    }

    /// Rolls the attempt back and decides between failing and parking.
    fn abort_attempt(&self, task: &Task, stx: &SubTransaction, error: CoreError) -> Outcome {
        if let Err(e) = stx.rollback() {
            error!(task = %task.id(), stx = %stx.id(), error = %e, "sub-transaction rollback failed");
        }
        let containers = Self::affected_containers(task, stx);
        let timeout = task.timeout();
        let categories = match error.block_reason() {
            None => None,
            Some(_) if timeout == RequestTimeout::Zero => None,
            Some(BlockReason::Locked(holder)) => Some((
                vec![if holder.is_long_term() {
                    EventCategory::UnlockLongTerm
                } else {
                    EventCategory::UnlockShortTerm
                }],
                (holder.tx != task.transaction_id()).then_some(holder.tx),
            )),
            Some(BlockReason::Delayable) if timeout == RequestTimeout::TryOnce => None,
            Some(BlockReason::Delayable) => {
                let category = if matches!(error, CoreError::CountNotMet { .. }) {
                    EventCategory::Insert
                } else {
                    EventCategory::Remove
                };
                Some((vec![category], None))
            }
        };
        match (categories, task.operation().container()) {
            (Some((categories, holder)), Some(container)) => Outcome::Blocked {
                on: BlockedOn {
                    container,
                    categories,
                    holder,
                },
                error,
                containers,
            },
            _ => Outcome::Failed { error, containers },
        }
    }

    fn reschedule_attempt(&self, task: &Task, stx: &SubTransaction) -> Outcome {
        if let Err(e) = stx.rollback() {
            error!(task = %task.id(), stx = %stx.id(), error = %e, "sub-transaction rollback failed");
        }
        let containers = Self::affected_containers(task, stx);
        match task.operation().container() {
            Some(container) => Outcome::Blocked {
                on: BlockedOn {
                    container,
                    categories: vec![EventCategory::Insert, EventCategory::Remove],
                    holder: None,
                },
                error: CoreError::invalid_operation("rescheduled by aspect"),
                containers,
            },
            None => Outcome::Failed {
                error: CoreError::invalid_operation(format!(
                    "{} cannot be rescheduled",
                    task.operation().kind()
                )),
                containers,
            },
        }
    }

    fn conclude(&self, task: Arc<Task>, outcome: Outcome) {
        let tx = Arc::clone(task.transaction());
        match outcome {
            Outcome::Done {
                result,
                containers,
                events,
            } => {
                let result = if tx.is_implicit() {
                    self.finish_transaction(&tx, true).map(|()| result)
                } else {
                    self.waits.process_events(tx.id(), &containers, &events, None);
                    Ok(result)
                };
                self.stats.record_request(result.is_ok());
                trace!(task = %task.id(), ok = result.is_ok(), "request finished");
                task.complete(result);
            }
            Outcome::Failed { error, containers } => {
                if tx.is_implicit() {
                    self.finish_implicit_rollback(&tx);
                } else {
                    self.waits.process_events(
                        tx.id(),
                        &containers,
                        &[EventCategory::UnlockShortTerm],
                        None,
                    );
                }
                self.stats.record_request(false);
                debug!(task = %task.id(), error = %error, "request failed");
                task.complete(Err(error));
            }
            Outcome::Blocked {
                on,
                error,
                containers,
            } => {
                task.remember_error(&error);
                if task.is_expired(Instant::now()) {
                    self.fail_timeout(&task);
                    return;
                }
                trace!(task = %task.id(), error = %error, "request blocked");
                let id = task.id();
                match self.waits.add_task(Arc::clone(&task), on) {
                    Enqueued::Queued | Enqueued::Rescheduled => {
                        self.waits.process_events(
                            tx.id(),
                            &containers,
                            &[EventCategory::UnlockShortTerm],
                            Some(id),
                        );
                    }
                    Enqueued::Closed => self.abandon(&task),
                }
            }
        }
    }

    /// Fails a task whose deadline passed.
    pub(crate) fn fail_timeout(&self, task: &Task) {
        let message = match task.last_error() {
            Some(last) => format!("{} timed out: {last}", task.id()),
            None => format!("{} timed out", task.id()),
        };
        let tx = task.transaction();
        if tx.is_implicit() {
            self.finish_implicit_rollback(tx);
        }
        self.stats.record_timeout();
        self.stats.record_request(false);
        debug!(task = %task.id(), attempts = task.attempts(), "request timed out");
        task.complete(Err(CoreError::timeout(message)));
    }

    /// Fails a task because the space is closing.
    fn abandon(&self, task: &Task) {
        let tx = task.transaction();
        if tx.is_implicit() && tx.is_active() {
            self.finish_implicit_rollback(tx);
        }
        task.complete(Err(closed()));
    }

    fn finish_implicit_rollback(&self, tx: &Transaction) {
        if let Err(e) = self.finish_transaction(tx, false) {
            error!(tx = %tx.id(), error = %e, "implicit transaction rollback failed");
        }
    }

    /// Commits or rolls back `tx` and wakes whatever its end unblocks.
    pub(crate) fn finish_transaction(&self, tx: &Transaction, commit: bool) -> CoreResult<()> {
        let wait = self.config.commit_wait_timeout;
        let result = if commit {
            tx.commit(wait)
        } else {
            tx.rollback(wait)
        };
        let containers = tx.accessed_containers();
        match tx.status() {
            TransactionStatus::Committed => {
                self.waits.process_transaction_commit(tx.id(), &containers);
            }
            TransactionStatus::Aborted => {
                self.waits.process_transaction_rollback(tx.id(), &containers);
            }
            _ => {}
        }
        if tx.status().is_finished() {
            self.txs.finished(tx);
        }
        result
    }

    /// Begins an explicit transaction.
    pub(crate) fn begin_transaction(&self) -> CoreResult<TransactionId> {
        self.ensure_open()?;
        Ok(self.txs.begin(false)?.id())
    }

    /// Finishes an explicit transaction, running the aspects around it.
    pub(crate) fn end_transaction(
        &self,
        id: TransactionId,
        commit: bool,
        ctx: &RequestContext,
    ) -> CoreResult<()> {
        let tx = self.txs.get(id)?;
        let call = AspectCall {
            kind: if commit {
                OperationKind::CommitTransaction
            } else {
                OperationKind::RollbackTransaction
            },
            container: None,
            transaction: id,
            context: ctx,
        };
        match self.aspects.pre(&call) {
            AspectResult::Ok | AspectResult::OkWithEvents(_) => {}
            AspectResult::Skip => return Ok(()),
            AspectResult::NotOk(error) => return Err(error),
            AspectResult::Reschedule => {
                return Err(CoreError::invalid_operation(format!(
                    "{} cannot be rescheduled",
                    call.kind
                )))
            }
        }
        self.finish_transaction(&tx, commit)?;
        match self.aspects.post(&call, &[]) {
            AspectResult::NotOk(error) => Err(error),
            _ => Ok(()),
        }
    }

    fn authorize(
        &self,
        descriptor: Option<&ContainerDescriptor>,
        kind: OperationKind,
        stx: &SubTransaction,
        ctx: &RequestContext,
    ) -> CoreResult<()> {
        let Some(access) = &self.access else {
            return Ok(());
        };
        match access.check_permissions(descriptor, kind, stx, ctx) {
            AuthorizationResult::Permitted => Ok(()),
            result => Err(CoreError::access_denied(format!(
                "{kind} on {} for {}: {result:?}",
                descriptor.map_or_else(|| "space".to_string(), |d| d.id.to_string()),
                ctx.subject.as_deref().unwrap_or("anonymous"),
            ))),
        }
    }

    fn with_filter<T>(
        &self,
        descriptor: &ContainerDescriptor,
        kind: OperationKind,
        ctx: &RequestContext,
        select: impl FnOnce(Option<EntryFilter<'_>>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        match &self.access {
            Some(access) => {
                let permits = |entry: &Entry| access.permits_entry(descriptor, kind, ctx, entry);
                select(Some(&permits))
            }
            None => select(None),
        }
    }

    /// Performs the operation inside `stx`. Returns the result and the
    /// entries post hooks see.
    fn apply(
        &self,
        task: &Task,
        stx: &SubTransaction,
    ) -> CoreResult<(OperationResult, Vec<Arc<Entry>>)> {
        let ctx = task.context();
        let level = task.isolation();
        let kind = task.operation().kind();
        match task.operation() {
            Operation::Write { container, entries } => {
                let c = self.containers.resolve(stx, *container)?;
                let descriptor = c.descriptor();
                self.authorize(Some(&descriptor), kind, stx, ctx)?;
                let mut written = Vec::with_capacity(entries.len());
                for e in entries {
                    let entry = c.write(stx, e.value.clone(), e.coordination_data.clone())?;
                    if let Some(access) = &self.access {
                        if !access.permits_entry(&descriptor, kind, ctx, &entry) {
                            return Err(CoreError::access_denied(format!(
                                "write of {} to {}",
                                entry.id(),
                                c.id()
                            )));
                        }
                    }
                    written.push(entry);
                }
                Ok((OperationResult::Entries(written.clone()), written))
            }
            Operation::Read {
                container,
                selectors,
            }
            | Operation::Test {
                container,
                selectors,
            } => {
                let c = self.containers.resolve(stx, *container)?;
                let descriptor = c.descriptor();
                self.authorize(Some(&descriptor), kind, stx, ctx)?;
                let found = self.with_filter(&descriptor, kind, ctx, |filter| {
                    c.read(stx, selectors, level, filter)
                })?;
                let result = if kind == OperationKind::Test {
                    OperationResult::Count(found.len())
                } else {
                    OperationResult::Entries(found.clone())
                };
                Ok((result, found))
            }
            Operation::Take {
                container,
                selectors,
            }
            | Operation::Delete {
                container,
                selectors,
            } => {
                let c = self.containers.resolve(stx, *container)?;
                let descriptor = c.descriptor();
                self.authorize(Some(&descriptor), kind, stx, ctx)?;
                let taken = self.with_filter(&descriptor, kind, ctx, |filter| {
                    c.take(stx, selectors, level, filter)
                })?;
                let result = if kind == OperationKind::Delete {
                    OperationResult::Count(taken.len())
                } else {
                    OperationResult::Entries(taken.clone())
                };
                Ok((result, taken))
            }
            Operation::CreateContainer(definition) => {
                let c = self.containers.create(stx, definition.clone())?;
                self.waits.add_container(c.id());
                stx.add_log(Box::new(WaitCreateContainerLogItem {
                    waits: Arc::clone(&self.waits),
                    container: c.id(),
                }))?;
                self.authorize(Some(&c.descriptor()), kind, stx, ctx)?;
                Ok((OperationResult::Container(c.reference()), Vec::new()))
            }
            Operation::LookupContainer(name) => {
                let c = self.containers.lookup(stx, name)?;
                self.authorize(Some(&c.descriptor()), kind, stx, ctx)?;
                Ok((OperationResult::Container(c.reference()), Vec::new()))
            }
            Operation::DestroyContainer(id) => {
                let c = self.containers.resolve(stx, *id)?;
                self.authorize(Some(&c.descriptor()), kind, stx, ctx)?;
                self.containers.destroy(stx, *id)?;
                stx.add_log(Box::new(WaitDestroyContainerLogItem {
                    waits: Arc::clone(&self.waits),
                    container: *id,
                }))?;
                Ok((OperationResult::Done, Vec::new()))
            }
            Operation::LockContainer(id) => {
                let c = self.containers.resolve(stx, *id)?;
                self.authorize(Some(&c.descriptor()), kind, stx, ctx)?;
                c.lock(stx)?;
                Ok((OperationResult::Done, Vec::new()))
            }
            Operation::AddAspect { container, aspect } => {
                match container {
                    Some(id) => {
                        let c = self.containers.resolve(stx, *id)?;
                        self.authorize(Some(&c.descriptor()), kind, stx, ctx)?;
                    }
                    None => self.authorize(None, kind, stx, ctx)?,
                }
                let id = self.aspects.add(*container, Arc::clone(aspect));
                Ok((OperationResult::Aspect(id), Vec::new()))
            }
            Operation::RemoveAspect(id) => {
                self.authorize(None, kind, stx, ctx)?;
                if self.aspects.remove(*id) {
                    Ok((OperationResult::Done, Vec::new()))
                } else {
                    Err(CoreError::invalid_operation(format!("{id} is not registered")))
                }
            }
        }
    }

    /// Stops the space: fails parked and queued tasks, joins every thread
    /// and syncs the backend. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let parked = self.waits.shutdown();
        for task in &parked {
            self.abandon(task);
        }
        if let Some(timeouts) = self.timeouts.get() {
            timeouts.join();
        }
        if let Some(pool) = self.pool.get() {
            pool.stop();
        }
        if let Some(p) = &self.persistence {
            if let Err(e) = p.backend().sync() {
                error!(error = %e, "backend sync on close failed");
            }
        }
        info!(abandoned = parked.len(), active = self.txs.active_count(), "space closed");
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("space", &self.containers.space_id())
            .field("containers", &self.containers.len())
            .field("transactions", &self.txs.active_count())
            .field("parked", &self.waits.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
