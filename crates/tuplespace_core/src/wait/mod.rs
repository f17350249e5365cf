//! Blocked requests and the events that wake them.
//!
//! A request that cannot proceed is parked per container under the event
//! categories that could unblock it. When an operation finishes, or a
//! transaction commits or rolls back, the manager wakes matching tasks in
//! the order they blocked and hands them to the scheduler.
//!
//! Lost wake-ups are avoided with an event clock: every task remembers
//! the clock value when its last attempt started, every container
//! remembers when each category last fired, and a task whose category
//! fired after its attempt started is rescheduled instead of parked.

mod log;
mod timeout;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::deadlock::DeadlockDetector;
use crate::runtime::Task;
use crate::stats::SpaceStats;
use crate::types::{ContainerId, TaskId, TransactionId};

pub(crate) use log::{WaitCreateContainerLogItem, WaitDestroyContainerLogItem};
pub(crate) use timeout::TimeoutProcessor;

/// Why a parked task may be able to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCategory {
    /// A short-term lock was released.
    UnlockShortTerm,
    /// A long-term lock was released.
    UnlockLongTerm,
    /// An entry was written.
    Insert,
    /// An entry was removed.
    Remove,
}

impl EventCategory {
    /// Every category.
    pub const ALL: [EventCategory; 4] = [
        Self::UnlockShortTerm,
        Self::UnlockLongTerm,
        Self::Insert,
        Self::Remove,
    ];

    const fn is_unlock(self) -> bool {
        matches!(self, Self::UnlockShortTerm | Self::UnlockLongTerm)
    }
}

/// Where and on what a task blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockedOn {
    pub(crate) container: ContainerId,
    pub(crate) categories: Vec<EventCategory>,
    /// Transaction holding the lock the task waits for.
    pub(crate) holder: Option<TransactionId>,
}

/// Outcome of [`WaitManager::add_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    /// The task is parked.
    Queued,
    /// A matching event fired since the attempt started; the task went
    /// straight back to the scheduler.
    Rescheduled,
    /// The manager is shut down; the caller must fail the task.
    Closed,
}

/// Hands woken tasks back to the worker pool.
pub(crate) type Reschedule = Box<dyn Fn(Arc<Task>) + Send + Sync>;

struct Parked {
    task: Arc<Task>,
    container: ContainerId,
    categories: Vec<EventCategory>,
    holder: Option<TransactionId>,
    blocked_at: u64,
}

#[derive(Default)]
struct ContainerQueues {
    queues: HashMap<EventCategory, BTreeSet<(u64, TaskId)>>,
    last_event: HashMap<EventCategory, u64>,
}

#[derive(Default)]
struct WaitState {
    clock: u64,
    shutdown: bool,
    containers: HashMap<ContainerId, ContainerQueues>,
    parked: HashMap<TaskId, Parked>,
    deadlines: BTreeSet<(Instant, TaskId)>,
}

impl WaitState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn fire(&mut self, container: ContainerId, category: EventCategory) {
        let stamp = self.tick();
        if let Some(q) = self.containers.get_mut(&container) {
            q.last_event.insert(category, stamp);
        }
    }

    /// Unparks a task, clearing every index that points at it.
    fn unpark(&mut self, id: TaskId) -> Option<Parked> {
        let parked = self.parked.remove(&id)?;
        if let Some(q) = self.containers.get_mut(&parked.container) {
            for category in &parked.categories {
                if let Some(set) = q.queues.get_mut(category) {
                    set.remove(&(parked.blocked_at, id));
                }
            }
        }
        if let Some(deadline) = parked.task.deadline() {
            self.deadlines.remove(&(deadline, id));
        }
        Some(parked)
    }

    fn queued(
        &self,
        container: ContainerId,
        category: EventCategory,
    ) -> impl Iterator<Item = (u64, TaskId)> + '_ {
        self.containers
            .get(&container)
            .and_then(|q| q.queues.get(&category))
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }
}

/// Parks blocked tasks and wakes them on events.
pub struct WaitManager {
    state: Mutex<WaitState>,
    deadline_changed: Condvar,
    deadlocks: Arc<DeadlockDetector>,
    stats: Arc<SpaceStats>,
    reschedule: Reschedule,
}

impl WaitManager {
    pub(crate) fn new(
        deadlocks: Arc<DeadlockDetector>,
        stats: Arc<SpaceStats>,
        reschedule: Reschedule,
    ) -> Self {
        Self {
            state: Mutex::new(WaitState::default()),
            deadline_changed: Condvar::new(),
            deadlocks,
            stats,
            reschedule,
        }
    }

    /// Current event clock value.
    pub(crate) fn now(&self) -> u64 {
        self.state.lock().clock
    }

    /// Starts tracking a container.
    pub(crate) fn add_container(&self, container: ContainerId) {
        self.state.lock().containers.entry(container).or_default();
    }

    /// Stops tracking a container and reschedules everything parked on
    /// it, so those tasks fail fast.
    pub(crate) fn remove_container(&self, container: ContainerId) {
        let woken = {
            let mut state = self.state.lock();
            let ids: BTreeSet<(u64, TaskId)> = state
                .parked
                .values()
                .filter(|p| p.container == container)
                .map(|p| (p.blocked_at, p.task.id()))
                .collect();
            let woken = self.unpark_all(&mut state, ids);
            state.containers.remove(&container);
            woken
        };
        debug!(%container, woken = woken.len(), "container wait queues removed");
        self.dispatch(woken);
    }

    /// Parks `task`.
    ///
    /// The task is rescheduled at once if one of its categories fired on
    /// the container since its attempt started, or if the container is
    /// not tracked (it was destroyed meanwhile).
    pub(crate) fn add_task(&self, task: Arc<Task>, blocked: BlockedOn) -> Enqueued {
        let outcome = {
            let mut state = self.state.lock();
            if state.shutdown {
                return Enqueued::Closed;
            }
            let started = task.started();
            let missed = match state.containers.get(&blocked.container) {
                Some(q) => blocked
                    .categories
                    .iter()
                    .any(|c| q.last_event.get(c).is_some_and(|stamp| *stamp > started)),
                None => true,
            };
            if missed {
                Enqueued::Rescheduled
            } else {
                let id = task.id();
                let blocked_at = state.tick();
                if let Some(q) = state.containers.get_mut(&blocked.container) {
                    for category in &blocked.categories {
                        q.queues.entry(*category).or_default().insert((blocked_at, id));
                    }
                }
                if let Some(deadline) = task.deadline() {
                    let earliest = state.deadlines.first().map(|(d, _)| *d);
                    state.deadlines.insert((deadline, id));
                    if earliest.map_or(true, |e| deadline < e) {
                        self.deadline_changed.notify_all();
                    }
                }
                if let Some(holder) = blocked.holder {
                    self.deadlocks.add_task(id, task.transaction_id(), holder);
                }
                state.parked.insert(
                    id,
                    Parked {
                        task: Arc::clone(&task),
                        container: blocked.container,
                        categories: blocked.categories.clone(),
                        holder: blocked.holder,
                        blocked_at,
                    },
                );
                Enqueued::Queued
            }
        };
        match outcome {
            Enqueued::Queued => {
                self.stats.record_block();
                trace!(task = %task.id(), container = %blocked.container, categories = ?blocked.categories, "task parked");
            }
            Enqueued::Rescheduled => {
                trace!(task = %task.id(), "event raced the attempt, rescheduling");
                self.stats.record_reschedule();
                (self.reschedule)(task);
            }
            Enqueued::Closed => {}
        }
        outcome
    }

    /// Fires `categories` on `containers` after an operation of `origin`
    /// finished without committing its transaction.
    ///
    /// Unlock events wake every waiting task. Insert and remove events
    /// only wake tasks of `origin`, because nobody else can see the
    /// change yet. The task `except` is never woken.
    pub(crate) fn process_events(
        &self,
        origin: TransactionId,
        containers: &BTreeSet<ContainerId>,
        categories: &[EventCategory],
        except: Option<TaskId>,
    ) {
        let woken = {
            let mut state = self.state.lock();
            let mut ids = BTreeSet::new();
            for container in containers {
                for category in categories {
                    state.fire(*container, *category);
                    for (at, id) in state.queued(*container, *category) {
                        if Some(id) == except {
                            continue;
                        }
                        let eligible = category.is_unlock()
                            || state
                                .parked
                                .get(&id)
                                .is_some_and(|p| p.task.transaction_id() == origin);
                        if eligible {
                            ids.insert((at, id));
                        }
                    }
                }
            }
            self.unpark_all(&mut state, ids)
        };
        self.dispatch(woken);
    }

    /// Wakes everything a commit of `tx` may unblock: every category on
    /// the containers it touched, tasks waiting for its locks, and its
    /// own parked tasks.
    pub(crate) fn process_transaction_commit(
        &self,
        tx: TransactionId,
        containers: &BTreeSet<ContainerId>,
    ) {
        self.finish_transaction(tx, containers, true);
    }

    /// Wakes everything a rollback of `tx` may unblock: unlock waiters on
    /// the containers it touched, tasks waiting for its locks, and its own
    /// parked tasks.
    pub(crate) fn process_transaction_rollback(
        &self,
        tx: TransactionId,
        containers: &BTreeSet<ContainerId>,
    ) {
        self.finish_transaction(tx, containers, false);
    }

    fn finish_transaction(
        &self,
        tx: TransactionId,
        containers: &BTreeSet<ContainerId>,
        committed: bool,
    ) {
        let woken = {
            let mut state = self.state.lock();
            let mut ids = BTreeSet::new();
            for container in containers {
                for category in EventCategory::ALL {
                    state.fire(*container, category);
                    if committed || category.is_unlock() {
                        ids.extend(state.queued(*container, category));
                    }
                }
            }
            ids.extend(
                state
                    .parked
                    .values()
                    .filter(|p| p.holder == Some(tx) || p.task.transaction_id() == tx)
                    .map(|p| (p.blocked_at, p.task.id())),
            );
            self.unpark_all(&mut state, ids)
        };
        debug!(%tx, committed, woken = woken.len(), "transaction finished, waiters woken");
        self.dispatch(woken);
    }

    fn unpark_all(&self, state: &mut WaitState, ids: BTreeSet<(u64, TaskId)>) -> Vec<Arc<Task>> {
        ids.into_iter()
            .filter_map(|(_, id)| state.unpark(id))
            .map(|p| {
                self.deadlocks.remove_task(p.task.id());
                p.task
            })
            .collect()
    }

    /// Reschedules in blocking order.
    fn dispatch(&self, woken: Vec<Arc<Task>>) {
        for task in woken {
            self.stats.record_reschedule();
            trace!(task = %task.id(), "task rescheduled");
            (self.reschedule)(task);
        }
    }

    /// Blocks until some parked task's deadline passes and returns the
    /// expired tasks, unparked. Returns `None` after shutdown.
    pub(crate) fn wait_expired(&self) -> Option<Vec<Arc<Task>>> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            let now = Instant::now();
            let due: Vec<TaskId> = state
                .deadlines
                .iter()
                .take_while(|(d, _)| *d <= now)
                .map(|(_, id)| *id)
                .collect();
            if !due.is_empty() {
                let expired: Vec<Arc<Task>> = due
                    .into_iter()
                    .filter_map(|id| state.unpark(id))
                    .map(|p| p.task)
                    .collect();
                drop(state);
                for task in &expired {
                    self.deadlocks.remove_task(task.id());
                }
                return Some(expired);
            }
            match state.deadlines.first().map(|(d, _)| *d) {
                Some(next) => {
                    self.deadline_changed.wait_until(&mut state, next);
                }
                None => self.deadline_changed.wait(&mut state),
            }
        }
    }

    /// Stops accepting tasks and returns everything still parked.
    pub(crate) fn shutdown(&self) -> Vec<Arc<Task>> {
        let parked = {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.deadlines.clear();
            state.containers.clear();
            let mut parked: Vec<Parked> = state.parked.drain().map(|(_, p)| p).collect();
            parked.sort_by_key(|p| p.blocked_at);
            parked
        };
        self.deadline_changed.notify_all();
        parked
            .into_iter()
            .map(|p| {
                self.deadlocks.remove_task(p.task.id());
                p.task
            })
            .collect()
    }

    /// Number of parked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().parked.len()
    }

    /// Returns true if no task is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks parked on `container`.
    #[must_use]
    pub fn queued_on(&self, container: ContainerId) -> usize {
        self.state
            .lock()
            .parked
            .values()
            .filter(|p| p.container == container)
            .count()
    }
}

impl fmt::Debug for WaitManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitManager")
            .field("parked", &self.len())
            .finish_non_exhaustive()
    }
}
