//! Transactions and sub-transactions.
//!
//! A [`Transaction`] owns the sub-transactions started under it. Each
//! [`SubTransaction`] keeps five logs (insert, read, delete, lock, other)
//! that it replays on its own finish and hands to the transaction, which
//! replays them again when it commits or rolls back.
//!
//! Replay orders:
//!
//! | Finish | Order |
//! |---|---|
//! | sub-transaction commit | insert, read, delete, lock, other |
//! | sub-transaction rollback | delete, read, insert, lock, other |
//! | transaction commit | delete, insert, read, lock, other, own other |
//! | transaction rollback | delete, read, insert, lock, other, own other |

use std::collections::BTreeSet;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::{CoreError, CoreResult};
use crate::isolation::log::{LogCategory, LogContext, LogItem};
use crate::persistence::PersistentTransaction;
use crate::types::{ContainerId, SubTransactionId, TransactionId};

use LogCategory::{Delete, Insert, Lock, Other, Read};

const STX_COMMIT_ORDER: [LogCategory; 5] = [Insert, Read, Delete, Lock, Other];
const STX_ROLLBACK_ORDER: [LogCategory; 5] = [Delete, Read, Insert, Lock, Other];
const TX_COMMIT_ORDER: [LogCategory; 5] = [Delete, Insert, Read, Lock, Other];
const TX_ROLLBACK_ORDER: [LogCategory; 5] = [Delete, Read, Insert, Lock, Other];

/// Sub-transaction ids start at one; the transaction's own log replays
/// under this id.
const OWN_LOG: SubTransactionId = SubTransactionId::new(0);

/// Lifecycle of a transaction or sub-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Accepting work.
    Running,
    /// Commit replay in progress.
    Committing,
    /// Committed (terminal).
    Committed,
    /// Rollback replay in progress.
    Aborting,
    /// Rolled back (terminal).
    Aborted,
}

impl TransactionStatus {
    /// Returns true for `Committed` and `Aborted`.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

#[derive(Debug, Default)]
struct Logs {
    insert: Vec<Box<dyn LogItem>>,
    read: Vec<Box<dyn LogItem>>,
    delete: Vec<Box<dyn LogItem>>,
    lock: Vec<Box<dyn LogItem>>,
    other: Vec<Box<dyn LogItem>>,
}

impl Logs {
    fn push(&mut self, item: Box<dyn LogItem>) {
        match item.category() {
            Insert => self.insert.push(item),
            Read => self.read.push(item),
            Delete => self.delete.push(item),
            Lock => self.lock.push(item),
            Other => self.other.push(item),
        }
    }

    fn get(&self, category: LogCategory) -> &[Box<dyn LogItem>] {
        match category {
            Insert => &self.insert,
            Read => &self.read,
            Delete => &self.delete,
            Lock => &self.lock,
            Other => &self.other,
        }
    }

    fn len(&self) -> usize {
        self.insert.len() + self.read.len() + self.delete.len() + self.lock.len() + self.other.len()
    }
}

/// Runs `step` for every item, continuing past failures.
///
/// Returns the first failure.
fn replay_all<'a>(
    items: impl IntoIterator<Item = (SubTransactionId, &'a dyn LogItem)>,
    mut step: impl FnMut(SubTransactionId, &'a dyn LogItem) -> CoreResult<()>,
) -> CoreResult<()> {
    let mut first = None;
    for (stx, item) in items {
        if let Err(e) = step(stx, item) {
            error!(%stx, ?item, error = %e, "log item replay failed");
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

struct SubState {
    status: TransactionStatus,
    logs: Logs,
    accessed: BTreeSet<ContainerId>,
}

/// The isolation unit of a single operation.
pub struct SubTransaction {
    id: SubTransactionId,
    tx: TransactionId,
    parent: Weak<Transaction>,
    state: Mutex<SubState>,
}

impl SubTransaction {
    /// Returns the sub-transaction id.
    #[must_use]
    pub fn id(&self) -> SubTransactionId {
        self.id
    }

    /// Returns the id of the parent transaction.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.tx
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Returns true while the sub-transaction is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Running
    }

    /// Appends a log item to the log its category selects.
    ///
    /// # Errors
    ///
    /// Fails if the sub-transaction is no longer running.
    pub fn add_log(&self, item: Box<dyn LogItem>) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Running {
            return Err(CoreError::invalid_sub_transaction(format!(
                "{} is not running",
                self.id
            )));
        }
        if let Some(c) = item.container() {
            state.accessed.insert(c);
        }
        state.logs.push(item);
        Ok(())
    }

    /// Records that the sub-transaction touched a container.
    pub fn mark_accessed(&self, container: ContainerId) {
        self.state.lock().accessed.insert(container);
    }

    /// Containers touched so far.
    #[must_use]
    pub fn accessed_containers(&self) -> BTreeSet<ContainerId> {
        self.state.lock().accessed.clone()
    }

    /// Number of recorded log items.
    #[must_use]
    pub fn log_len(&self) -> usize {
        self.state.lock().logs.len()
    }

    /// Commits the sub-transaction, turning its short-term locks into
    /// long-term locks of the parent.
    ///
    /// # Errors
    ///
    /// Fails if the sub-transaction is not running, or with the first
    /// failing log item.
    pub fn commit(&self) -> CoreResult<()> {
        self.finish(true)
    }

    /// Rolls back the sub-transaction, undoing everything it did.
    ///
    /// # Errors
    ///
    /// Fails if the sub-transaction is not running, or with the first
    /// failing log item.
    pub fn rollback(&self) -> CoreResult<()> {
        self.finish(false)
    }

    fn finish(&self, commit: bool) -> CoreResult<()> {
        let parent = self.parent.upgrade();
        let persistence = parent.as_deref().and_then(Transaction::persistent);
        let ctx = LogContext {
            tx: self.tx,
            stx: self.id,
            persistence,
        };

        let (result, accessed) = {
            let mut state = self.state.lock();
            if state.status != TransactionStatus::Running {
                return Err(CoreError::invalid_sub_transaction(format!(
                    "{} is not running",
                    self.id
                )));
            }
            let (order, interim) = if commit {
                (STX_COMMIT_ORDER, TransactionStatus::Committing)
            } else {
                (STX_ROLLBACK_ORDER, TransactionStatus::Aborting)
            };
            state.status = interim;

            let items = order
                .iter()
                .flat_map(|c| state.logs.get(*c))
                .map(|item| (self.id, item.as_ref()));
            let result = replay_all(items, |_, item| {
                if commit {
                    item.commit_sub_transaction(&ctx)
                } else {
                    item.rollback_sub_transaction(&ctx)
                }
            });

            if commit {
                state.status = TransactionStatus::Committed;
            } else {
                state.logs = Logs::default();
                state.status = TransactionStatus::Aborted;
            }
            (result, state.accessed.clone())
        };

        if let Some(parent) = parent {
            parent.sub_transaction_finished(&accessed);
        }
        result
    }

    fn take_logs(&self) -> Logs {
        mem::take(&mut self.state.lock().logs)
    }
}

impl fmt::Debug for SubTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubTransaction")
            .field("id", &self.id)
            .field("tx", &self.tx)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct TxState {
    status: TransactionStatus,
    locked: bool,
    children: Vec<Arc<SubTransaction>>,
    outstanding: usize,
    other: Vec<Box<dyn LogItem>>,
    accessed: BTreeSet<ContainerId>,
}

/// A root unit of atomicity.
pub struct Transaction {
    id: TransactionId,
    implicit: bool,
    state: Mutex<TxState>,
    quiesced: Condvar,
    persistent: Option<Arc<PersistentTransaction>>,
    next_stx: Arc<AtomicU64>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        implicit: bool,
        persistent: Option<Arc<PersistentTransaction>>,
        next_stx: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id,
            implicit,
            state: Mutex::new(TxState {
                status: TransactionStatus::Running,
                locked: false,
                children: Vec::new(),
                outstanding: 0,
                other: Vec::new(),
                accessed: BTreeSet::new(),
            }),
            quiesced: Condvar::new(),
            persistent,
            next_stx,
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns true if the runtime created the transaction for a single
    /// request.
    #[must_use]
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Returns true while the transaction is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Running
    }

    /// Returns true while a commit or rollback is waiting for children.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Number of sub-transactions that have not finished.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Containers touched by finished children and own log items.
    #[must_use]
    pub fn accessed_containers(&self) -> BTreeSet<ContainerId> {
        self.state.lock().accessed.clone()
    }

    pub(crate) fn persistent(&self) -> Option<&PersistentTransaction> {
        self.persistent.as_deref()
    }

    /// Starts a sub-transaction.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not running or is being quiesced.
    pub fn new_sub_transaction(self: &Arc<Self>) -> CoreResult<Arc<SubTransaction>> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Running {
            return Err(CoreError::invalid_transaction(format!(
                "{} is not running",
                self.id
            )));
        }
        if state.locked {
            return Err(CoreError::invalid_transaction(format!(
                "{} is finishing",
                self.id
            )));
        }
        let id = SubTransactionId::new(self.next_stx.fetch_add(1, Ordering::SeqCst));
        let stx = Arc::new(SubTransaction {
            id,
            tx: self.id,
            parent: Arc::downgrade(self),
            state: Mutex::new(SubState {
                status: TransactionStatus::Running,
                logs: Logs::default(),
                accessed: BTreeSet::new(),
            }),
        });
        state.children.push(Arc::clone(&stx));
        state.outstanding += 1;
        Ok(stx)
    }

    /// Appends an item to the transaction's own other log.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not running.
    pub fn add_log(&self, item: Box<dyn LogItem>) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Running {
            return Err(CoreError::invalid_transaction(format!(
                "{} is not running",
                self.id
            )));
        }
        if let Some(c) = item.container() {
            state.accessed.insert(c);
        }
        state.other.push(item);
        Ok(())
    }

    fn sub_transaction_finished(&self, accessed: &BTreeSet<ContainerId>) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.accessed.extend(accessed.iter().copied());
        if state.outstanding == 0 {
            self.quiesced.notify_all();
        }
    }

    /// Blocks new children and waits until running children finish.
    ///
    /// On timeout the lock flag is cleared again and the transaction stays
    /// running.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not running or `timeout` elapses.
    pub fn lock_and_wait_for_sub_transactions(&self, timeout: Duration) -> CoreResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Running {
            return Err(CoreError::invalid_transaction(format!(
                "{} is not running",
                self.id
            )));
        }
        state.locked = true;
        while state.outstanding > 0 {
            if self.quiesced.wait_until(&mut state, deadline).timed_out() && state.outstanding > 0
            {
                state.locked = false;
                return Err(CoreError::timeout(format!(
                    "{} still has {} running sub-transactions",
                    self.id, state.outstanding
                )));
            }
        }
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// Waits up to `wait` for children, runs the prepare pass, then
    /// replays every committed child's logs and the own log. A failing
    /// prepare rolls everything back and leaves the transaction aborted.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not running, the wait times out, a
    /// child is still active, or a log item fails.
    pub fn commit(&self, wait: Duration) -> CoreResult<()> {
        let (children, own) = self.quiesce(wait, TransactionStatus::Committing)?;
        let steps = ordered(&children, &own, &TX_COMMIT_ORDER);
        let persistence = self.persistent();
        let ctx = |stx| LogContext {
            tx: self.id,
            stx,
            persistence,
        };

        let prepared = steps
            .iter()
            .try_for_each(|(stx, item)| item.prepare_commit(&ctx(*stx)));
        if let Err(e) = prepared {
            debug!(tx = %self.id, error = %e, "commit prepare failed, rolling back");
            let undo = ordered(&children, &own, &TX_ROLLBACK_ORDER);
            if let Err(rollback_err) =
                replay_all(undo, |stx, item| item.rollback_transaction(&ctx(stx)))
            {
                error!(tx = %self.id, error = %rollback_err, "rollback after failed prepare");
            }
            self.state.lock().status = TransactionStatus::Aborted;
            return Err(e);
        }

        let result = replay_all(steps, |stx, item| item.commit_transaction(&ctx(stx)));
        self.state.lock().status = TransactionStatus::Committed;
        debug!(tx = %self.id, "transaction committed");
        result
    }

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not running, the wait times out, a
    /// child is still active, or a log item fails.
    pub fn rollback(&self, wait: Duration) -> CoreResult<()> {
        let (children, own) = self.quiesce(wait, TransactionStatus::Aborting)?;
        let persistence = self.persistent();
        let steps = ordered(&children, &own, &TX_ROLLBACK_ORDER);
        let result = replay_all(steps, |stx, item| {
            item.rollback_transaction(&LogContext {
                tx: self.id,
                stx,
                persistence,
            })
        });
        self.state.lock().status = TransactionStatus::Aborted;
        debug!(tx = %self.id, "transaction rolled back");
        result
    }

    fn quiesce(
        &self,
        wait: Duration,
        next: TransactionStatus,
    ) -> CoreResult<(Vec<(SubTransactionId, Logs)>, Vec<Box<dyn LogItem>>)> {
        self.lock_and_wait_for_sub_transactions(wait)?;
        let mut state = self.state.lock();
        let mut kept = Vec::with_capacity(state.children.len());
        for child in &state.children {
            match child.status() {
                TransactionStatus::Committed => kept.push((child.id, child.take_logs())),
                TransactionStatus::Aborted => {}
                status => {
                    return Err(CoreError::internal(format!(
                        "{} of {} is {status:?} after quiescing",
                        child.id, self.id
                    )))
                }
            }
        }
        state.children.clear();
        state.status = next;
        Ok((kept, mem::take(&mut state.other)))
    }
}

fn ordered<'a>(
    children: &'a [(SubTransactionId, Logs)],
    own: &'a [Box<dyn LogItem>],
    order: &[LogCategory; 5],
) -> Vec<(SubTransactionId, &'a dyn LogItem)> {
    let mut steps = Vec::new();
    for category in order {
        for (stx, logs) in children {
            steps.extend(logs.get(*category).iter().map(|i| (*stx, i.as_ref())));
        }
    }
    steps.extend(own.iter().map(|i| (OWN_LOG, i.as_ref())));
    steps
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("implicit", &self.implicit)
            .field("status", &state.status)
            .field("locked", &state.locked)
            .field("outstanding", &state.outstanding)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug)]
    struct Recorder {
        name: &'static str,
        category: LogCategory,
        journal: Arc<Mutex<Vec<String>>>,
        fail_prepare: bool,
    }

    impl Recorder {
        fn boxed(
            name: &'static str,
            category: LogCategory,
            journal: &Arc<Mutex<Vec<String>>>,
        ) -> Box<dyn LogItem> {
            Box::new(Self {
                name,
                category,
                journal: Arc::clone(journal),
                fail_prepare: false,
            })
        }

        fn note(&self, phase: &str) {
            self.journal.lock().push(format!("{phase}:{}", self.name));
        }
    }

    impl LogItem for Recorder {
        fn category(&self) -> LogCategory {
            self.category
        }

        fn prepare_commit(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
            if self.fail_prepare {
                Err(CoreError::internal("prepare refused"))
            } else {
                Ok(())
            }
        }

        fn commit_sub_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
            self.note("cs");
            Ok(())
        }

        fn commit_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
            self.note("ct");
            Ok(())
        }

        fn rollback_sub_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
            self.note("rs");
            Ok(())
        }

        fn rollback_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
            self.note("rt");
            Ok(())
        }
    }

    fn transaction() -> Arc<Transaction> {
        Arc::new(Transaction::new(
            TransactionId::new(1),
            false,
            None,
            Arc::new(AtomicU64::new(1)),
        ))
    }

    fn fill(stx: &SubTransaction, journal: &Arc<Mutex<Vec<String>>>) {
        for (name, category) in [
            ("other", Other),
            ("lock", Lock),
            ("read", Read),
            ("insert", Insert),
            ("delete", Delete),
        ] {
            stx.add_log(Recorder::boxed(name, category, journal)).unwrap();
        }
    }

    fn drain(journal: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        mem::take(&mut *journal.lock())
    }

    #[test]
    fn sub_transaction_replay_orders() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let tx = transaction();

        let stx = tx.new_sub_transaction().unwrap();
        fill(&stx, &journal);
        stx.commit().unwrap();
        assert_eq!(
            drain(&journal),
            ["cs:insert", "cs:read", "cs:delete", "cs:lock", "cs:other"]
        );

        let stx = tx.new_sub_transaction().unwrap();
        fill(&stx, &journal);
        stx.rollback().unwrap();
        assert_eq!(
            drain(&journal),
            ["rs:delete", "rs:read", "rs:insert", "rs:lock", "rs:other"]
        );
        assert_eq!(stx.log_len(), 0);
    }

    #[test]
    fn transaction_commit_order_skips_aborted_children() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let tx = transaction();

        let kept = tx.new_sub_transaction().unwrap();
        fill(&kept, &journal);
        kept.commit().unwrap();
        let dropped = tx.new_sub_transaction().unwrap();
        fill(&dropped, &journal);
        dropped.rollback().unwrap();
        tx.add_log(Recorder::boxed("own", Other, &journal)).unwrap();
        drain(&journal);

        tx.commit(Duration::from_secs(1)).unwrap();
        assert_eq!(
            drain(&journal),
            ["ct:delete", "ct:insert", "ct:read", "ct:lock", "ct:other", "ct:own"]
        );
        assert_eq!(tx.status(), TransactionStatus::Committed);
    }

    #[test]
    fn transaction_rollback_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let tx = transaction();
        let stx = tx.new_sub_transaction().unwrap();
        fill(&stx, &journal);
        stx.commit().unwrap();
        drain(&journal);

        tx.rollback(Duration::from_secs(1)).unwrap();
        assert_eq!(
            drain(&journal),
            ["rt:delete", "rt:read", "rt:insert", "rt:lock", "rt:other"]
        );
        assert_eq!(tx.status(), TransactionStatus::Aborted);
    }

    #[test]
    fn finished_transaction_rejects_everything() {
        let tx = transaction();
        tx.commit(Duration::from_secs(1)).unwrap();

        assert!(matches!(
            tx.commit(Duration::from_secs(1)),
            Err(CoreError::InvalidTransaction { .. })
        ));
        assert!(matches!(
            tx.rollback(Duration::from_secs(1)),
            Err(CoreError::InvalidTransaction { .. })
        ));
        assert!(tx.new_sub_transaction().is_err());
    }

    #[test]
    fn finished_sub_transaction_rejects_everything() {
        let tx = transaction();
        let stx = tx.new_sub_transaction().unwrap();
        stx.commit().unwrap();

        assert!(matches!(
            stx.commit(),
            Err(CoreError::InvalidSubTransaction { .. })
        ));
        assert!(stx.rollback().is_err());
        let journal = Arc::new(Mutex::new(Vec::new()));
        assert!(stx.add_log(Recorder::boxed("late", Other, &journal)).is_err());
    }

    #[test]
    fn quiesce_timeout_leaves_transaction_running() {
        let tx = transaction();
        let stx = tx.new_sub_transaction().unwrap();

        let err = tx.commit(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(tx.is_active());
        assert!(!tx.is_locked());

        stx.commit().unwrap();
        tx.commit(Duration::from_millis(20)).unwrap();
    }

    #[test]
    fn commit_waits_for_running_child() {
        let tx = transaction();
        let stx = tx.new_sub_transaction().unwrap();

        let handle = {
            let tx = Arc::clone(&tx);
            thread::spawn(move || tx.commit(Duration::from_secs(5)))
        };
        while !tx.is_locked() {
            thread::yield_now();
        }
        assert!(tx.new_sub_transaction().is_err());
        assert_eq!(tx.status(), TransactionStatus::Running);

        stx.commit().unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Committed);
        assert_eq!(tx.outstanding(), 0);
    }

    #[test]
    fn failed_prepare_aborts() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let tx = transaction();
        let stx = tx.new_sub_transaction().unwrap();
        stx.add_log(Recorder::boxed("insert", Insert, &journal))
            .unwrap();
        stx.commit().unwrap();
        tx.add_log(Box::new(Recorder {
            name: "backend",
            category: Other,
            journal: Arc::clone(&journal),
            fail_prepare: true,
        }))
        .unwrap();
        drain(&journal);

        assert!(tx.commit(Duration::from_secs(1)).is_err());
        assert_eq!(tx.status(), TransactionStatus::Aborted);
        assert_eq!(drain(&journal), ["rt:insert", "rt:backend"]);
    }
}
