//! Submitted requests and their result handles.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::context::{IsolationLevel, RequestContext, RequestTimeout};
use crate::error::{CoreError, CoreResult};
use crate::isolation::Transaction;
use crate::runtime::operation::{Operation, OperationResult};
use crate::types::{TaskId, TransactionId};

enum Slot {
    Pending,
    Ready(CoreResult<OperationResult>),
    Taken,
}

/// One-shot result cell shared by a task and its handle.
pub(crate) struct Completion {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    /// Stores the result. Returns false if one was stored already.
    pub(crate) fn complete(&self, result: CoreResult<OperationResult>) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Ready(result);
        self.ready.notify_all();
        true
    }

    fn is_done(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Pending)
    }

    fn take(&self, deadline: Option<Instant>) -> Option<CoreResult<OperationResult>> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out()
                        && matches!(*slot, Slot::Pending)
                    {
                        return None;
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(result) => Some(result),
            _ => Some(Err(CoreError::invalid_operation("result already taken"))),
        }
    }
}

/// Handle to the result of a submitted request.
pub struct RequestHandle {
    task: TaskId,
    completion: Arc<Completion>,
}

impl RequestHandle {
    /// Id of the underlying task.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Returns true once the request finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Blocks until the request finishes.
    ///
    /// # Errors
    ///
    /// Returns the request's failure.
    pub fn wait(self) -> CoreResult<OperationResult> {
        self.completion
            .take(None)
            .unwrap_or_else(|| Err(CoreError::internal("unbounded wait returned early")))
    }

    /// Blocks up to `timeout`; returns the handle back if the request is
    /// still running.
    ///
    /// # Errors
    ///
    /// The outer error is the handle itself when the wait elapsed.
    pub fn wait_timeout(self, timeout: Duration) -> Result<CoreResult<OperationResult>, Self> {
        match self.completion.take(Some(Instant::now() + timeout)) {
            Some(result) => Ok(result),
            None => Err(self),
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("task", &self.task)
            .field("done", &self.is_done())
            .finish()
    }
}

/// A request bound to its transaction.
pub(crate) struct Task {
    id: TaskId,
    operation: Operation,
    context: RequestContext,
    isolation: IsolationLevel,
    timeout: RequestTimeout,
    tx: Arc<Transaction>,
    deadline: Option<Instant>,
    completion: Arc<Completion>,
    started: AtomicU64,
    attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        operation: Operation,
        context: RequestContext,
        isolation: IsolationLevel,
        timeout: RequestTimeout,
        tx: Arc<Transaction>,
    ) -> Self {
        Self {
            id,
            operation,
            context,
            isolation,
            timeout,
            tx,
            deadline: timeout.as_duration().map(|d| Instant::now() + d),
            completion: Arc::new(Completion::new()),
            started: AtomicU64::new(0),
            attempts: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn operation(&self) -> &Operation {
        &self.operation
    }

    pub(crate) fn context(&self) -> &RequestContext {
        &self.context
    }

    pub(crate) fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub(crate) fn timeout(&self) -> RequestTimeout {
        self.timeout
    }

    pub(crate) fn transaction(&self) -> &Arc<Transaction> {
        &self.tx
    }

    pub(crate) fn transaction_id(&self) -> TransactionId {
        self.tx.id()
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    pub(crate) fn handle(&self) -> RequestHandle {
        RequestHandle {
            task: self.id,
            completion: Arc::clone(&self.completion),
        }
    }

    /// Records the start of an attempt at event clock `stamp`.
    pub(crate) fn begin_attempt(&self, stamp: u64) {
        self.started.store(stamp, Ordering::SeqCst);
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Event clock value when the last attempt started.
    pub(crate) fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn remember_error(&self, error: &CoreError) {
        *self.last_error.lock() = Some(error.to_string());
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Delivers the result. Returns false if the task already finished.
    pub(crate) fn complete(&self, result: CoreResult<OperationResult>) -> bool {
        self.completion.complete(result)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.completion.is_done()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("operation", &self.operation.kind())
            .field("tx", &self.tx.id())
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}
