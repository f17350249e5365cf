//! Transaction log items.
//!
//! Every lock an operation takes and every structural change it makes is
//! recorded as a [`LogItem`]. Items are replayed when their
//! sub-transaction finishes (short-term finalization) and again when the
//! transaction finishes (long-term finalization).

use std::fmt;
use std::sync::Arc;

use crate::container::{Container, ContainerManager, Entry};
use crate::error::CoreResult;
use crate::isolation::lock::{LockKind, LockTable, LockTarget};
use crate::persistence::PersistentTransaction;
use crate::types::{ContainerId, SubTransactionId, TransactionId};

/// Which sub-transaction log an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Entry writes.
    Insert,
    /// Read locks.
    Read,
    /// Takes and container destroys.
    Delete,
    /// Container locks.
    Lock,
    /// Everything else.
    Other,
}

/// Identity of the finishing transaction and sub-transaction.
#[derive(Clone, Copy)]
pub struct LogContext<'a> {
    /// The transaction.
    pub tx: TransactionId,
    /// The sub-transaction that recorded the item.
    pub stx: SubTransactionId,
    /// Staged backend changes of the transaction, if persistence is on.
    pub persistence: Option<&'a PersistentTransaction>,
}

impl fmt::Debug for LogContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogContext")
            .field("tx", &self.tx)
            .field("stx", &self.stx)
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

/// A recorded step that knows how to finalize or undo itself.
///
/// All four finalizers must be idempotent and tolerate state that was
/// already cleaned up.
pub trait LogItem: Send + Sync + fmt::Debug {
    /// Log this item is routed to.
    fn category(&self) -> LogCategory {
        LogCategory::Other
    }

    /// Container touched by the item, if any.
    fn container(&self) -> Option<ContainerId> {
        None
    }

    /// Runs before any commit replay of the transaction.
    ///
    /// A failure here aborts the transaction.
    ///
    /// # Errors
    ///
    /// Returns the reason the transaction cannot commit.
    fn prepare_commit(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// Finalizes the item when its sub-transaction commits.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn commit_sub_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// Finalizes the item when the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn commit_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// Undoes the item when its sub-transaction rolls back.
    ///
    /// # Errors
    ///
    /// Returns an error if the undo fails.
    fn rollback_sub_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// Undoes the item when the transaction rolls back.
    ///
    /// # Errors
    ///
    /// Returns an error if the undo fails.
    fn rollback_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        Ok(())
    }
}

/// A written entry, insert-locked until commit.
#[derive(Debug)]
pub(crate) struct WriteLogItem {
    pub(crate) locks: Arc<LockTable>,
    pub(crate) container: Arc<Container>,
    pub(crate) entry: Arc<Entry>,
}

impl WriteLogItem {
    fn target(&self) -> LockTarget {
        LockTarget::Entry(self.container.id(), self.entry.id())
    }
}

impl LogItem for WriteLogItem {
    fn category(&self) -> LogCategory {
        LogCategory::Insert
    }

    fn container(&self) -> Option<ContainerId> {
        Some(self.container.id())
    }

    fn commit_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks
            .surrender(self.target(), LockKind::Insert, ctx.tx, ctx.stx);
        if let Some(p) = ctx.persistence {
            p.put_entry(&self.entry)?;
        }
        Ok(())
    }

    fn commit_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks
            .release(self.target(), LockKind::Insert, ctx.tx, None);
        Ok(())
    }

    fn rollback_sub_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.container.purge_entry(self.entry.id());
        Ok(())
    }

    fn rollback_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.container.purge_entry(self.entry.id());
        Ok(())
    }
}

/// A read lock taken under repeatable read.
#[derive(Debug)]
pub(crate) struct ReadLogItem {
    pub(crate) locks: Arc<LockTable>,
    pub(crate) target: LockTarget,
}

impl LogItem for ReadLogItem {
    fn category(&self) -> LogCategory {
        LogCategory::Read
    }

    fn container(&self) -> Option<ContainerId> {
        match self.target {
            LockTarget::Container(c) | LockTarget::Entry(c, _) => Some(c),
        }
    }

    fn commit_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.surrender(self.target, LockKind::Read, ctx.tx, ctx.stx);
        Ok(())
    }

    fn commit_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.release(self.target, LockKind::Read, ctx.tx, None);
        Ok(())
    }

    fn rollback_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks
            .release(self.target, LockKind::Read, ctx.tx, Some(ctx.stx));
        Ok(())
    }

    fn rollback_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.release(self.target, LockKind::Read, ctx.tx, None);
        Ok(())
    }
}

/// A taken entry, delete-locked until commit purges it.
#[derive(Debug)]
pub(crate) struct TakeLogItem {
    pub(crate) locks: Arc<LockTable>,
    pub(crate) container: Arc<Container>,
    pub(crate) entry: Arc<Entry>,
}

impl TakeLogItem {
    fn target(&self) -> LockTarget {
        LockTarget::Entry(self.container.id(), self.entry.id())
    }
}

impl LogItem for TakeLogItem {
    fn category(&self) -> LogCategory {
        LogCategory::Delete
    }

    fn container(&self) -> Option<ContainerId> {
        Some(self.container.id())
    }

    fn commit_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks
            .surrender(self.target(), LockKind::Delete, ctx.tx, ctx.stx);
        if let Some(p) = ctx.persistence {
            p.delete_entry(self.container.id(), self.entry.id());
        }
        Ok(())
    }

    fn commit_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.container.purge_entry(self.entry.id());
        Ok(())
    }

    fn rollback_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks
            .release(self.target(), LockKind::Delete, ctx.tx, Some(ctx.stx));
        Ok(())
    }

    fn rollback_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks
            .release(self.target(), LockKind::Delete, ctx.tx, None);
        Ok(())
    }
}

/// An exclusive container lock.
#[derive(Debug)]
pub(crate) struct ContainerLockLogItem {
    pub(crate) locks: Arc<LockTable>,
    pub(crate) container: ContainerId,
}

impl LogItem for ContainerLockLogItem {
    fn category(&self) -> LogCategory {
        LogCategory::Lock
    }

    fn container(&self) -> Option<ContainerId> {
        Some(self.container)
    }

    fn commit_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.surrender(
            LockTarget::Container(self.container),
            LockKind::Exclusive,
            ctx.tx,
            ctx.stx,
        );
        Ok(())
    }

    fn commit_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.release(
            LockTarget::Container(self.container),
            LockKind::Exclusive,
            ctx.tx,
            None,
        );
        Ok(())
    }

    fn rollback_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.release(
            LockTarget::Container(self.container),
            LockKind::Exclusive,
            ctx.tx,
            Some(ctx.stx),
        );
        Ok(())
    }

    fn rollback_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.release(
            LockTarget::Container(self.container),
            LockKind::Exclusive,
            ctx.tx,
            None,
        );
        Ok(())
    }
}

/// A created container, insert-locked until commit.
///
/// Routed to the other log so that a rollback removes the container's
/// entries before the container itself.
#[derive(Debug)]
pub(crate) struct ContainerCreateLogItem {
    pub(crate) locks: Arc<LockTable>,
    pub(crate) manager: Arc<ContainerManager>,
    pub(crate) container: Arc<Container>,
}

impl LogItem for ContainerCreateLogItem {
    fn container(&self) -> Option<ContainerId> {
        Some(self.container.id())
    }

    fn commit_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.surrender(
            LockTarget::Container(self.container.id()),
            LockKind::Insert,
            ctx.tx,
            ctx.stx,
        );
        if let Some(p) = ctx.persistence {
            p.put_container(&self.container.descriptor())?;
        }
        Ok(())
    }

    fn commit_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.release(
            LockTarget::Container(self.container.id()),
            LockKind::Insert,
            ctx.tx,
            None,
        );
        Ok(())
    }

    fn rollback_sub_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.manager.purge_container(self.container.id());
        Ok(())
    }

    fn rollback_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.manager.purge_container(self.container.id());
        Ok(())
    }
}

/// A destroyed container, delete-locked until commit purges it.
#[derive(Debug)]
pub(crate) struct ContainerDestroyLogItem {
    pub(crate) locks: Arc<LockTable>,
    pub(crate) manager: Arc<ContainerManager>,
    pub(crate) container: ContainerId,
}

impl LogItem for ContainerDestroyLogItem {
    fn category(&self) -> LogCategory {
        LogCategory::Delete
    }

    fn container(&self) -> Option<ContainerId> {
        Some(self.container)
    }

    fn commit_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.surrender(
            LockTarget::Container(self.container),
            LockKind::Delete,
            ctx.tx,
            ctx.stx,
        );
        if let Some(p) = ctx.persistence {
            p.delete_container(self.container)?;
        }
        Ok(())
    }

    fn commit_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.manager.purge_container(self.container);
        Ok(())
    }

    fn rollback_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.release(
            LockTarget::Container(self.container),
            LockKind::Delete,
            ctx.tx,
            Some(ctx.stx),
        );
        Ok(())
    }

    fn rollback_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.locks.release(
            LockTarget::Container(self.container),
            LockKind::Delete,
            ctx.tx,
            None,
        );
        Ok(())
    }
}

/// A coordinator structure lock, held while its sub-transaction runs.
#[derive(Debug)]
pub(crate) struct CoordinatorLockLogItem {
    pub(crate) locks: Arc<LockTable>,
    pub(crate) container: ContainerId,
    pub(crate) coordinator: String,
}

impl CoordinatorLockLogItem {
    fn release(&self, ctx: &LogContext<'_>) {
        self.locks
            .release_coordinator(self.container, &self.coordinator, ctx.tx, ctx.stx);
    }
}

impl LogItem for CoordinatorLockLogItem {
    fn container(&self) -> Option<ContainerId> {
        Some(self.container)
    }

    fn commit_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.release(ctx);
        Ok(())
    }

    fn rollback_sub_transaction(&self, ctx: &LogContext<'_>) -> CoreResult<()> {
        self.release(ctx);
        Ok(())
    }
}
