//! Lock table for entries, containers and coordinator structures.
//!
//! Every entry and container has a lock record holding at most one
//! insert, one delete and one exclusive lock plus any number of read
//! locks. Each lock is a [`LockHolder`]: a transaction and, while the
//! owning sub-transaction is running, that sub-transaction. Committing
//! the sub-transaction clears the second half ("surrender"), which turns
//! a short-term lock into a long-term one.
//!
//! A holder is compatible with a requester `(tx, stx)` when it belongs to
//! `tx` and is either long-term or owned by `stx` itself.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::context::IsolationLevel;
use crate::types::{ContainerId, EntryId, SubTransactionId, TransactionId};

/// The transaction (and running sub-transaction) holding a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockHolder {
    /// Owning transaction.
    pub tx: TransactionId,
    /// Owning sub-transaction while it is still running.
    pub stx: Option<SubTransactionId>,
}

impl LockHolder {
    /// Creates a holder.
    #[must_use]
    pub const fn new(tx: TransactionId, stx: Option<SubTransactionId>) -> Self {
        Self { tx, stx }
    }

    /// Returns true if this lock lives until its transaction ends.
    #[must_use]
    pub const fn is_long_term(&self) -> bool {
        self.stx.is_none()
    }

    fn compatible(&self, tx: TransactionId, stx: SubTransactionId) -> bool {
        self.tx == tx && self.stx.map_or(true, |s| s == stx)
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stx {
            Some(stx) => write!(f, "{}/{}", self.tx, stx),
            None => write!(f, "{}", self.tx),
        }
    }
}

/// What a lock record protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    /// A container.
    Container(ContainerId),
    /// An entry of a container.
    Entry(ContainerId, EntryId),
}

impl LockTarget {
    fn container(self) -> ContainerId {
        match self {
            LockTarget::Container(c) | LockTarget::Entry(c, _) => c,
        }
    }
}

/// Lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Shared read lock.
    Read,
    /// Held by the creator of an entry or container until commit.
    Insert,
    /// Held by a take or a container destroy.
    Delete,
    /// Container lock.
    Exclusive,
}

/// The operation an availability check is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryAccess {
    /// Non-destructive read.
    Read,
    /// Destructive take.
    Take,
}

/// Whether a candidate may take part in an operation right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Usable.
    Available,
    /// Exists for the requester but is locked by the given holder.
    NotAvailable(LockHolder),
    /// Does not exist from the requester's point of view.
    NotVisible(Option<LockHolder>),
}

/// Outcome of a successful lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    /// A new lock was recorded; the caller must log it.
    Granted,
    /// An equal or stronger lock of the same transaction already exists.
    AlreadyHeld,
}

#[derive(Debug, Default, Clone)]
struct LockRecord {
    insert: Option<LockHolder>,
    delete: Option<LockHolder>,
    exclusive: Option<LockHolder>,
    reads: Vec<LockHolder>,
}

fn incompatible(
    slot: Option<LockHolder>,
    tx: TransactionId,
    stx: SubTransactionId,
) -> Option<LockHolder> {
    slot.filter(|h| !h.compatible(tx, stx))
}

impl LockRecord {
    fn blocking_reader(&self, tx: TransactionId, stx: SubTransactionId) -> Option<LockHolder> {
        self.reads.iter().copied().find(|h| !h.compatible(tx, stx))
    }

    fn slot_mut(&mut self, kind: LockKind) -> Option<&mut Option<LockHolder>> {
        match kind {
            LockKind::Insert => Some(&mut self.insert),
            LockKind::Delete => Some(&mut self.delete),
            LockKind::Exclusive => Some(&mut self.exclusive),
            LockKind::Read => None,
        }
    }

    fn is_unlocked(&self) -> bool {
        self.insert.is_none()
            && self.delete.is_none()
            && self.exclusive.is_none()
            && self.reads.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockState {
    records: HashMap<LockTarget, LockRecord>,
    coordinators: HashMap<(ContainerId, String), LockHolder>,
}

/// The lock table.
///
/// All state sits behind one mutex; every call is short and never
/// blocks on another lock.
#[derive(Debug, Default)]
pub struct LockTable {
    state: Mutex<LockState>,
}

impl LockTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an unlocked record, used for restored entries and containers.
    pub fn create_unlocked(&self, target: LockTarget) {
        self.state.lock().records.insert(target, LockRecord::default());
    }

    /// Creates a record holding the insert lock of `(tx, stx)`.
    pub fn create_with_insert(&self, target: LockTarget, tx: TransactionId, stx: SubTransactionId) {
        let record = LockRecord {
            insert: Some(LockHolder::new(tx, Some(stx))),
            ..LockRecord::default()
        };
        self.state.lock().records.insert(target, record);
    }

    /// Returns true if a record exists for `target`.
    #[must_use]
    pub fn exists(&self, target: LockTarget) -> bool {
        self.state.lock().records.contains_key(&target)
    }

    /// Requests a read, delete or exclusive lock.
    ///
    /// Read locks are blocked by incompatible exclusive, delete or insert
    /// locks. Delete and exclusive locks are additionally blocked by any
    /// existing delete lock and by incompatible read locks.
    ///
    /// # Errors
    ///
    /// Returns the holder of the conflicting lock. Requesting an insert
    /// lock or locking a missing record reports a holder-less conflict as
    /// `Err(None)`.
    pub fn add_lock(
        &self,
        target: LockTarget,
        kind: LockKind,
        tx: TransactionId,
        stx: SubTransactionId,
    ) -> Result<LockGrant, Option<LockHolder>> {
        let mut state = self.state.lock();
        let record = state.records.get_mut(&target).ok_or(None)?;
        let me = LockHolder::new(tx, Some(stx));

        match kind {
            LockKind::Insert => Err(None),
            LockKind::Read => {
                if let Some(h) = incompatible(record.exclusive, tx, stx)
                    .or_else(|| incompatible(record.delete, tx, stx))
                    .or_else(|| incompatible(record.insert, tx, stx))
                {
                    return Err(Some(h));
                }
                let held = record
                    .reads
                    .iter()
                    .any(|h| h.tx == tx && (h.stx.is_none() || h.stx == Some(stx)));
                if held {
                    return Ok(LockGrant::AlreadyHeld);
                }
                record.reads.push(me);
                Ok(LockGrant::Granted)
            }
            LockKind::Delete | LockKind::Exclusive => {
                if kind == LockKind::Exclusive {
                    if let Some(h) = record.exclusive {
                        if h.tx == tx && h.stx.is_none() {
                            return Ok(LockGrant::AlreadyHeld);
                        }
                    }
                }
                if let Some(h) = incompatible(record.exclusive, tx, stx)
                    .or(record.delete)
                    .or_else(|| incompatible(record.insert, tx, stx))
                    .or_else(|| record.blocking_reader(tx, stx))
                {
                    return Err(Some(h));
                }
                if let Some(slot) = record.slot_mut(kind) {
                    *slot = Some(me);
                }
                Ok(LockGrant::Granted)
            }
        }
    }

    /// Releases a lock.
    ///
    /// With `stx`, releases the short-term lock of that sub-transaction
    /// (and a long-term lock of `tx` for single-slot kinds). Without
    /// `stx`, releases the long-term lock; for reads, every read lock of
    /// `tx`.
    pub fn release(
        &self,
        target: LockTarget,
        kind: LockKind,
        tx: TransactionId,
        stx: Option<SubTransactionId>,
    ) {
        let mut state = self.state.lock();
        let Some(record) = state.records.get_mut(&target) else {
            return;
        };
        match kind {
            LockKind::Read => match stx {
                Some(s) => record.reads.retain(|h| !(h.tx == tx && h.stx == Some(s))),
                None => record.reads.retain(|h| h.tx != tx),
            },
            _ => {
                if let Some(slot) = record.slot_mut(kind) {
                    let matches = slot.is_some_and(|h| {
                        h.tx == tx && (h.stx.is_none() || (stx.is_some() && h.stx == stx))
                    });
                    if matches {
                        *slot = None;
                    }
                }
            }
        }
    }

    /// Turns the short-term lock of `(tx, stx)` into a long-term lock.
    pub fn surrender(
        &self,
        target: LockTarget,
        kind: LockKind,
        tx: TransactionId,
        stx: SubTransactionId,
    ) {
        let mut state = self.state.lock();
        let Some(record) = state.records.get_mut(&target) else {
            return;
        };
        let short = LockHolder::new(tx, Some(stx));
        match kind {
            LockKind::Read => {
                for h in &mut record.reads {
                    if *h == short {
                        h.stx = None;
                    }
                }
                let mut seen = false;
                record.reads.retain(|h| {
                    if h.tx == tx && h.stx.is_none() {
                        let keep = !seen;
                        seen = true;
                        keep
                    } else {
                        true
                    }
                });
            }
            _ => {
                if let Some(slot) = record.slot_mut(kind) {
                    if *slot == Some(short) {
                        *slot = Some(LockHolder::new(tx, None));
                    }
                }
            }
        }
    }

    /// Removes the record of `target`.
    pub fn purge(&self, target: LockTarget) {
        self.state.lock().records.remove(&target);
    }

    /// Removes every record and coordinator lock of a container.
    pub fn purge_container(&self, container: ContainerId) {
        let mut state = self.state.lock();
        state.records.retain(|t, _| t.container() != container);
        state.coordinators.retain(|(c, _), _| *c != container);
    }

    /// Classifies a container for the requester.
    ///
    /// A delete lock hides the container from its own transaction and
    /// blocks everyone else. Foreign or uncommitted-sibling insert locks
    /// hide it; foreign exclusive locks block.
    #[must_use]
    pub fn container_availability(
        &self,
        container: ContainerId,
        tx: TransactionId,
        stx: SubTransactionId,
    ) -> Availability {
        let state = self.state.lock();
        let Some(record) = state.records.get(&LockTarget::Container(container)) else {
            return Availability::NotVisible(None);
        };
        if let Some(h) = record.delete {
            return if h.compatible(tx, stx) {
                Availability::NotVisible(Some(h))
            } else {
                Availability::NotAvailable(h)
            };
        }
        if let Some(h) = incompatible(record.insert, tx, stx) {
            return Availability::NotVisible(Some(h));
        }
        if let Some(h) = incompatible(record.exclusive, tx, stx) {
            return Availability::NotAvailable(h);
        }
        Availability::Available
    }

    /// Classifies an entry for a read or take by the requester.
    #[must_use]
    pub fn entry_availability(
        &self,
        target: LockTarget,
        access: EntryAccess,
        level: IsolationLevel,
        tx: TransactionId,
        stx: SubTransactionId,
    ) -> Availability {
        let state = self.state.lock();
        let Some(record) = state.records.get(&target) else {
            return Availability::NotVisible(None);
        };
        if let Some(h) = incompatible(record.insert, tx, stx) {
            return Availability::NotVisible(Some(h));
        }
        match (access, level) {
            (EntryAccess::Read, IsolationLevel::ReadCommitted) => match record.delete {
                Some(h) if h.compatible(tx, stx) => Availability::NotVisible(Some(h)),
                _ => Availability::Available,
            },
            (EntryAccess::Read, IsolationLevel::RepeatableRead) => match record.delete {
                Some(h) if h.tx == tx => Availability::NotVisible(Some(h)),
                Some(h) => Availability::NotAvailable(h),
                None => Availability::Available,
            },
            (EntryAccess::Take, _) => {
                if let Some(h) = record.delete {
                    return if h.compatible(tx, stx) {
                        Availability::NotVisible(Some(h))
                    } else {
                        Availability::NotAvailable(h)
                    };
                }
                match record.blocking_reader(tx, stx) {
                    Some(h) => Availability::NotAvailable(h),
                    None => Availability::Available,
                }
            }
        }
    }

    /// Returns true if `new` may take the place of `base`.
    ///
    /// That is the case when `base` is delete-locked by the transaction
    /// that insert-locked `new`, and, while that delete lock is still
    /// short-term, by the same sub-transaction.
    #[must_use]
    pub fn is_valid_overwrite(&self, base: LockTarget, new: LockTarget) -> bool {
        let state = self.state.lock();
        let deleted = state.records.get(&base).and_then(|r| r.delete);
        let inserted = state.records.get(&new).and_then(|r| r.insert);
        match (deleted, inserted) {
            (Some(d), Some(i)) => d.tx == i.tx && (d.stx.is_none() || d.stx == i.stx),
            _ => false,
        }
    }

    /// Acquires the structure lock of a coordinator.
    ///
    /// Another sub-transaction of the same transaction may share it.
    ///
    /// # Errors
    ///
    /// Returns the holder if another transaction owns the lock.
    pub fn acquire_coordinator(
        &self,
        container: ContainerId,
        coordinator: &str,
        tx: TransactionId,
        stx: SubTransactionId,
    ) -> Result<LockGrant, LockHolder> {
        let mut state = self.state.lock();
        let key = (container, coordinator.to_string());
        match state.coordinators.get(&key) {
            Some(h) if h.tx != tx => Err(*h),
            Some(_) => Ok(LockGrant::AlreadyHeld),
            None => {
                state
                    .coordinators
                    .insert(key, LockHolder::new(tx, Some(stx)));
                Ok(LockGrant::Granted)
            }
        }
    }

    /// Releases the structure lock of a coordinator held by `(tx, stx)`.
    pub fn release_coordinator(
        &self,
        container: ContainerId,
        coordinator: &str,
        tx: TransactionId,
        stx: SubTransactionId,
    ) {
        let mut state = self.state.lock();
        let key = (container, coordinator.to_string());
        if state.coordinators.get(&key) == Some(&LockHolder::new(tx, Some(stx))) {
            state.coordinators.remove(&key);
        }
    }

    /// Returns true if no lock is held on `target`.
    #[must_use]
    pub fn is_unlocked(&self, target: LockTarget) -> bool {
        self.state
            .lock()
            .records
            .get(&target)
            .map_or(true, LockRecord::is_unlocked)
    }

    /// Number of lock records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: ContainerId = ContainerId::new(1);
    const E: LockTarget = LockTarget::Entry(ContainerId::new(1), EntryId::new(10));
    const E2: LockTarget = LockTarget::Entry(ContainerId::new(1), EntryId::new(11));

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    fn stx(n: u64) -> SubTransactionId {
        SubTransactionId::new(n)
    }

    fn avail(t: &LockTable, access: EntryAccess, level: IsolationLevel, x: u64, s: u64) -> Availability {
        t.entry_availability(E, access, level, tx(x), stx(s))
    }

    #[test]
    fn uncommitted_insert_is_invisible_to_others() {
        let t = LockTable::new();
        t.create_with_insert(E, tx(1), stx(1));

        let rc = IsolationLevel::ReadCommitted;
        assert_eq!(avail(&t, EntryAccess::Read, rc, 1, 1), Availability::Available);
        assert!(matches!(
            avail(&t, EntryAccess::Read, rc, 1, 2),
            Availability::NotVisible(_)
        ));
        assert!(matches!(
            avail(&t, EntryAccess::Take, rc, 2, 3),
            Availability::NotVisible(_)
        ));

        t.surrender(E, LockKind::Insert, tx(1), stx(1));
        assert_eq!(avail(&t, EntryAccess::Read, rc, 1, 2), Availability::Available);
        assert!(matches!(
            avail(&t, EntryAccess::Read, rc, 2, 3),
            Availability::NotVisible(_)
        ));

        t.release(E, LockKind::Insert, tx(1), None);
        assert_eq!(avail(&t, EntryAccess::Read, rc, 2, 3), Availability::Available);
    }

    #[test]
    fn delete_lock_rules_per_isolation_level() {
        let t = LockTable::new();
        t.create_unlocked(E);
        assert_eq!(
            t.add_lock(E, LockKind::Delete, tx(1), stx(1)),
            Ok(LockGrant::Granted)
        );

        let rc = IsolationLevel::ReadCommitted;
        let rr = IsolationLevel::RepeatableRead;
        // Own sub-transaction no longer sees what it took.
        assert!(matches!(
            avail(&t, EntryAccess::Read, rc, 1, 1),
            Availability::NotVisible(_)
        ));
        // A sibling sub-transaction still reads it under read-committed.
        assert_eq!(avail(&t, EntryAccess::Read, rc, 1, 2), Availability::Available);
        // Other transactions read it under read-committed only.
        assert_eq!(avail(&t, EntryAccess::Read, rc, 2, 5), Availability::Available);
        assert!(matches!(
            avail(&t, EntryAccess::Read, rr, 2, 5),
            Availability::NotAvailable(_)
        ));
        assert!(matches!(
            avail(&t, EntryAccess::Take, rc, 2, 5),
            Availability::NotAvailable(h) if h.tx == tx(1)
        ));
    }

    #[test]
    fn take_is_blocked_by_foreign_read_lock() {
        let t = LockTable::new();
        t.create_unlocked(E);
        t.add_lock(E, LockKind::Read, tx(1), stx(1)).unwrap();

        assert!(matches!(
            avail(&t, EntryAccess::Take, IsolationLevel::ReadCommitted, 2, 2),
            Availability::NotAvailable(_)
        ));
        assert_eq!(
            t.add_lock(E, LockKind::Delete, tx(2), stx(2)),
            Err(Some(LockHolder::new(tx(1), Some(stx(1)))))
        );
        // The reader itself may upgrade.
        assert_eq!(
            t.add_lock(E, LockKind::Delete, tx(1), stx(1)),
            Ok(LockGrant::Granted)
        );
    }

    #[test]
    fn any_delete_lock_blocks_another_delete() {
        let t = LockTable::new();
        t.create_unlocked(E);
        t.add_lock(E, LockKind::Delete, tx(1), stx(1)).unwrap();
        assert!(t.add_lock(E, LockKind::Delete, tx(1), stx(1)).is_err());
        assert!(t.add_lock(E, LockKind::Delete, tx(2), stx(2)).is_err());
    }

    #[test]
    fn read_lock_is_blocked_by_foreign_delete() {
        let t = LockTable::new();
        t.create_unlocked(E);
        t.add_lock(E, LockKind::Delete, tx(1), stx(1)).unwrap();
        assert!(t.add_lock(E, LockKind::Read, tx(2), stx(2)).is_err());
    }

    #[test]
    fn release_short_term_read_keeps_long_term() {
        let t = LockTable::new();
        t.create_unlocked(E);
        t.add_lock(E, LockKind::Read, tx(1), stx(1)).unwrap();
        t.surrender(E, LockKind::Read, tx(1), stx(1));
        assert_eq!(
            t.add_lock(E, LockKind::Read, tx(1), stx(2)),
            Ok(LockGrant::AlreadyHeld)
        );
        t.release(E, LockKind::Read, tx(1), Some(stx(2)));
        assert!(!t.is_unlocked(E));
        t.release(E, LockKind::Read, tx(1), None);
        assert!(t.is_unlocked(E));
    }

    #[test]
    fn insert_lock_request_is_rejected() {
        let t = LockTable::new();
        t.create_unlocked(E);
        assert_eq!(t.add_lock(E, LockKind::Insert, tx(1), stx(1)), Err(None));
        assert_eq!(
            t.add_lock(E2, LockKind::Read, tx(1), stx(1)),
            Err(None),
            "missing record"
        );
    }

    #[test]
    fn container_availability_rules() {
        let t = LockTable::new();
        let target = LockTarget::Container(C);
        assert_eq!(
            t.container_availability(C, tx(1), stx(1)),
            Availability::NotVisible(None)
        );

        t.create_with_insert(target, tx(1), stx(1));
        assert_eq!(t.container_availability(C, tx(1), stx(1)), Availability::Available);
        assert!(matches!(
            t.container_availability(C, tx(2), stx(2)),
            Availability::NotVisible(_)
        ));
        t.surrender(target, LockKind::Insert, tx(1), stx(1));
        t.release(target, LockKind::Insert, tx(1), None);

        t.add_lock(target, LockKind::Exclusive, tx(1), stx(3)).unwrap();
        assert!(matches!(
            t.container_availability(C, tx(2), stx(2)),
            Availability::NotAvailable(_)
        ));
        assert_eq!(t.container_availability(C, tx(1), stx(3)), Availability::Available);
        t.release(target, LockKind::Exclusive, tx(1), Some(stx(3)));

        t.add_lock(target, LockKind::Delete, tx(1), stx(4)).unwrap();
        assert!(matches!(
            t.container_availability(C, tx(1), stx(4)),
            Availability::NotVisible(_)
        ));
        assert!(matches!(
            t.container_availability(C, tx(2), stx(2)),
            Availability::NotAvailable(_)
        ));
    }

    #[test]
    fn long_term_exclusive_is_not_downgraded() {
        let t = LockTable::new();
        let target = LockTarget::Container(C);
        t.create_unlocked(target);
        t.add_lock(target, LockKind::Exclusive, tx(1), stx(1)).unwrap();
        t.surrender(target, LockKind::Exclusive, tx(1), stx(1));
        assert_eq!(
            t.add_lock(target, LockKind::Exclusive, tx(1), stx(2)),
            Ok(LockGrant::AlreadyHeld)
        );
    }

    #[test]
    fn valid_overwrite_requires_same_transaction() {
        let t = LockTable::new();
        t.create_unlocked(E);
        t.add_lock(E, LockKind::Delete, tx(1), stx(1)).unwrap();

        t.create_with_insert(E2, tx(1), stx(1));
        assert!(t.is_valid_overwrite(E, E2));

        t.create_with_insert(E2, tx(1), stx(2));
        assert!(!t.is_valid_overwrite(E, E2), "sibling with short-term delete");

        t.surrender(E, LockKind::Delete, tx(1), stx(1));
        assert!(t.is_valid_overwrite(E, E2));

        t.create_with_insert(E2, tx(2), stx(9));
        assert!(!t.is_valid_overwrite(E, E2));
    }

    #[test]
    fn coordinator_lock_is_shared_within_transaction() {
        let t = LockTable::new();
        assert_eq!(
            t.acquire_coordinator(C, "vector", tx(1), stx(1)),
            Ok(LockGrant::Granted)
        );
        assert_eq!(
            t.acquire_coordinator(C, "vector", tx(1), stx(2)),
            Ok(LockGrant::AlreadyHeld)
        );
        assert!(t.acquire_coordinator(C, "vector", tx(2), stx(3)).is_err());

        t.release_coordinator(C, "vector", tx(1), stx(2));
        assert!(t.acquire_coordinator(C, "vector", tx(2), stx(3)).is_err());
        t.release_coordinator(C, "vector", tx(1), stx(1));
        assert!(t.acquire_coordinator(C, "vector", tx(2), stx(3)).is_ok());
    }

    #[test]
    fn purge_container_drops_all_records() {
        let t = LockTable::new();
        t.create_unlocked(LockTarget::Container(C));
        t.create_unlocked(E);
        t.create_unlocked(LockTarget::Entry(ContainerId::new(2), EntryId::new(1)));
        t.purge_container(C);
        assert_eq!(t.record_count(), 1);
    }
}
