//! A container: entries plus the coordinators indexing them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;
use tuplespace_codec::Value;

use crate::container::descriptor::ContainerDescriptor;
use crate::container::entry::Entry;
use crate::container::stats::{ContainerStats, ContainerStatsSnapshot, Counted};
use crate::context::IsolationLevel;
use crate::coordination::{
    CoordinationData, CoordinationPayload, Coordinator, CoordinatorRegistry, EntryFilter,
    RegisterContext, SelectionContext, Selector,
};
use crate::error::{CoreError, CoreResult};
use crate::isolation::{
    Availability, ContainerLockLogItem, CoordinatorLockLogItem, EntryAccess, LockGrant, LockHolder,
    LockKind, LockTable, LockTarget, ReadLogItem, SubTransaction, TakeLogItem, WriteLogItem,
};
use crate::types::{ContainerId, ContainerRef, EntryId};

struct Slot {
    coordinator: Arc<dyn Coordinator>,
    obligatory: bool,
}

/// A named collection of entries.
///
/// The container keeps registration consistent across its coordinators
/// and records every lock it takes in the calling sub-transaction, so
/// that the sub-transaction's finish releases or purges it.
pub struct Container {
    descriptor: ContainerDescriptor,
    space: uuid::Uuid,
    locks: Arc<LockTable>,
    coordinators: Vec<Slot>,
    entries: RwLock<BTreeMap<EntryId, Arc<Entry>>>,
    next_entry: Arc<AtomicU64>,
    stats: ContainerStats,
}

impl Container {
    /// Builds an empty container from its descriptor.
    ///
    /// # Errors
    ///
    /// Fails with `DuplicateCoordinator` if two coordinators share a
    /// name, or with the registry's error for an unknown kind.
    pub(crate) fn new(
        descriptor: ContainerDescriptor,
        space: uuid::Uuid,
        registry: &CoordinatorRegistry,
        locks: Arc<LockTable>,
        next_entry: Arc<AtomicU64>,
    ) -> CoreResult<Self> {
        let mut names = HashSet::new();
        let mut coordinators = Vec::new();
        for (spec, obligatory) in descriptor.coordinators() {
            if !names.insert(spec.name.as_str()) {
                return Err(CoreError::DuplicateCoordinator {
                    name: spec.name.clone(),
                });
            }
            coordinators.push(Slot {
                coordinator: registry.create(spec)?,
                obligatory,
            });
        }
        Ok(Self {
            descriptor,
            space,
            locks,
            coordinators,
            entries: RwLock::new(BTreeMap::new()),
            next_entry,
            stats: ContainerStats::default(),
        })
    }

    /// Returns the container id.
    #[must_use]
    pub fn id(&self) -> ContainerId {
        self.descriptor.id
    }

    /// Returns the container name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.descriptor.name.as_deref()
    }

    /// Returns the reference remote peers use for this container.
    #[must_use]
    pub fn reference(&self) -> ContainerRef {
        ContainerRef {
            space: self.space,
            id: self.id(),
        }
    }

    /// Returns the size limit.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.descriptor.size
    }

    /// Returns a copy of the descriptor.
    #[must_use]
    pub fn descriptor(&self) -> ContainerDescriptor {
        self.descriptor.clone()
    }

    /// Looks up a coordinator by name.
    #[must_use]
    pub fn coordinator(&self, name: &str) -> Option<Arc<dyn Coordinator>> {
        self.coordinators
            .iter()
            .find(|s| s.coordinator.name() == name)
            .map(|s| Arc::clone(&s.coordinator))
    }

    /// Number of stored entries, committed or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a stored entry.
    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<Arc<Entry>> {
        self.entries.read().get(&id).cloned()
    }

    /// All stored entries in id order, ignoring isolation.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        self.entries.read().values().cloned().collect()
    }

    /// Operation counters.
    #[must_use]
    pub fn stats(&self) -> ContainerStatsSnapshot {
        self.stats.snapshot(self.len())
    }

    fn label(&self) -> String {
        self.descriptor.label()
    }

    /// Returns true if the container exists for the sub-transaction.
    #[must_use]
    pub fn is_visible(&self, stx: &SubTransaction) -> bool {
        !matches!(
            self.locks
                .container_availability(self.id(), stx.transaction_id(), stx.id()),
            Availability::NotVisible(_)
        )
    }

    /// Fails unless the sub-transaction may operate on the container.
    ///
    /// # Errors
    ///
    /// Returns `ContainerNotFound` for an invisible container and
    /// `ContainerLocked` for one locked by another transaction.
    pub fn check_available(&self, stx: &SubTransaction) -> CoreResult<()> {
        match self
            .locks
            .container_availability(self.id(), stx.transaction_id(), stx.id())
        {
            Availability::Available => Ok(()),
            Availability::NotAvailable(holder) => Err(CoreError::ContainerLocked { holder }),
            Availability::NotVisible(_) => Err(CoreError::container_not_found(self.label())),
        }
    }

    /// Coordinators a write registers with, and the payload for each.
    fn plan<'a>(
        &'a self,
        data: &[CoordinationData],
    ) -> CoreResult<Vec<(&'a Arc<dyn Coordinator>, CoordinationPayload)>> {
        if let Some(unknown) = data
            .iter()
            .find(|d| self.coordinator(&d.coordinator).is_none())
        {
            return Err(CoreError::coordinator_not_registered(
                unknown.coordinator.clone(),
            ));
        }
        let mut plan = Vec::with_capacity(self.coordinators.len());
        for slot in &self.coordinators {
            let c = &slot.coordinator;
            let supplied = data.iter().find(|d| d.coordinator == c.name());
            let payload = match supplied {
                Some(d) => d.payload.clone(),
                None if c.is_implicit() => c.default_payload(),
                None if slot.obligatory => {
                    return Err(CoreError::ObligatoryCoordinatorMissing {
                        name: c.name().to_string(),
                    })
                }
                None => continue,
            };
            plan.push((c, payload));
        }
        Ok(plan)
    }

    fn lock_coordinator(&self, stx: &SubTransaction, name: &str) -> CoreResult<()> {
        match self
            .locks
            .acquire_coordinator(self.id(), name, stx.transaction_id(), stx.id())
        {
            Ok(LockGrant::Granted) => stx.add_log(Box::new(CoordinatorLockLogItem {
                locks: Arc::clone(&self.locks),
                container: self.id(),
                coordinator: name.to_string(),
            })),
            Ok(LockGrant::AlreadyHeld) => Ok(()),
            Err(holder) => Err(CoreError::CoordinatorLocked {
                coordinator: name.to_string(),
                holder,
            }),
        }
    }

    /// Writes an entry, insert-locked by the sub-transaction.
    ///
    /// # Errors
    ///
    /// Fails with `ContainerFull`, structural errors for bad coordination
    /// data, `DuplicateKey`, `CoordinatorLocked`, or the container
    /// availability errors.
    pub fn write(
        self: &Arc<Self>,
        stx: &SubTransaction,
        value: Value,
        data: Vec<CoordinationData>,
    ) -> CoreResult<Arc<Entry>> {
        let result = self.try_write(stx, value, data);
        self.stats.record(Counted::Write, result.is_ok());
        result
    }

    fn try_write(
        self: &Arc<Self>,
        stx: &SubTransaction,
        value: Value,
        data: Vec<CoordinationData>,
    ) -> CoreResult<Arc<Entry>> {
        self.check_available(stx)?;
        let plan = self.plan(&data)?;
        for (c, _) in &plan {
            if c.needs_structure_lock() {
                self.lock_coordinator(stx, c.name())?;
            }
        }

        let entry = {
            let mut entries = self.entries.write();
            if let Some(size) = self.descriptor.size {
                if entries.len() >= size {
                    return Err(CoreError::ContainerFull {
                        container: self.label(),
                        size,
                    });
                }
            }
            let id = EntryId::new(self.next_entry.fetch_add(1, Ordering::SeqCst));
            let entry = Arc::new(Entry::new(id, self.id(), value, data));
            let target = LockTarget::Entry(self.id(), id);
            self.locks
                .create_with_insert(target, stx.transaction_id(), stx.id());

            let ctx = RegisterContext::new(&self.locks, self.id());
            let mut registered: Vec<&Arc<dyn Coordinator>> = Vec::new();
            for (c, payload) in &plan {
                if let Err(e) = c.register(&entry, payload, &ctx) {
                    for r in registered {
                        r.unregister(id);
                    }
                    self.locks.purge(target);
                    return Err(e);
                }
                registered.push(*c);
            }
            entries.insert(id, Arc::clone(&entry));
            entry
        };

        let logged = stx.add_log(Box::new(WriteLogItem {
            locks: Arc::clone(&self.locks),
            container: Arc::clone(self),
            entry: Arc::clone(&entry),
        }));
        if let Err(e) = logged {
            self.purge_entry(entry.id());
            return Err(e);
        }
        trace!(container = %self.id(), entry = %entry.id(), stx = %stx.id(), "entry written");
        Ok(entry)
    }

    /// Runs a selector chain without taking any lock.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidSelector` for an empty chain,
    /// `CoordinatorNotRegistered` for an unknown coordinator, or the
    /// coordinators' selection errors.
    pub fn select(
        &self,
        stx: &SubTransaction,
        selectors: &[Selector],
        access: EntryAccess,
        level: IsolationLevel,
        filter: Option<EntryFilter<'_>>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        if selectors.is_empty() {
            return Err(CoreError::invalid_selector("empty selector chain"));
        }
        let mut ctx = SelectionContext::new(
            &self.locks,
            self.id(),
            access,
            level,
            stx.transaction_id(),
            stx.id(),
        );
        if let Some(filter) = filter {
            ctx = ctx.with_entry_filter(filter);
        }
        let mut result = None;
        for selector in selectors {
            let coordinator = self
                .coordinator(&selector.coordinator)
                .ok_or_else(|| CoreError::coordinator_not_registered(selector.coordinator.clone()))?;
            result = Some(coordinator.select(selector, result, &mut ctx)?);
        }
        Ok(result.unwrap_or_default())
    }

    /// An entry vanished between selection and locking.
    fn lock_lost(
        selectors: &[Selector],
        holder: Option<LockHolder>,
        requested: usize,
        found: usize,
    ) -> CoreError {
        match holder {
            Some(holder) => CoreError::EntryLocked { holder },
            None => CoreError::CountNotMet {
                coordinator: selectors
                    .first()
                    .map(|s| s.coordinator.clone())
                    .unwrap_or_default(),
                requested,
                found,
            },
        }
    }

    /// Reads entries; under repeatable read they are read-locked.
    ///
    /// # Errors
    ///
    /// See [`select`](Self::select), plus `EntryLocked` when a read lock
    /// cannot be taken.
    pub fn read(
        &self,
        stx: &SubTransaction,
        selectors: &[Selector],
        level: IsolationLevel,
        filter: Option<EntryFilter<'_>>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        let result = self.try_read(stx, selectors, level, filter);
        self.stats.record(Counted::Read, result.is_ok());
        result
    }

    fn try_read(
        &self,
        stx: &SubTransaction,
        selectors: &[Selector],
        level: IsolationLevel,
        filter: Option<EntryFilter<'_>>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        self.check_available(stx)?;
        let entries = self.select(stx, selectors, EntryAccess::Read, level, filter)?;
        if level == IsolationLevel::RepeatableRead {
            for (i, entry) in entries.iter().enumerate() {
                let target = LockTarget::Entry(self.id(), entry.id());
                match self
                    .locks
                    .add_lock(target, LockKind::Read, stx.transaction_id(), stx.id())
                {
                    Ok(LockGrant::Granted) => stx.add_log(Box::new(ReadLogItem {
                        locks: Arc::clone(&self.locks),
                        target,
                    }))?,
                    Ok(LockGrant::AlreadyHeld) => {}
                    Err(holder) => {
                        return Err(Self::lock_lost(selectors, holder, entries.len(), i))
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Takes entries: each is delete-locked now and purged when the
    /// transaction commits.
    ///
    /// # Errors
    ///
    /// See [`select`](Self::select), plus `EntryLocked` and
    /// `CoordinatorLocked` when a lock cannot be taken.
    pub fn take(
        self: &Arc<Self>,
        stx: &SubTransaction,
        selectors: &[Selector],
        level: IsolationLevel,
        filter: Option<EntryFilter<'_>>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        let result = self.try_take(stx, selectors, level, filter);
        self.stats.record(Counted::Take, result.is_ok());
        result
    }

    fn try_take(
        self: &Arc<Self>,
        stx: &SubTransaction,
        selectors: &[Selector],
        level: IsolationLevel,
        filter: Option<EntryFilter<'_>>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        self.check_available(stx)?;
        let entries = self.select(stx, selectors, EntryAccess::Take, level, filter)?;
        for (i, entry) in entries.iter().enumerate() {
            for slot in &self.coordinators {
                let c = &slot.coordinator;
                if c.needs_structure_lock() && c.contains(entry.id()) {
                    self.lock_coordinator(stx, c.name())?;
                }
            }
            let target = LockTarget::Entry(self.id(), entry.id());
            match self
                .locks
                .add_lock(target, LockKind::Delete, stx.transaction_id(), stx.id())
            {
                Ok(LockGrant::Granted) => stx.add_log(Box::new(TakeLogItem {
                    locks: Arc::clone(&self.locks),
                    container: Arc::clone(self),
                    entry: Arc::clone(entry),
                }))?,
                Ok(LockGrant::AlreadyHeld) => {}
                Err(holder) => return Err(Self::lock_lost(selectors, holder, entries.len(), i)),
            }
        }
        trace!(container = %self.id(), taken = entries.len(), stx = %stx.id(), "entries taken");
        Ok(entries)
    }

    /// Locks the container exclusively for the transaction.
    ///
    /// # Errors
    ///
    /// Returns `ContainerLocked` if another transaction holds a
    /// conflicting lock.
    pub fn lock(&self, stx: &SubTransaction) -> CoreResult<()> {
        self.check_available(stx)?;
        match self.locks.add_lock(
            LockTarget::Container(self.id()),
            LockKind::Exclusive,
            stx.transaction_id(),
            stx.id(),
        ) {
            Ok(LockGrant::Granted) => stx.add_log(Box::new(ContainerLockLogItem {
                locks: Arc::clone(&self.locks),
                container: self.id(),
            })),
            Ok(LockGrant::AlreadyHeld) => Ok(()),
            Err(Some(holder)) => Err(CoreError::ContainerLocked { holder }),
            Err(None) => Err(CoreError::container_not_found(self.label())),
        }
    }

    /// Removes an entry from every coordinator and drops its lock record.
    pub(crate) fn purge_entry(&self, id: EntryId) {
        {
            let mut entries = self.entries.write();
            if entries.remove(&id).is_some() {
                for slot in &self.coordinators {
                    slot.coordinator.unregister(id);
                }
            }
        }
        self.locks.purge(LockTarget::Entry(self.id(), id));
    }

    /// Re-registers a persisted entry without any lock.
    ///
    /// # Errors
    ///
    /// Fails if the stored coordination data no longer fits.
    pub(crate) fn restore_entry(&self, entry: Entry) -> CoreResult<()> {
        let entry = Arc::new(entry);
        let plan = self.plan(entry.coordination_data())?;
        let target = LockTarget::Entry(self.id(), entry.id());
        self.locks.create_unlocked(target);
        let ctx = RegisterContext::new(&self.locks, self.id()).restoring();
        let mut entries = self.entries.write();
        for (c, payload) in &plan {
            c.register(&entry, payload, &ctx)?;
        }
        self.next_entry
            .fetch_max(entry.id().as_u64() + 1, Ordering::SeqCst);
        entries.insert(entry.id(), entry);
        Ok(())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coordinators: Vec<_> = self
            .coordinators
            .iter()
            .map(|s| s.coordinator.name())
            .collect();
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("name", &self.descriptor.name)
            .field("size", &self.descriptor.size)
            .field("coordinators", &coordinators)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
