//! Container lifecycle: create, look up, destroy, restore.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::container::descriptor::{ContainerDefinition, ContainerDescriptor};
use crate::container::store::Container;
use crate::coordination::CoordinatorRegistry;
use crate::error::{CoreError, CoreResult};
use crate::isolation::{
    ContainerCreateLogItem, ContainerDestroyLogItem, LockGrant, LockKind, LockTable, LockTarget,
    SubTransaction,
};
use crate::types::ContainerId;

#[derive(Default)]
struct Directory {
    containers: BTreeMap<ContainerId, Arc<Container>>,
    names: HashMap<String, ContainerId>,
}

/// Owns every container of a space.
///
/// Creation and destruction are transactional: a created container is
/// insert-locked and a destroyed one delete-locked until the
/// transaction ends, and the log items recorded here finish the job.
pub struct ContainerManager {
    space: uuid::Uuid,
    locks: Arc<LockTable>,
    registry: CoordinatorRegistry,
    next_container: AtomicU64,
    next_entry: Arc<AtomicU64>,
    directory: RwLock<Directory>,
}

impl ContainerManager {
    /// Creates a manager for the space `space`.
    #[must_use]
    pub fn new(space: uuid::Uuid, locks: Arc<LockTable>, registry: CoordinatorRegistry) -> Self {
        Self {
            space,
            locks,
            registry,
            next_container: AtomicU64::new(1),
            next_entry: Arc::new(AtomicU64::new(1)),
            directory: RwLock::new(Directory::default()),
        }
    }

    /// Id of the owning space.
    #[must_use]
    pub fn space_id(&self) -> uuid::Uuid {
        self.space
    }

    fn build(&self, descriptor: ContainerDescriptor) -> CoreResult<Arc<Container>> {
        Ok(Arc::new(Container::new(
            descriptor,
            self.space,
            &self.registry,
            Arc::clone(&self.locks),
            Arc::clone(&self.next_entry),
        )?))
    }

    /// Creates a container, insert-locked by the sub-transaction.
    ///
    /// # Errors
    ///
    /// Fails with `ContainerNameNotAvailable` for a taken name,
    /// `DuplicateCoordinator`, or `CoordinatorNotRegistered`.
    pub fn create(
        self: &Arc<Self>,
        stx: &SubTransaction,
        definition: ContainerDefinition,
    ) -> CoreResult<Arc<Container>> {
        let id = ContainerId::new(self.next_container.fetch_add(1, Ordering::SeqCst));
        let container = self.build(definition.into_descriptor(id))?;
        {
            let mut directory = self.directory.write();
            if let Some(name) = container.name() {
                if directory.names.contains_key(name) {
                    return Err(CoreError::ContainerNameNotAvailable {
                        name: name.to_string(),
                    });
                }
                directory.names.insert(name.to_string(), id);
            }
            self.locks.create_with_insert(
                LockTarget::Container(id),
                stx.transaction_id(),
                stx.id(),
            );
            directory.containers.insert(id, Arc::clone(&container));
        }
        let logged = stx.add_log(Box::new(ContainerCreateLogItem {
            locks: Arc::clone(&self.locks),
            manager: Arc::clone(self),
            container: Arc::clone(&container),
        }));
        if let Err(e) = logged {
            self.purge_container(id);
            return Err(e);
        }
        info!(container = %id, name = ?container.name(), "container created");
        Ok(container)
    }

    /// Returns a container regardless of visibility.
    ///
    /// # Errors
    ///
    /// Returns `ContainerNotFound` if no container has this id.
    pub fn get(&self, id: ContainerId) -> CoreResult<Arc<Container>> {
        self.directory
            .read()
            .containers
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::container_not_found(id.to_string()))
    }

    /// Returns a container visible to the sub-transaction.
    ///
    /// # Errors
    ///
    /// Returns `ContainerNotFound` if it does not exist for `stx`.
    pub fn resolve(&self, stx: &SubTransaction, id: ContainerId) -> CoreResult<Arc<Container>> {
        let container = self.get(id)?;
        if container.is_visible(stx) {
            Ok(container)
        } else {
            Err(CoreError::container_not_found(id.to_string()))
        }
    }

    /// Looks a container up by name.
    ///
    /// # Errors
    ///
    /// Returns `ContainerNotFound` if no container of that name is
    /// visible to `stx`.
    pub fn lookup(&self, stx: &SubTransaction, name: &str) -> CoreResult<Arc<Container>> {
        let container = {
            let directory = self.directory.read();
            directory
                .names
                .get(name)
                .and_then(|id| directory.containers.get(id))
                .cloned()
        };
        match container {
            Some(c) if c.is_visible(stx) => Ok(c),
            _ => Err(CoreError::container_not_found(name)),
        }
    }

    /// Delete-locks a container; the transaction's commit purges it.
    ///
    /// # Errors
    ///
    /// Returns `ContainerLocked` if another transaction holds a lock on
    /// it, or `ContainerNotFound`.
    pub fn destroy(self: &Arc<Self>, stx: &SubTransaction, id: ContainerId) -> CoreResult<()> {
        let container = self.get(id)?;
        container.check_available(stx)?;
        match self.locks.add_lock(
            LockTarget::Container(id),
            LockKind::Delete,
            stx.transaction_id(),
            stx.id(),
        ) {
            Ok(LockGrant::Granted) => {
                stx.add_log(Box::new(ContainerDestroyLogItem {
                    locks: Arc::clone(&self.locks),
                    manager: Arc::clone(self),
                    container: id,
                }))?;
                debug!(container = %id, stx = %stx.id(), "container destroy pending");
                Ok(())
            }
            Ok(LockGrant::AlreadyHeld) => Ok(()),
            Err(Some(holder)) => Err(CoreError::ContainerLocked { holder }),
            Err(None) => Err(CoreError::container_not_found(id.to_string())),
        }
    }

    /// Drops a container, its entries and every lock record.
    pub(crate) fn purge_container(&self, id: ContainerId) {
        let removed = {
            let mut directory = self.directory.write();
            let removed = directory.containers.remove(&id);
            if let Some(name) = removed.as_ref().and_then(|c| c.name()) {
                directory.names.remove(name);
            }
            removed
        };
        self.locks.purge_container(id);
        if removed.is_some() {
            info!(container = %id, "container purged");
        }
    }

    /// Rebuilds a persisted container, unlocked.
    ///
    /// # Errors
    ///
    /// Fails for a descriptor whose coordinators cannot be built or whose
    /// name is taken.
    pub fn restore(&self, descriptor: ContainerDescriptor) -> CoreResult<Arc<Container>> {
        let id = descriptor.id;
        let container = self.build(descriptor)?;
        let mut directory = self.directory.write();
        if let Some(name) = container.name() {
            if directory.names.contains_key(name) {
                return Err(CoreError::ContainerNameNotAvailable {
                    name: name.to_string(),
                });
            }
            directory.names.insert(name.to_string(), id);
        }
        self.locks.create_unlocked(LockTarget::Container(id));
        directory.containers.insert(id, Arc::clone(&container));
        self.next_container
            .fetch_max(id.as_u64() + 1, Ordering::SeqCst);
        Ok(container)
    }

    /// Every container, visible or not, in id order.
    #[must_use]
    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.directory.read().containers.values().cloned().collect()
    }

    /// Number of containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.directory.read().containers.len()
    }

    /// Returns true if there is no container.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ContainerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerManager")
            .field("space", &self.space)
            .field("containers", &self.len())
            .finish_non_exhaustive()
    }
}
