//! The closed set of requests a space executes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tuplespace_codec::Value;

use crate::aspects::Aspect;
use crate::container::{ContainerDefinition, Entry};
use crate::coordination::{CoordinationData, Selector};
use crate::types::{AspectId, ContainerId, ContainerRef};

/// Kinds of operations, as seen by aspects and access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Read entries.
    Read,
    /// Take entries.
    Take,
    /// Write entries.
    Write,
    /// Take entries, returning only their number.
    Delete,
    /// Read entries, returning only their number.
    Test,
    /// Create a container.
    CreateContainer,
    /// Look a container up by name.
    LookupContainer,
    /// Destroy a container.
    DestroyContainer,
    /// Lock a container.
    LockContainer,
    /// Register an aspect.
    AddAspect,
    /// Unregister an aspect.
    RemoveAspect,
    /// Commit a transaction.
    CommitTransaction,
    /// Roll a transaction back.
    RollbackTransaction,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Take => "take",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Test => "test",
            Self::CreateContainer => "create-container",
            Self::LookupContainer => "lookup-container",
            Self::DestroyContainer => "destroy-container",
            Self::LockContainer => "lock-container",
            Self::AddAspect => "add-aspect",
            Self::RemoveAspect => "remove-aspect",
            Self::CommitTransaction => "commit",
            Self::RollbackTransaction => "rollback",
        };
        f.write_str(name)
    }
}

/// One entry of a write request.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEntry {
    /// The payload.
    pub value: Value,
    /// Coordination data; implicit coordinators fill in the rest.
    pub coordination_data: Vec<CoordinationData>,
    /// Requested lifetime. Accepted but not enforced.
    pub ttl: Option<Duration>,
}

impl WriteEntry {
    /// An entry without coordination data.
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            coordination_data: Vec::new(),
            ttl: None,
        }
    }

    /// Adds coordination data.
    #[must_use]
    pub fn with(mut self, data: CoordinationData) -> Self {
        self.coordination_data.push(data);
        self
    }

    /// Sets the lifetime.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl From<Value> for WriteEntry {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// A request.
#[derive(Clone)]
pub enum Operation {
    /// Write entries into a container.
    Write {
        /// Target container.
        container: ContainerId,
        /// Entries in write order.
        entries: Vec<WriteEntry>,
    },
    /// Read entries.
    Read {
        /// Target container.
        container: ContainerId,
        /// Selector chain.
        selectors: Vec<Selector>,
    },
    /// Take entries.
    Take {
        /// Target container.
        container: ContainerId,
        /// Selector chain.
        selectors: Vec<Selector>,
    },
    /// Take entries and count them.
    Delete {
        /// Target container.
        container: ContainerId,
        /// Selector chain.
        selectors: Vec<Selector>,
    },
    /// Read entries and count them.
    Test {
        /// Target container.
        container: ContainerId,
        /// Selector chain.
        selectors: Vec<Selector>,
    },
    /// Create a container.
    CreateContainer(ContainerDefinition),
    /// Look a container up by name.
    LookupContainer(String),
    /// Destroy a container when the transaction commits.
    DestroyContainer(ContainerId),
    /// Lock a container for the transaction.
    LockContainer(ContainerId),
    /// Register an aspect, space-wide or for one container.
    AddAspect {
        /// Container the aspect applies to; `None` is space-wide.
        container: Option<ContainerId>,
        /// The aspect.
        aspect: Arc<dyn Aspect>,
    },
    /// Unregister an aspect.
    RemoveAspect(AspectId),
}

impl Operation {
    /// The kind of the operation.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Write { .. } => OperationKind::Write,
            Self::Read { .. } => OperationKind::Read,
            Self::Take { .. } => OperationKind::Take,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Test { .. } => OperationKind::Test,
            Self::CreateContainer(_) => OperationKind::CreateContainer,
            Self::LookupContainer(_) => OperationKind::LookupContainer,
            Self::DestroyContainer(_) => OperationKind::DestroyContainer,
            Self::LockContainer(_) => OperationKind::LockContainer,
            Self::AddAspect { .. } => OperationKind::AddAspect,
            Self::RemoveAspect(_) => OperationKind::RemoveAspect,
        }
    }

    /// The container the operation targets, if it names one.
    #[must_use]
    pub fn container(&self) -> Option<ContainerId> {
        match self {
            Self::Write { container, .. }
            | Self::Read { container, .. }
            | Self::Take { container, .. }
            | Self::Delete { container, .. }
            | Self::Test { container, .. } => Some(*container),
            Self::DestroyContainer(c) | Self::LockContainer(c) => Some(*c),
            Self::AddAspect { container, .. } => *container,
            Self::CreateContainer(_) | Self::LookupContainer(_) | Self::RemoveAspect(_) => None,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write { container, entries } => f
                .debug_struct("Write")
                .field("container", container)
                .field("entries", &entries.len())
                .finish(),
            Self::Read {
                container,
                selectors,
            }
            | Self::Take {
                container,
                selectors,
            }
            | Self::Delete {
                container,
                selectors,
            }
            | Self::Test {
                container,
                selectors,
            } => f
                .debug_struct(match self.kind() {
                    OperationKind::Read => "Read",
                    OperationKind::Take => "Take",
                    OperationKind::Delete => "Delete",
                    _ => "Test",
                })
                .field("container", container)
                .field("selectors", selectors)
                .finish(),
            Self::CreateContainer(def) => f.debug_tuple("CreateContainer").field(def).finish(),
            Self::LookupContainer(name) => f.debug_tuple("LookupContainer").field(name).finish(),
            Self::DestroyContainer(c) => f.debug_tuple("DestroyContainer").field(c).finish(),
            Self::LockContainer(c) => f.debug_tuple("LockContainer").field(c).finish(),
            Self::AddAspect { container, .. } => f
                .debug_struct("AddAspect")
                .field("container", container)
                .finish_non_exhaustive(),
            Self::RemoveAspect(id) => f.debug_tuple("RemoveAspect").field(id).finish(),
        }
    }
}

/// What a finished operation returns.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// Entries read, taken or written.
    Entries(Vec<Arc<Entry>>),
    /// Number of entries deleted or tested.
    Count(usize),
    /// A created or looked-up container.
    Container(ContainerRef),
    /// A registered aspect.
    Aspect(AspectId),
    /// Completed without a value.
    Done,
    /// An aspect skipped the operation.
    Skipped,
}

impl OperationResult {
    /// The entries of an `Entries` result; empty otherwise.
    #[must_use]
    pub fn into_entries(self) -> Vec<Arc<Entry>> {
        match self {
            Self::Entries(entries) => entries,
            _ => Vec::new(),
        }
    }

    /// The number of entries the operation touched.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Entries(entries) => entries.len(),
            Self::Count(n) => *n,
            _ => 0,
        }
    }

    /// The container of a `Container` result.
    #[must_use]
    pub fn container(&self) -> Option<ContainerRef> {
        match self {
            Self::Container(c) => Some(*c),
            _ => None,
        }
    }

    /// The aspect id of an `Aspect` result.
    #[must_use]
    pub fn aspect(&self) -> Option<AspectId> {
        match self {
            Self::Aspect(id) => Some(*id),
            _ => None,
        }
    }
}
