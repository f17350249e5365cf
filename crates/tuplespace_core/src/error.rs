//! Error types for the tuplespace core.

use std::io;
use thiserror::Error;

use crate::isolation::LockHolder;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in tuplespace core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tuplespace_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] tuplespace_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transaction is unknown or no longer running.
    #[error("invalid transaction: {message}")]
    InvalidTransaction {
        /// Why the transaction cannot be used.
        message: String,
    },

    /// The sub-transaction is no longer running.
    #[error("invalid sub-transaction: {message}")]
    InvalidSubTransaction {
        /// Why the sub-transaction cannot be used.
        message: String,
    },

    /// A selector could not be satisfied by the available entries.
    #[error("count not met at coordinator {coordinator}: requested {requested}, found {found}")]
    CountNotMet {
        /// Name of the coordinator whose selector failed.
        coordinator: String,
        /// Number of entries requested.
        requested: usize,
        /// Number of entries available.
        found: usize,
    },

    /// An entry is locked by another transaction.
    #[error("entry locked by {holder}")]
    EntryLocked {
        /// The holder of the conflicting lock.
        holder: LockHolder,
    },

    /// A container is locked by another transaction.
    #[error("container locked by {holder}")]
    ContainerLocked {
        /// The holder of the conflicting lock.
        holder: LockHolder,
    },

    /// A coordinator structure is locked by another transaction.
    #[error("coordinator {coordinator} locked by {holder}")]
    CoordinatorLocked {
        /// Name of the locked coordinator.
        coordinator: String,
        /// The holder of the coordinator lock.
        holder: LockHolder,
    },

    /// The container reached its size limit.
    #[error("container {container} is full (size {size})")]
    ContainerFull {
        /// Container description.
        container: String,
        /// Configured size limit.
        size: usize,
    },

    /// A blocked request ran past its deadline.
    #[error("request timed out: {message}")]
    Timeout {
        /// The condition the request was waiting on.
        message: String,
    },

    /// A selector or coordination data names an unknown coordinator.
    #[error("coordinator not registered: {name}")]
    CoordinatorNotRegistered {
        /// The unknown coordinator name.
        name: String,
    },

    /// Two coordinators of a container share a name.
    #[error("duplicate coordinator: {name}")]
    DuplicateCoordinator {
        /// The duplicated name.
        name: String,
    },

    /// A write is missing data for an obligatory explicit coordinator.
    #[error("obligatory coordinator missing: {name}")]
    ObligatoryCoordinatorMissing {
        /// Name of the coordinator without data.
        name: String,
    },

    /// No visible container matches.
    #[error("container not found: {container}")]
    ContainerNotFound {
        /// Container name or id.
        container: String,
    },

    /// The requested container name is taken.
    #[error("container name not available: {name}")]
    ContainerNameNotAvailable {
        /// The conflicting name.
        name: String,
    },

    /// The container was destroyed or is malformed.
    #[error("invalid container: {message}")]
    InvalidContainer {
        /// Description of the problem.
        message: String,
    },

    /// A unique key is already in use.
    #[error("duplicate key: {key}")]
    DuplicateKey {
        /// The conflicting key.
        key: String,
    },

    /// The entry value does not fit a coordinator.
    #[error("invalid entry type: {message}")]
    InvalidEntryType {
        /// Description of the mismatch.
        message: String,
    },

    /// A selector is malformed or unsupported by its coordinator.
    #[error("invalid selector: {message}")]
    InvalidSelector {
        /// Description of the problem.
        message: String,
    },

    /// Authorization denied the operation.
    #[error("access denied: {message}")]
    AccessDenied {
        /// What was denied.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Another process holds the space directory.
    #[error("space directory locked: another process has exclusive access")]
    DirectoryLocked,

    /// Internal consistency violation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

/// Why a request may be retried later instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Blocked by a lock; the holder is known.
    Locked(LockHolder),
    /// Blocked until the container contents change.
    Delayable,
}

impl CoreError {
    /// Creates an invalid transaction error.
    pub fn invalid_transaction(message: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            message: message.into(),
        }
    }

    /// Creates an invalid sub-transaction error.
    pub fn invalid_sub_transaction(message: impl Into<String>) -> Self {
        Self::InvalidSubTransaction {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a container not found error.
    pub fn container_not_found(container: impl Into<String>) -> Self {
        Self::ContainerNotFound {
            container: container.into(),
        }
    }

    /// Creates an invalid container error.
    pub fn invalid_container(message: impl Into<String>) -> Self {
        Self::InvalidContainer {
            message: message.into(),
        }
    }

    /// Creates a coordinator not registered error.
    pub fn coordinator_not_registered(name: impl Into<String>) -> Self {
        Self::CoordinatorNotRegistered { name: name.into() }
    }

    /// Creates an invalid entry type error.
    pub fn invalid_entry_type(message: impl Into<String>) -> Self {
        Self::InvalidEntryType {
            message: message.into(),
        }
    }

    /// Creates an invalid selector error.
    pub fn invalid_selector(message: impl Into<String>) -> Self {
        Self::InvalidSelector {
            message: message.into(),
        }
    }

    /// Creates an access denied error.
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classifies errors that a blocked request may wait out.
    ///
    /// Lock conflicts yield [`BlockReason::Locked`]; a count shortfall,
    /// a full container and a duplicate key yield
    /// [`BlockReason::Delayable`]. Everything else is final.
    #[must_use]
    pub fn block_reason(&self) -> Option<BlockReason> {
        match self {
            Self::EntryLocked { holder }
            | Self::ContainerLocked { holder }
            | Self::CoordinatorLocked { holder, .. } => Some(BlockReason::Locked(*holder)),
            Self::CountNotMet { .. } | Self::ContainerFull { .. } | Self::DuplicateKey { .. } => {
                Some(BlockReason::Delayable)
            }
            _ => None,
        }
    }

    /// Returns true if waiting may let the request succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.block_reason().is_some()
    }
}
