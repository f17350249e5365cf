//! # Tuplespace Core
//!
//! Transactional tuple-space engine.
//!
//! This crate provides:
//! - Containers holding entries, indexed by pluggable coordinators
//! - Transactions and sub-transactions with entry and container locks
//! - Blocking requests that wait for matching events, with timeouts
//! - Wait-for graph deadlock detection
//! - Aspects, access control and optional persistence
//!
//! ## Example
//!
//! ```rust
//! use tuplespace_core::{
//!     ContainerDefinition, CoordinatorKind, CoordinatorSpec, Count, RequestContext, Selector,
//!     Space, WriteEntry,
//! };
//!
//! let space = Space::open_in_memory().unwrap();
//! let queue = space
//!     .create_container(
//!         ContainerDefinition::named("queue")
//!             .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo)),
//!         RequestContext::new(),
//!     )
//!     .unwrap();
//! space
//!     .write(queue.id, vec![WriteEntry::new("a"), WriteEntry::new("b")], RequestContext::new())
//!     .unwrap();
//! let first = space
//!     .take(queue.id, vec![Selector::fifo(Count::Exactly(1))], RequestContext::new())
//!     .unwrap();
//! assert_eq!(first[0].value().as_text(), Some("a"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod aspects;
mod config;
mod container;
mod context;
pub mod coordination;
mod deadlock;
mod dir;
mod error;
mod isolation;
mod persistence;
mod runtime;
mod space;
mod stats;
mod types;
mod wait;

pub use access::{AccessManager, AccessRule, AuthorizationResult, Effect, RuleAccessManager};
pub use aspects::{Aspect, AspectCall, AspectManager, AspectResult};
pub use config::{Config, PersistenceConfig};
pub use container::{
    Container, ContainerDefinition, ContainerDescriptor, ContainerManager, ContainerStats,
    ContainerStatsSnapshot, Entry, StoredEntry,
};
pub use context::{IsolationLevel, RequestContext, RequestTimeout};
pub use coordination::{
    CoordinationData, CoordinationPayload, Coordinator, CoordinatorKind, CoordinatorRegistry,
    CoordinatorSpec, Count, Criteria, Selector, VectorIndex,
};
pub use deadlock::{DeadlockCycle, DeadlockDetector};
pub use dir::SpaceDir;
pub use error::{BlockReason, CoreError, CoreResult};
pub use isolation::{
    Availability, EntryAccess, LockGrant, LockHolder, LockKind, LockTable, LockTarget,
    LogCategory, LogContext, LogItem, SubTransaction, Transaction, TransactionManager,
    TransactionStatus,
};
pub use persistence::{PersistenceContext, PersistentTransaction, StoredMap, StoredSpace};
pub use runtime::{Operation, OperationKind, OperationResult, RequestHandle, WriteEntry};
pub use space::{Space, SpaceBuilder};
pub use stats::{SpaceStats, StatsSnapshot};
pub use types::{
    AspectId, ContainerId, ContainerRef, EntryId, SubTransactionId, TaskId, TransactionId,
};
pub use wait::{EventCategory, WaitManager};

pub use tuplespace_codec::{Value, ValueKind};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
