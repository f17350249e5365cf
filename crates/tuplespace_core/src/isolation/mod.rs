//! Isolation: locks, transaction logs, transactions.
//!
//! - [`LockTable`]: per-entry and per-container lock records plus
//!   coordinator structure locks
//! - [`LogItem`]: replayable steps recorded by operations
//! - [`Transaction`] / [`SubTransaction`]: nested units of atomicity
//! - [`TransactionManager`]: id allocation and lookup

mod lock;
mod log;
mod manager;
mod transaction;

pub use lock::{Availability, EntryAccess, LockGrant, LockHolder, LockKind, LockTable, LockTarget};
pub use log::{LogCategory, LogContext, LogItem};
pub(crate) use log::{
    ContainerCreateLogItem, ContainerDestroyLogItem, ContainerLockLogItem, CoordinatorLockLogItem,
    ReadLogItem, TakeLogItem, WriteLogItem,
};
pub use manager::TransactionManager;
pub use transaction::{SubTransaction, Transaction, TransactionStatus};
