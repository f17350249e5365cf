//! Request execution.
//!
//! - [`Operation`]: what a request asks for
//! - [`RequestHandle`]: the caller's side of a submitted request
//! - the engine: runs tasks on a worker pool, one sub-transaction per
//!   attempt, and parks them in the wait manager when they block

mod engine;
mod operation;
mod pool;
mod task;

pub(crate) use engine::Engine;
pub use operation::{Operation, OperationKind, OperationResult, WriteEntry};
pub(crate) use task::Task;
pub use task::RequestHandle;
