//! # Tuplespace Storage
//!
//! Persistence backends for the tuplespace engine.
//!
//! Backends are ordered key-value stores that apply [`WriteBatch`]es
//! atomically. They do not interpret keys or values; the engine decides
//! the key layout for containers and entries.
//!
//! ## Design Principles
//!
//! - One batch per committed transaction, applied all-or-nothing
//! - Bytewise key order, so prefixes group related keys
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral spaces
//! - [`FileBackend`] - Checksummed append log, replayed on open
//!
//! ## Example
//!
//! ```rust
//! use tuplespace_storage::{InMemoryBackend, StorageBackend, WriteBatch};
//!
//! let backend = InMemoryBackend::new();
//! let mut batch = WriteBatch::new();
//! batch.put(b"e/1".to_vec(), b"hello".to_vec());
//! backend.apply(&batch).unwrap();
//! assert_eq!(backend.scan_prefix(b"e/").unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use batch::{BatchOp, WriteBatch, FRAME_MAGIC, FRAME_OVERHEAD};
pub use error::{StorageError, StorageResult};
pub use file::{CompactStats, FileBackend, ReplayReport};
pub use memory::InMemoryBackend;
