//! Storage backend trait definition.

use crate::batch::WriteBatch;
use crate::error::StorageResult;

/// An ordered key-value store used to durably back containers.
///
/// Backends know nothing about containers or entries. Keys are opaque
/// byte strings ordered bytewise; the engine chooses key prefixes.
///
/// # Invariants
///
/// - `apply` is atomic: after a crash either every op of a batch is
///   visible or none is
/// - `scan_prefix` returns pairs in ascending key order
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns every pair whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be made durable. On error no
    /// op of the batch is visible.
    fn apply(&self, batch: &WriteBatch) -> StorageResult<()>;

    /// Forces previously applied batches to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;

    /// Number of live keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed.
    fn len(&self) -> StorageResult<usize>;

    /// Returns true if no key is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
