//! In-memory storage backend for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::backend::StorageBackend;
use crate::batch::{BatchOp, WriteBatch};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral spaces that don't need persistence
///
/// A failure can be armed with [`InMemoryBackend::fail_next_apply`] to
/// exercise the engine's abort path.
///
/// # Example
///
/// ```rust
/// use tuplespace_storage::{InMemoryBackend, StorageBackend, WriteBatch};
///
/// let backend = InMemoryBackend::new();
/// let mut batch = WriteBatch::new();
/// batch.put(b"k".to_vec(), b"v".to_vec());
/// backend.apply(&batch).unwrap();
/// assert_eq!(backend.get(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_next: AtomicBool,
    batches: AtomicU64,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `apply` fail without changing any key.
    pub fn fail_next_apply(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of batches applied so far.
    #[must_use]
    pub fn batches_applied(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Returns a copy of all pairs in key order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

pub(crate) fn apply_ops(map: &mut BTreeMap<Vec<u8>, Vec<u8>>, batch: &WriteBatch) {
    for op in batch.ops() {
        match op {
            BatchOp::Put { key, value } => {
                map.insert(key.clone(), value.clone());
            }
            BatchOp::Delete { key } => {
                map.remove(key);
            }
        }
    }
}

pub(crate) fn scan(
    map: &BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(scan(&self.data.read(), prefix))
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Rejected("injected failure".to_string()));
        }
        apply_ops(&mut self.data.write(), batch);
        self.batches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.data.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(backend: &InMemoryBackend, key: &[u8], value: &[u8]) {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        backend.apply(&batch).unwrap();
    }

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty().unwrap());
        assert_eq!(backend.get(b"x").unwrap(), None);
    }

    #[test]
    fn memory_put_get_delete() {
        let backend = InMemoryBackend::new();
        put(&backend, b"a", b"1");
        assert_eq!(backend.get(b"a").unwrap(), Some(b"1".to_vec()));

        let mut batch = WriteBatch::new();
        batch.delete(b"a".to_vec());
        batch.delete(b"never-there".to_vec());
        backend.apply(&batch).unwrap();
        assert_eq!(backend.get(b"a").unwrap(), None);
        assert_eq!(backend.batches_applied(), 2);
    }

    #[test]
    fn memory_scan_prefix_is_ordered() {
        let backend = InMemoryBackend::new();
        put(&backend, b"e/2", b"two");
        put(&backend, b"e/1", b"one");
        put(&backend, b"f/1", b"other");
        put(&backend, b"d/9", b"before");

        let pairs = backend.scan_prefix(b"e/").unwrap();
        assert_eq!(
            pairs,
            vec![
                (b"e/1".to_vec(), b"one".to_vec()),
                (b"e/2".to_vec(), b"two".to_vec())
            ]
        );
    }

    #[test]
    fn memory_injected_failure_changes_nothing() {
        let backend = InMemoryBackend::new();
        backend.fail_next_apply();

        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v".to_vec());
        assert!(matches!(
            backend.apply(&batch),
            Err(StorageError::Rejected(_))
        ));
        assert!(backend.is_empty().unwrap());

        backend.apply(&batch).unwrap();
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn memory_later_ops_win() {
        let backend = InMemoryBackend::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        batch.delete(b"k".to_vec());
        batch.put(b"k".to_vec(), b"2".to_vec());
        backend.apply(&batch).unwrap();
        assert_eq!(backend.snapshot(), vec![(b"k".to_vec(), b"2".to_vec())]);
    }
}
