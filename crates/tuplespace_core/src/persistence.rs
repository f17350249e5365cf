//! Persistence glue between transactions and a [`StorageBackend`].
//!
//! Each transaction gets a [`PersistentTransaction`] that stages puts and
//! deletes while its sub-transactions commit. The stage is applied as one
//! [`WriteBatch`] from the transaction's own log during the prepare pass,
//! so a backend failure aborts the in-memory transaction as well.
//!
//! Key layout:
//!
//! | Key | Value |
//! |---|---|
//! | `meta/space_id` | space uuid, 16 bytes |
//! | `c/{container:016x}` | encoded [`ContainerDescriptor`] |
//! | `e/{container:016x}/{entry:016x}` | encoded [`StoredEntry`] |

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tuplespace_codec::{decode_from_slice, encode_to_vec};
use tuplespace_storage::{StorageBackend, WriteBatch};

use crate::container::{ContainerDescriptor, Entry, StoredEntry};
use crate::error::{CoreError, CoreResult};
use crate::isolation::{LogContext, LogItem};
use crate::types::{ContainerId, EntryId, TransactionId};

const SPACE_ID_KEY: &[u8] = b"meta/space_id";
const CONTAINER_PREFIX: &[u8] = b"c/";
const ENTRY_PREFIX: &[u8] = b"e/";

fn container_key(container: ContainerId) -> Vec<u8> {
    format!("c/{:016x}", container.as_u64()).into_bytes()
}

fn entry_prefix(container: ContainerId) -> Vec<u8> {
    format!("e/{:016x}/", container.as_u64()).into_bytes()
}

fn entry_key(container: ContainerId, entry: EntryId) -> Vec<u8> {
    format!("e/{:016x}/{:016x}", container.as_u64(), entry.as_u64()).into_bytes()
}

fn parse_hex(bytes: &[u8]) -> Option<u64> {
    if bytes.len() != 16 {
        return None;
    }
    u64::from_str_radix(std::str::from_utf8(bytes).ok()?, 16).ok()
}

fn parse_entry_key(key: &[u8]) -> Option<(ContainerId, EntryId)> {
    let rest = key.strip_prefix(ENTRY_PREFIX)?;
    if rest.len() != 33 || rest[16] != b'/' {
        return None;
    }
    Some((
        ContainerId::new(parse_hex(&rest[..16])?),
        EntryId::new(parse_hex(&rest[17..])?),
    ))
}

/// Contents of a backend, decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSpace {
    /// Container descriptors in id order.
    pub containers: Vec<ContainerDescriptor>,
    /// Entries in id order.
    pub entries: Vec<(ContainerId, EntryId, StoredEntry)>,
    /// Entries whose container descriptor is missing.
    pub orphans: usize,
}

/// Hands out backend transactions and restores persisted state.
pub struct PersistenceContext {
    backend: Arc<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl PersistenceContext {
    /// Wraps a backend.
    pub fn new(backend: Arc<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// The wrapped backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Starts the backend side of transaction `tx`.
    #[must_use]
    pub fn begin(&self, tx: TransactionId) -> PersistentTransaction {
        PersistentTransaction {
            tx,
            backend: Arc::clone(&self.backend),
            sync_on_commit: self.sync_on_commit,
            staged: Mutex::new(BTreeMap::new()),
        }
    }

    /// The log item that commits or discards `txn` together with its
    /// in-memory transaction.
    #[must_use]
    pub fn log_item(txn: Arc<PersistentTransaction>) -> Box<dyn LogItem> {
        Box::new(PersistenceLogItem { txn })
    }

    /// Returns the stored space id without assigning one.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails or the stored id is malformed.
    pub fn stored_space_id(&self) -> CoreResult<Option<uuid::Uuid>> {
        self.backend
            .get(SPACE_ID_KEY)?
            .map(|bytes| {
                uuid::Uuid::from_slice(&bytes)
                    .map_err(|e| CoreError::internal(format!("stored space id: {e}")))
            })
            .transpose()
    }

    /// Returns the stored space id, storing a fresh one on first use.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails or the stored id is malformed.
    pub fn space_id(&self) -> CoreResult<uuid::Uuid> {
        if let Some(id) = self.stored_space_id()? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4();
        let mut batch = WriteBatch::new();
        batch.put(SPACE_ID_KEY.to_vec(), id.as_bytes().to_vec());
        self.backend.apply(&batch)?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        info!(space = %id, "space id assigned");
        Ok(id)
    }

    /// Decodes every stored container and entry.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails or a record does not decode.
    pub fn load(&self) -> CoreResult<StoredSpace> {
        let mut space = StoredSpace::default();
        for (_, value) in self.backend.scan_prefix(CONTAINER_PREFIX)? {
            space
                .containers
                .push(decode_from_slice::<ContainerDescriptor>(&value)?);
        }
        space.containers.sort_by_key(|d| d.id);

        for (key, value) in self.backend.scan_prefix(ENTRY_PREFIX)? {
            let Some((container, entry)) = parse_entry_key(&key) else {
                return Err(CoreError::internal(format!(
                    "malformed entry key {}",
                    String::from_utf8_lossy(&key)
                )));
            };
            if space
                .containers
                .binary_search_by_key(&container, |d| d.id)
                .is_err()
            {
                warn!(%container, %entry, "stored entry without container skipped");
                space.orphans += 1;
                continue;
            }
            space
                .entries
                .push((container, entry, decode_from_slice::<StoredEntry>(&value)?));
        }
        space.entries.sort_by_key(|(_, id, _)| *id);
        debug!(
            containers = space.containers.len(),
            entries = space.entries.len(),
            "persisted space loaded"
        );
        Ok(space)
    }
}

impl fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

/// Staged backend changes of one transaction.
///
/// Reads go through the stage, so a transaction sees its own pending
/// puts and deletes.
pub struct PersistentTransaction {
    tx: TransactionId,
    backend: Arc<dyn StorageBackend>,
    sync_on_commit: bool,
    staged: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl PersistentTransaction {
    /// The owning transaction.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.tx
    }

    /// Stages a written entry.
    ///
    /// # Errors
    ///
    /// Fails if the entry cannot be encoded.
    pub fn put_entry(&self, entry: &Entry) -> CoreResult<()> {
        let bytes = encode_to_vec(&StoredEntry::from(entry))?;
        self.stage(entry_key(entry.container(), entry.id()), Some(bytes));
        Ok(())
    }

    /// Stages the removal of an entry.
    pub fn delete_entry(&self, container: ContainerId, entry: EntryId) {
        self.stage(entry_key(container, entry), None);
    }

    /// Stages a created container.
    ///
    /// # Errors
    ///
    /// Fails if the descriptor cannot be encoded.
    pub fn put_container(&self, descriptor: &ContainerDescriptor) -> CoreResult<()> {
        let bytes = encode_to_vec(descriptor)?;
        self.stage(container_key(descriptor.id), Some(bytes));
        Ok(())
    }

    /// Stages the removal of a container and all its entries.
    ///
    /// # Errors
    ///
    /// Fails if the stored entries cannot be listed.
    pub fn delete_container(&self, container: ContainerId) -> CoreResult<()> {
        let entries = self.map(entry_prefix(container));
        for (key, _) in entries.iter()? {
            entries.delete(&key);
        }
        self.stage(container_key(container), None);
        Ok(())
    }

    /// Reads a key through the stage.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.lock().get(key) {
            return Ok(staged.clone());
        }
        Ok(self.backend.get(key)?)
    }

    /// A view of the keys under `prefix`.
    #[must_use]
    pub fn map(&self, prefix: impl Into<Vec<u8>>) -> StoredMap<'_> {
        StoredMap {
            txn: self,
            prefix: prefix.into(),
        }
    }

    /// Number of staged keys.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.lock().len()
    }

    fn stage(&self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.staged.lock().insert(key, value);
    }

    fn commit(&self) -> CoreResult<()> {
        let staged = std::mem::take(&mut *self.staged.lock());
        if staged.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for (key, value) in staged {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        self.backend.apply(&batch)?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        debug!(tx = %self.tx, ops = batch.len(), "backend batch applied");
        Ok(())
    }

    fn discard(&self) {
        let dropped = std::mem::take(&mut *self.staged.lock()).len();
        if dropped > 0 {
            debug!(tx = %self.tx, dropped, "backend stage discarded");
        }
    }
}

impl fmt::Debug for PersistentTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentTransaction")
            .field("tx", &self.tx)
            .field("staged", &self.staged_len())
            .finish_non_exhaustive()
    }
}

/// An ordered, prefix-scoped map over a transaction's view of the
/// backend.
///
/// Keys passed to and returned from the map are relative to the prefix.
#[derive(Debug)]
pub struct StoredMap<'a> {
    txn: &'a PersistentTransaction,
    prefix: Vec<u8>,
}

impl StoredMap<'_> {
    fn full(&self, key: &[u8]) -> Vec<u8> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        full
    }

    /// Reads a key.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.txn.get(&self.full(key))
    }

    /// Stages a put.
    pub fn put(&self, key: &[u8], value: impl Into<Vec<u8>>) {
        self.txn.stage(self.full(key), Some(value.into()));
    }

    /// Stages a delete.
    pub fn delete(&self, key: &[u8]) {
        self.txn.stage(self.full(key), None);
    }

    /// All pairs in key order, stored and staged merged.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub fn iter(&self) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.txn.backend.scan_prefix(&self.prefix)?.into_iter().collect();
        {
            let staged = self.txn.staged.lock();
            let pending = staged
                .range(self.prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&self.prefix));
            for (key, value) in pending {
                match value {
                    Some(v) => merged.insert(key.clone(), v.clone()),
                    None => merged.remove(key),
                };
            }
        }
        let strip = self.prefix.len();
        Ok(merged
            .into_iter()
            .map(|(k, v)| (k[strip..].to_vec(), v))
            .collect())
    }
}

#[derive(Debug)]
struct PersistenceLogItem {
    txn: Arc<PersistentTransaction>,
}

impl LogItem for PersistenceLogItem {
    fn prepare_commit(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.txn.commit()
    }

    fn rollback_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.txn.discard();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CoordinationData, CoordinatorKind, CoordinatorSpec};
    use crate::isolation::TransactionManager;
    use crate::stats::SpaceStats;
    use crate::ContainerDefinition;
    use std::time::Duration;
    use tuplespace_codec::Value;
    use tuplespace_storage::InMemoryBackend;

    fn context() -> (Arc<InMemoryBackend>, Arc<PersistenceContext>) {
        let backend = Arc::new(InMemoryBackend::new());
        let ctx = PersistenceContext::new(Arc::clone(&backend) as Arc<dyn StorageBackend>, true);
        (backend, Arc::new(ctx))
    }

    fn descriptor(id: u64) -> ContainerDescriptor {
        ContainerDefinition::named(format!("c{id}"))
            .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo))
            .into_descriptor(ContainerId::new(id))
    }

    fn entry(container: u64, id: u64, text: &str) -> Entry {
        Entry::new(
            EntryId::new(id),
            ContainerId::new(container),
            Value::Text(text.into()),
            vec![CoordinationData::key(text)],
        )
    }

    #[test]
    fn entry_keys_parse_back() {
        let key = entry_key(ContainerId::new(3), EntryId::new(0x1f));
        assert_eq!(
            parse_entry_key(&key),
            Some((ContainerId::new(3), EntryId::new(0x1f)))
        );
        assert_eq!(parse_entry_key(b"e/xyz"), None);
        assert_eq!(parse_entry_key(&container_key(ContainerId::new(3))), None);
    }

    #[test]
    fn stage_is_visible_before_commit_only_to_its_transaction() {
        let (backend, ctx) = context();
        let txn = ctx.begin(TransactionId::new(1));
        txn.put_entry(&entry(1, 1, "a")).unwrap();

        let key = entry_key(ContainerId::new(1), EntryId::new(1));
        assert!(txn.get(&key).unwrap().is_some());
        assert!(backend.get(&key).unwrap().is_none());

        txn.commit().unwrap();
        assert!(backend.get(&key).unwrap().is_some());
        assert_eq!(txn.staged_len(), 0);
    }

    #[test]
    fn stored_map_merges_stage_over_backend() {
        let (_backend, ctx) = context();
        let first = ctx.begin(TransactionId::new(1));
        let map = first.map(b"x/".to_vec());
        map.put(b"a", b"1".to_vec());
        map.put(b"b", b"2".to_vec());
        first.commit().unwrap();

        let second = ctx.begin(TransactionId::new(2));
        let map = second.map(b"x/".to_vec());
        map.delete(b"a");
        map.put(b"c", b"3".to_vec());
        let keys: Vec<_> = map.iter().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(map.get(b"a").unwrap(), None);
        assert_eq!(map.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_container_removes_its_entries() {
        let (_backend, ctx) = context();
        let txn = ctx.begin(TransactionId::new(1));
        txn.put_container(&descriptor(1)).unwrap();
        txn.put_container(&descriptor(2)).unwrap();
        txn.put_entry(&entry(1, 1, "a")).unwrap();
        txn.put_entry(&entry(2, 2, "b")).unwrap();
        txn.commit().unwrap();

        let txn = ctx.begin(TransactionId::new(2));
        txn.put_entry(&entry(1, 3, "c")).unwrap();
        txn.delete_container(ContainerId::new(1)).unwrap();
        txn.commit().unwrap();

        let loaded = ctx.load().unwrap();
        assert_eq!(loaded.containers, [descriptor(2)]);
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].1, EntryId::new(2));
    }

    #[test]
    fn load_orders_entries_by_id_and_skips_orphans() {
        let (_backend, ctx) = context();
        let txn = ctx.begin(TransactionId::new(1));
        txn.put_container(&descriptor(2)).unwrap();
        txn.put_container(&descriptor(1)).unwrap();
        txn.put_entry(&entry(2, 5, "late")).unwrap();
        txn.put_entry(&entry(1, 4, "early")).unwrap();
        txn.put_entry(&entry(9, 6, "orphan")).unwrap();
        txn.commit().unwrap();

        let loaded = ctx.load().unwrap();
        let ids: Vec<_> = loaded.containers.iter().map(|d| d.id.as_u64()).collect();
        assert_eq!(ids, [1, 2]);
        let entries: Vec<_> = loaded.entries.iter().map(|(_, e, _)| e.as_u64()).collect();
        assert_eq!(entries, [4, 5]);
        assert_eq!(loaded.orphans, 1);
        assert_eq!(
            loaded.entries[0].2.coordination_data,
            [CoordinationData::key("early")]
        );
    }

    #[test]
    fn space_id_is_stable() {
        let (backend, ctx) = context();
        assert_eq!(ctx.stored_space_id().unwrap(), None);
        let id = ctx.space_id().unwrap();
        assert_eq!(ctx.space_id().unwrap(), id);
        assert_eq!(ctx.stored_space_id().unwrap(), Some(id));
        assert_eq!(backend.batches_applied(), 1);
    }

    #[test]
    fn failed_batch_aborts_the_transaction() {
        let (backend, ctx) = context();
        let txs = TransactionManager::new(Some(Arc::clone(&ctx)), Arc::new(SpaceStats::new()));
        let tx = txs.begin(false).unwrap();
        tx.persistent()
            .unwrap()
            .put_container(&descriptor(1))
            .unwrap();

        backend.fail_next_apply();
        let err = tx.commit(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
        assert!(!tx.is_active());
        assert!(ctx.load().unwrap().containers.is_empty());
        assert_eq!(tx.persistent().unwrap().staged_len(), 0);
    }

    #[test]
    fn rollback_discards_the_stage() {
        let (backend, ctx) = context();
        let txs = TransactionManager::new(Some(Arc::clone(&ctx)), Arc::new(SpaceStats::new()));
        let tx = txs.begin(false).unwrap();
        tx.persistent().unwrap().put_entry(&entry(1, 1, "a")).unwrap();
        tx.rollback(Duration::from_secs(1)).unwrap();
        assert_eq!(backend.batches_applied(), 0);
    }
}
