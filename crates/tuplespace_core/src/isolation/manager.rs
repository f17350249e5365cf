//! Transaction registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::isolation::transaction::{Transaction, TransactionStatus};
use crate::persistence::PersistenceContext;
use crate::stats::SpaceStats;
use crate::types::TransactionId;

/// Creates transactions and resolves transaction ids.
///
/// Finished transactions are forgotten: looking one up afterwards fails
/// with an invalid-transaction error.
pub struct TransactionManager {
    next_tx: AtomicU64,
    next_stx: Arc<AtomicU64>,
    active: RwLock<HashMap<TransactionId, Arc<Transaction>>>,
    persistence: Option<Arc<PersistenceContext>>,
    stats: Arc<SpaceStats>,
}

impl TransactionManager {
    /// Creates a manager. With a persistence context, every transaction
    /// carries a backend transaction in its own log.
    pub fn new(persistence: Option<Arc<PersistenceContext>>, stats: Arc<SpaceStats>) -> Self {
        Self {
            next_tx: AtomicU64::new(1),
            next_stx: Arc::new(AtomicU64::new(1)),
            active: RwLock::new(HashMap::new()),
            persistence,
            stats,
        }
    }

    /// Starts a transaction in the running state.
    ///
    /// # Errors
    ///
    /// Fails only if the backend transaction cannot be registered.
    pub fn begin(&self, implicit: bool) -> CoreResult<Arc<Transaction>> {
        let id = TransactionId::new(self.next_tx.fetch_add(1, Ordering::SeqCst));
        let persistent = self
            .persistence
            .as_ref()
            .map(|p| Arc::new(p.begin(id)));
        let tx = Arc::new(Transaction::new(
            id,
            implicit,
            persistent.clone(),
            Arc::clone(&self.next_stx),
        ));
        if let Some(p) = persistent {
            tx.add_log(PersistenceContext::log_item(p))?;
        }
        self.active.write().insert(id, Arc::clone(&tx));
        self.stats.record_transaction_start();
        debug!(tx = %id, implicit, "transaction started");
        Ok(tx)
    }

    /// Resolves a running transaction.
    ///
    /// # Errors
    ///
    /// Fails with an invalid-transaction error if the id is unknown or
    /// the transaction already finished.
    pub fn get(&self, id: TransactionId) -> CoreResult<Arc<Transaction>> {
        let tx = self
            .active
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::invalid_transaction(format!("{id} is unknown")))?;
        if !tx.is_active() {
            return Err(CoreError::invalid_transaction(format!(
                "{id} is not running"
            )));
        }
        Ok(tx)
    }

    /// Forgets a finished transaction and records its outcome.
    pub fn finished(&self, tx: &Transaction) {
        if self.active.write().remove(&tx.id()).is_some() {
            match tx.status() {
                TransactionStatus::Committed => {
                    self.stats.record_transaction_commit();
                }
                TransactionStatus::Aborted => {
                    self.stats.record_transaction_abort();
                }
                _ => {}
            }
        }
    }

    /// Number of transactions not yet finished.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_count())
            .field("persistent", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager() -> TransactionManager {
        TransactionManager::new(None, Arc::new(SpaceStats::new()))
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let tm = manager();
        let a = tm.begin(false).unwrap();
        let b = tm.begin(true).unwrap();
        assert!(b.id() > a.id());
        assert!(b.is_implicit());
        assert_eq!(tm.active_count(), 2);
    }

    #[test]
    fn finished_transactions_are_forgotten() {
        let stats = Arc::new(SpaceStats::new());
        let tm = TransactionManager::new(None, Arc::clone(&stats));
        let tx = tm.begin(false).unwrap();
        assert!(tm.get(tx.id()).is_ok());

        tx.commit(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            tm.get(tx.id()),
            Err(CoreError::InvalidTransaction { .. })
        ));
        tm.finished(&tx);
        assert_eq!(tm.active_count(), 0);
        assert_eq!(stats.snapshot().transactions_committed, 1);

        assert!(tm.get(TransactionId::new(99)).is_err());
    }

    #[test]
    fn sub_transaction_ids_are_global() {
        let tm = manager();
        let a = tm.begin(false).unwrap().new_sub_transaction().unwrap();
        let b = tm.begin(false).unwrap().new_sub_transaction().unwrap();
        assert_ne!(a.id(), b.id());
    }
}
