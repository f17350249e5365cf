//! Containers and their entries.
//!
//! - [`Entry`]: an immutable stored record
//! - [`Container`]: entries indexed by a set of coordinators
//! - [`ContainerManager`]: transactional create, destroy and lookup
//! - [`ContainerDescriptor`]: what is persisted to rebuild a container

mod descriptor;
mod entry;
mod manager;
mod stats;
mod store;

pub use descriptor::{ContainerDefinition, ContainerDescriptor};
pub use entry::{Entry, StoredEntry};
pub use manager::ContainerManager;
pub use stats::{ContainerStats, ContainerStatsSnapshot};
pub use store::Container;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tuplespace_codec::Value;

    use super::*;
    use crate::context::IsolationLevel;
    use crate::coordination::{
        CoordinationData, CoordinatorKind, CoordinatorRegistry, CoordinatorSpec, Count, Selector,
        VectorIndex,
    };
    use crate::error::CoreError;
    use crate::isolation::{LockTable, SubTransaction, Transaction, TransactionManager};
    use crate::stats::SpaceStats;

    const WAIT: Duration = Duration::from_secs(1);
    const RC: IsolationLevel = IsolationLevel::ReadCommitted;

    struct Env {
        txs: TransactionManager,
        locks: Arc<LockTable>,
        manager: Arc<ContainerManager>,
    }

    impl Env {
        fn new() -> Self {
            let locks = Arc::new(LockTable::new());
            Self {
                txs: TransactionManager::new(None, Arc::new(SpaceStats::new())),
                manager: Arc::new(ContainerManager::new(
                    uuid::Uuid::nil(),
                    Arc::clone(&locks),
                    CoordinatorRegistry::new(),
                )),
                locks,
            }
        }

        fn begin(&self) -> (Arc<Transaction>, Arc<SubTransaction>) {
            let tx = self.txs.begin(false).unwrap();
            let stx = tx.new_sub_transaction().unwrap();
            (tx, stx)
        }

        /// Creates and commits a container.
        fn container(&self, definition: ContainerDefinition) -> Arc<Container> {
            let (tx, stx) = self.begin();
            let c = self.manager.create(&stx, definition).unwrap();
            stx.commit().unwrap();
            tx.commit(WAIT).unwrap();
            c
        }

        /// Writes and commits integer entries.
        fn fill(&self, c: &Arc<Container>, values: &[i64], data: &[CoordinationData]) {
            let (tx, stx) = self.begin();
            for v in values {
                c.write(&stx, Value::Integer(*v), data.to_vec()).unwrap();
            }
            stx.commit().unwrap();
            tx.commit(WAIT).unwrap();
        }
    }

    fn ints(entries: &[Arc<Entry>]) -> Vec<i64> {
        entries
            .iter()
            .map(|e| e.value().as_integer().unwrap())
            .collect()
    }

    fn fifo() -> ContainerDefinition {
        ContainerDefinition::new().obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo))
    }

    #[test]
    fn committed_take_purges_and_rollback_restores() {
        let env = Env::new();
        let c = env.container(fifo());
        env.fill(&c, &[1, 2, 3], &[]);

        let (tx, stx) = env.begin();
        let taken = c.take(&stx, &[Selector::fifo(Count::Exactly(2))], RC, None).unwrap();
        assert_eq!(ints(&taken), [1, 2]);
        stx.commit().unwrap();
        tx.rollback(WAIT).unwrap();
        assert_eq!(c.len(), 3);

        let (tx, stx) = env.begin();
        c.take(&stx, &[Selector::fifo(Count::Exactly(2))], RC, None).unwrap();
        stx.commit().unwrap();
        tx.commit(WAIT).unwrap();
        assert_eq!(ints(&c.entries()), [3]);
        assert_eq!(c.stats().takes_ok, 2);
    }

    #[test]
    fn uncommitted_write_is_invisible_to_others() {
        let env = Env::new();
        let c = env.container(ContainerDefinition::new());
        let (tx, stx) = env.begin();
        c.write(&stx, Value::Integer(1), Vec::new()).unwrap();

        let (_other, other_stx) = env.begin();
        let err = c
            .read(&other_stx, &[Selector::any(Count::Exactly(1))], RC, None)
            .unwrap_err();
        assert!(matches!(err, CoreError::CountNotMet { .. }));

        stx.commit().unwrap();
        tx.rollback(WAIT).unwrap();
        assert!(c.is_empty());
        assert_eq!(env.locks.record_count(), 1);
    }

    #[test]
    fn coordination_data_is_validated() {
        let env = Env::new();
        let c = env.container(
            ContainerDefinition::new().obligatory(CoordinatorSpec::new(CoordinatorKind::Key)),
        );
        let (_tx, stx) = env.begin();
        assert!(matches!(
            c.write(&stx, Value::Integer(1), Vec::new()),
            Err(CoreError::ObligatoryCoordinatorMissing { .. })
        ));
        assert!(matches!(
            c.write(&stx, Value::Integer(1), vec![CoordinationData::label("x")]),
            Err(CoreError::CoordinatorNotRegistered { .. })
        ));
        c.write(&stx, Value::Integer(1), vec![CoordinationData::key("a")])
            .unwrap();
        let dup = c
            .write(&stx, Value::Integer(2), vec![CoordinationData::key("a")])
            .unwrap_err();
        assert!(matches!(dup, CoreError::DuplicateKey { .. }));
        assert!(dup.is_retryable());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn key_overwrite_inside_one_transaction() {
        let env = Env::new();
        let c = env.container(
            ContainerDefinition::new().obligatory(CoordinatorSpec::new(CoordinatorKind::Key)),
        );
        env.fill(&c, &[1], &[CoordinationData::key("a")]);

        let (tx, stx) = env.begin();
        c.take(&stx, &[Selector::key("a")], RC, None).unwrap();
        c.write(&stx, Value::Integer(2), vec![CoordinationData::key("a")])
            .unwrap();
        stx.commit().unwrap();
        tx.commit(WAIT).unwrap();
        assert_eq!(ints(&c.entries()), [2]);
    }

    #[test]
    fn bounded_container_reports_full() {
        let env = Env::new();
        let c = env.container(ContainerDefinition::new().size(1));
        env.fill(&c, &[1], &[]);
        let (_tx, stx) = env.begin();
        let err = c.write(&stx, Value::Integer(2), Vec::new()).unwrap_err();
        assert!(matches!(err, CoreError::ContainerFull { size: 1, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn repeatable_read_blocks_foreign_take() {
        let env = Env::new();
        let c = env.container(ContainerDefinition::new());
        env.fill(&c, &[1], &[]);

        let (reader, rstx) = env.begin();
        c.read(
            &rstx,
            &[Selector::any(Count::Exactly(1))],
            IsolationLevel::RepeatableRead,
            None,
        )
        .unwrap();
        rstx.commit().unwrap();

        let (_taker, tstx) = env.begin();
        let err = c
            .take(&tstx, &[Selector::any(Count::Exactly(1))], RC, None)
            .unwrap_err();
        assert!(matches!(err, CoreError::EntryLocked { holder } if holder.tx == reader.id()));
        tstx.rollback().unwrap();

        reader.commit(WAIT).unwrap();
        let (_taker, tstx) = env.begin();
        c.take(&tstx, &[Selector::any(Count::Exactly(1))], RC, None)
            .unwrap();
    }

    #[test]
    fn vector_writes_serialize_on_the_coordinator_lock() {
        let env = Env::new();
        let c = env.container(
            ContainerDefinition::new().obligatory(CoordinatorSpec::new(CoordinatorKind::Vector)),
        );
        let append = [CoordinationData::vector(VectorIndex::Append)];
        let (tx, stx) = env.begin();
        c.write(&stx, Value::Integer(1), append.to_vec()).unwrap();

        let (_other, other_stx) = env.begin();
        let err = c
            .write(&other_stx, Value::Integer(2), append.to_vec())
            .unwrap_err();
        assert!(matches!(err, CoreError::CoordinatorLocked { .. }));
        other_stx.rollback().unwrap();

        stx.commit().unwrap();
        let (_third, third_stx) = env.begin();
        c.write(&third_stx, Value::Integer(3), append.to_vec())
            .unwrap();
        third_stx.commit().unwrap();
        tx.commit(WAIT).unwrap();
    }

    #[test]
    fn names_are_unique_and_lookup_follows_visibility() {
        let env = Env::new();
        let (tx, stx) = env.begin();
        let c = env
            .manager
            .create(&stx, ContainerDefinition::named("seats"))
            .unwrap();
        assert!(matches!(
            env.manager.create(&stx, ContainerDefinition::named("seats")),
            Err(CoreError::ContainerNameNotAvailable { .. })
        ));
        let (_other, other_stx) = env.begin();
        assert!(env.manager.lookup(&other_stx, "seats").is_err());
        assert_eq!(env.manager.lookup(&stx, "seats").unwrap().id(), c.id());

        stx.commit().unwrap();
        tx.commit(WAIT).unwrap();
        assert_eq!(env.manager.lookup(&other_stx, "seats").unwrap().id(), c.id());
    }

    #[test]
    fn duplicate_coordinator_names_are_rejected() {
        let env = Env::new();
        let (_tx, stx) = env.begin();
        let def = ContainerDefinition::new()
            .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo))
            .optional(CoordinatorSpec::new(CoordinatorKind::Lifo).named("fifo"));
        assert!(matches!(
            env.manager.create(&stx, def),
            Err(CoreError::DuplicateCoordinator { .. })
        ));
    }

    #[test]
    fn destroy_takes_effect_at_commit() {
        let env = Env::new();
        let c = env.container(ContainerDefinition::named("gone"));
        env.fill(&c, &[1, 2], &[]);

        let (tx, stx) = env.begin();
        env.manager.destroy(&stx, c.id()).unwrap();
        stx.commit().unwrap();
        let (_other, other_stx) = env.begin();
        assert!(matches!(
            c.write(&other_stx, Value::Integer(3), Vec::new()),
            Err(CoreError::ContainerLocked { .. })
        ));
        tx.rollback(WAIT).unwrap();
        assert!(env.manager.get(c.id()).is_ok());

        let (tx, stx) = env.begin();
        env.manager.destroy(&stx, c.id()).unwrap();
        stx.commit().unwrap();
        tx.commit(WAIT).unwrap();
        assert!(env.manager.get(c.id()).is_err());
        assert_eq!(env.locks.record_count(), 0);
    }

    #[test]
    fn container_lock_excludes_other_transactions() {
        let env = Env::new();
        let c = env.container(ContainerDefinition::new());
        let (tx, stx) = env.begin();
        c.lock(&stx).unwrap();
        stx.commit().unwrap();

        let (_other, other_stx) = env.begin();
        assert!(matches!(
            c.write(&other_stx, Value::Integer(1), Vec::new()),
            Err(CoreError::ContainerLocked { holder }) if holder.tx == tx.id()
        ));
        tx.commit(WAIT).unwrap();
        c.write(&other_stx, Value::Integer(1), Vec::new()).unwrap();
    }

    #[test]
    fn restore_registers_without_locks() {
        let env = Env::new();
        let descriptor = ContainerDefinition::named("r")
            .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo))
            .into_descriptor(crate::types::ContainerId::new(7));
        let c = env.manager.restore(descriptor).unwrap();
        for id in [4, 9] {
            c.restore_entry(Entry::new(
                crate::types::EntryId::new(id),
                c.id(),
                Value::Integer(id as i64),
                Vec::new(),
            ))
            .unwrap();
        }
        let (_tx, stx) = env.begin();
        let got = c
            .read(&stx, &[Selector::fifo(Count::All)], RC, None)
            .unwrap();
        assert_eq!(ints(&got), [4, 9]);
        let fresh = c.write(&stx, Value::Integer(0), Vec::new()).unwrap();
        assert_eq!(fresh.id().as_u64(), 10);
        let next = env
            .manager
            .create(&stx, ContainerDefinition::new())
            .unwrap();
        assert_eq!(next.id().as_u64(), 8);
    }
}
