//! FIFO and LIFO coordinators.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::container::Entry;
use crate::coordination::selection::{check_total, narrow};
use crate::coordination::{
    unsupported, CoordinationPayload, Coordinator, CoordinatorKind, Count, Criteria,
    RegisterContext, SelectionContext, Selector,
};
use crate::error::CoreResult;
use crate::types::EntryId;

/// Order a queue coordinator was declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueOrder {
    /// Oldest first.
    Fifo,
    /// Newest first.
    Lifo,
}

#[derive(Debug, Default)]
struct QueueState {
    by_position: BTreeMap<u64, Arc<Entry>>,
    positions: HashMap<EntryId, u64>,
    counter: u64,
}

/// Keeps entries in write order.
///
/// Both [`Criteria::Fifo`] and [`Criteria::Lifo`] selectors are answered;
/// the declared [`QueueOrder`] only decides the coordinator's kind. A
/// first selector stops at the first locked entry so that queue order is
/// never skipped over.
#[derive(Debug)]
pub struct QueueCoordinator {
    name: String,
    order: QueueOrder,
    state: RwLock<QueueState>,
}

impl QueueCoordinator {
    /// Creates an empty queue.
    pub fn new(name: impl Into<String>, order: QueueOrder) -> Self {
        Self {
            name: name.into(),
            order,
            state: RwLock::new(QueueState::default()),
        }
    }

    /// Declared order.
    #[must_use]
    pub fn order(&self) -> QueueOrder {
        self.order
    }
}

impl Coordinator for QueueCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        match self.order {
            QueueOrder::Fifo => CoordinatorKind::Fifo,
            QueueOrder::Lifo => CoordinatorKind::Lifo,
        }
    }

    fn register(
        &self,
        entry: &Arc<Entry>,
        _payload: &CoordinationPayload,
        _ctx: &RegisterContext<'_>,
    ) -> CoreResult<()> {
        let mut state = self.state.write();
        state.counter += 1;
        let position = state.counter;
        state.by_position.insert(position, Arc::clone(entry));
        state.positions.insert(entry.id(), position);
        Ok(())
    }

    fn unregister(&self, entry: EntryId) -> bool {
        let mut state = self.state.write();
        match state.positions.remove(&entry) {
            Some(position) => {
                state.by_position.remove(&position);
                true
            }
            None => false,
        }
    }

    fn contains(&self, entry: EntryId) -> bool {
        self.state.read().positions.contains_key(&entry)
    }

    fn len(&self) -> usize {
        self.state.read().positions.len()
    }

    fn select(
        &self,
        selector: &Selector,
        input: Option<Vec<Arc<Entry>>>,
        ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        let newest_first = match selector.criteria {
            Criteria::Fifo => false,
            Criteria::Lifo => true,
            _ => return Err(unsupported(&self.name, selector)),
        };
        let state = self.state.read();
        check_total(&self.name, state.positions.len(), selector.count)?;
        match input {
            None => {
                let mut candidates: Vec<_> = state.by_position.values().cloned().collect();
                drop(state);
                if newest_first {
                    candidates.reverse();
                }
                ctx.scan(
                    &self.name,
                    candidates,
                    selector.count,
                    selector.count != Count::Max,
                    true,
                )
            }
            Some(input) => {
                let mut sorted: Vec<_> = input
                    .into_iter()
                    .filter_map(|e| state.positions.get(&e.id()).map(|p| (*p, e)))
                    .collect();
                drop(state);
                sorted.sort_by_key(|(p, _)| *p);
                if newest_first {
                    sorted.reverse();
                }
                narrow(
                    &self.name,
                    sorted.into_iter().map(|(_, e)| e).collect(),
                    selector.count,
                )
            }
        }
    }
}
