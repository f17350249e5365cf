//! Coordinator returning entries in random order.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;

use crate::container::Entry;
use crate::coordination::selection::{check_total, narrow};
use crate::coordination::{
    unsupported, CoordinationPayload, Coordinator, CoordinatorKind, Count, Criteria,
    RegisterContext, SelectionContext, Selector,
};
use crate::error::CoreResult;
use crate::types::EntryId;

/// Selects registered entries in a fresh random order on every call.
#[derive(Debug)]
pub struct RandomCoordinator {
    name: String,
    entries: RwLock<BTreeMap<EntryId, Arc<Entry>>>,
}

impl RandomCoordinator {
    /// Creates an empty coordinator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Coordinator for RandomCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        CoordinatorKind::Random
    }

    fn register(
        &self,
        entry: &Arc<Entry>,
        _payload: &CoordinationPayload,
        _ctx: &RegisterContext<'_>,
    ) -> CoreResult<()> {
        self.entries.write().insert(entry.id(), Arc::clone(entry));
        Ok(())
    }

    fn unregister(&self, entry: EntryId) -> bool {
        self.entries.write().remove(&entry).is_some()
    }

    fn contains(&self, entry: EntryId) -> bool {
        self.entries.read().contains_key(&entry)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn select(
        &self,
        selector: &Selector,
        input: Option<Vec<Arc<Entry>>>,
        ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        if selector.criteria != Criteria::Random {
            return Err(unsupported(&self.name, selector));
        }
        let mut rng = rand::thread_rng();
        match input {
            None => {
                let mut candidates: Vec<_> = self.entries.read().values().cloned().collect();
                check_total(&self.name, candidates.len(), selector.count)?;
                candidates.shuffle(&mut rng);
                ctx.scan(
                    &self.name,
                    candidates,
                    selector.count,
                    selector.count != Count::Max,
                    false,
                )
            }
            Some(input) => {
                let entries = self.entries.read();
                let mut kept: Vec<_> = input
                    .into_iter()
                    .filter(|e| entries.contains_key(&e.id()))
                    .collect();
                drop(entries);
                kept.shuffle(&mut rng);
                narrow(&self.name, kept, selector.count)
            }
        }
    }
}
