//! Coordinator returning any entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::container::Entry;
use crate::coordination::selection::{check_total, narrow};
use crate::coordination::{
    unsupported, CoordinationPayload, Coordinator, CoordinatorKind, Count, Criteria,
    RegisterContext, SelectionContext, Selector,
};
use crate::error::CoreResult;
use crate::types::EntryId;

/// Keeps entries in registration order and selects any of them.
///
/// This is the obligatory coordinator of a container created without one.
#[derive(Debug)]
pub struct AnyCoordinator {
    name: String,
    entries: RwLock<BTreeMap<EntryId, Arc<Entry>>>,
}

impl AnyCoordinator {
    /// Creates an empty coordinator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Coordinator for AnyCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        CoordinatorKind::Any
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
        if selector.criteria != Criteria::Any {
            return Err(unsupported(&self.name, selector));
        }
        match input {
            None => {
                let candidates: Vec<_> = self.entries.read().values().cloned().collect();
                check_total(&self.name, candidates.len(), selector.count)?;
                ctx.scan(
                    &self.name,
                    candidates,
                    selector.count,
                    selector.count == Count::All,
                    false,
                )
            }
            Some(input) => {
                let entries = self.entries.read();
                let kept = input
                    .into_iter()
                    .filter(|e| entries.contains_key(&e.id()))
                    .collect();
                drop(entries);
                narrow(&self.name, kept, selector.count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::tests::Fixture;

    #[test]
    fn selects_in_registration_order() {
        let fx = Fixture::new();
        let coord = AnyCoordinator::new("any");
        for v in 1..=3 {
            fx.register(&coord, v, CoordinationPayload::Empty);
        }
        let got = fx.select(&coord, &Selector::any(Count::Exactly(2)), None).unwrap();
        assert_eq!(Fixture::values(&got), [1, 2]);

        assert!(coord.unregister(EntryId::new(1)));
        assert!(!coord.unregister(EntryId::new(1)));
        let got = fx.select(&coord, &Selector::any(Count::All), None).unwrap();
        assert_eq!(Fixture::values(&got), [2, 3]);
    }

    #[test]
    fn rejects_foreign_criteria() {
        let fx = Fixture::new();
        let coord = AnyCoordinator::new("any");
        assert!(fx
            .select(&coord, &Selector::fifo(Count::All).named("any"), None)
            .is_err());
    }
}
