//! Coordinator grouping entries by value kind.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tuplespace_codec::ValueKind;

use crate::container::Entry;
use crate::coordination::selection::{check_total, narrow};
use crate::coordination::{
    unsupported, CoordinationPayload, Coordinator, CoordinatorKind, Count, Criteria,
    RegisterContext, SelectionContext, Selector,
};
use crate::error::CoreResult;
use crate::types::EntryId;

#[derive(Debug, Default)]
struct TypeState {
    by_kind: HashMap<ValueKind, BTreeMap<EntryId, Arc<Entry>>>,
    kinds: HashMap<EntryId, ValueKind>,
}

/// Selects entries whose value is of a given kind.
#[derive(Debug)]
pub struct TypeCoordinator {
    name: String,
    state: RwLock<TypeState>,
}

impl TypeCoordinator {
    /// Creates an empty coordinator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(TypeState::default()),
        }
    }

    /// Number of entries of `kind`.
    #[must_use]
    pub fn count_of(&self, kind: ValueKind) -> usize {
        self.state.read().by_kind.get(&kind).map_or(0, BTreeMap::len)
    }
}

impl Coordinator for TypeCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        CoordinatorKind::Type
    }

    fn register(
        &self,
        entry: &Arc<Entry>,
        _payload: &CoordinationPayload,
        _ctx: &RegisterContext<'_>,
    ) -> CoreResult<()> {
        let kind = entry.value().kind();
        let mut state = self.state.write();
        state
            .by_kind
            .entry(kind)
            .or_default()
            .insert(entry.id(), Arc::clone(entry));
        state.kinds.insert(entry.id(), kind);
        Ok(())
    }

    fn unregister(&self, entry: EntryId) -> bool {
        let mut state = self.state.write();
        let Some(kind) = state.kinds.remove(&entry) else {
            return false;
        };
        if let Some(group) = state.by_kind.get_mut(&kind) {
            group.remove(&entry);
            if group.is_empty() {
                state.by_kind.remove(&kind);
            }
        }
        true
    }

    fn contains(&self, entry: EntryId) -> bool {
        self.state.read().kinds.contains_key(&entry)
    }

    fn len(&self) -> usize {
        self.state.read().kinds.len()
    }

    fn select(
        &self,
        selector: &Selector,
        input: Option<Vec<Arc<Entry>>>,
        ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        let Criteria::Type(kind) = selector.criteria else {
            return Err(unsupported(&self.name, selector));
        };
        let state = self.state.read();
        match input {
            None => {
                let candidates: Vec<_> = state
                    .by_kind
                    .get(&kind)
                    .map(|group| group.values().cloned().collect())
                    .unwrap_or_default();
                drop(state);
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
                let kept = input
                    .into_iter()
                    .filter(|e| state.kinds.get(&e.id()) == Some(&kind))
                    .collect();
                drop(state);
                narrow(&self.name, kept, selector.count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::tests::Fixture;
    use tuplespace_codec::Value;

    #[test]
    fn groups_by_kind() {
        let fx = Fixture::new();
        let coord = TypeCoordinator::new("type");
        fx.register(&coord, 1, CoordinationPayload::Empty);
        fx.register_value(&coord, Value::from("one"), CoordinationPayload::Empty);
        fx.register(&coord, 2, CoordinationPayload::Empty);

        assert_eq!(coord.count_of(ValueKind::Integer), 2);
        let got = fx
            .select(&coord, &Selector::of_type(ValueKind::Integer, Count::All), None)
            .unwrap();
        assert_eq!(Fixture::values(&got), [1, 2]);

        let got = fx
            .select(&coord, &Selector::of_type(ValueKind::Text, Count::Max), None)
            .unwrap();
        assert_eq!(got[0].value().as_text(), Some("one"));

        assert!(coord.unregister(got[0].id()));
        assert_eq!(coord.count_of(ValueKind::Text), 0);
    }

    #[test]
    fn missing_kind_fails_specific_count() {
        let fx = Fixture::new();
        let coord = TypeCoordinator::new("type");
        fx.register(&coord, 1, CoordinationPayload::Empty);
        assert!(fx
            .select(&coord, &Selector::of_type(ValueKind::Bool, Count::Exactly(1)), None)
            .is_err());
        assert!(fx
            .select(&coord, &Selector::of_type(ValueKind::Bool, Count::All), None)
            .unwrap()
            .is_empty());
    }
}
