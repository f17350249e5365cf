//! Key and label coordinators.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::container::Entry;
use crate::coordination::selection::{check_total, narrow};
use crate::coordination::{
    unexpected_payload, unsupported, CoordinationPayload, Coordinator, CoordinatorKind, Count,
    Criteria, RegisterContext, SelectionContext, Selector,
};
use crate::error::{CoreError, CoreResult};
use crate::types::EntryId;

#[derive(Debug, Default)]
struct LabelState {
    by_label: HashMap<String, Vec<Arc<Entry>>>,
    labels: HashMap<EntryId, Vec<String>>,
}

/// Maps string labels to entries.
///
/// In key mode every key names at most one live entry. A second entry
/// may only join a key while the current holder is being taken by the
/// same transaction (an overwrite); otherwise registration fails with a
/// delayable `DuplicateKey`.
#[derive(Debug)]
pub struct LabelCoordinator {
    name: String,
    unique: bool,
    state: RwLock<LabelState>,
}

impl LabelCoordinator {
    /// Creates a multi-valued label coordinator.
    pub fn labels(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: false,
            state: RwLock::new(LabelState::default()),
        }
    }

    /// Creates a unique-key coordinator.
    pub fn keys(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: true,
            state: RwLock::new(LabelState::default()),
        }
    }

    /// Labels currently in use.
    #[must_use]
    pub fn label_count(&self) -> usize {
        self.state.read().by_label.len()
    }
}

impl Coordinator for LabelCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        if self.unique {
            CoordinatorKind::Key
        } else {
            CoordinatorKind::Label
        }
    }

    fn is_implicit(&self) -> bool {
        false
    }

    fn register(
        &self,
        entry: &Arc<Entry>,
        payload: &CoordinationPayload,
        ctx: &RegisterContext<'_>,
    ) -> CoreResult<()> {
        let labels = match (self.unique, payload) {
            (true, CoordinationPayload::Key(key)) => vec![key.clone()],
            (false, CoordinationPayload::Labels(labels)) => labels.clone(),
            (false, CoordinationPayload::Key(label)) => vec![label.clone()],
            _ => return Err(unexpected_payload(&self.name, payload)),
        };

        let mut state = self.state.write();
        if self.unique && !ctx.is_restoring() {
            for key in &labels {
                let holder = state.by_label.get(key).and_then(|list| list.last());
                if let Some(holder) = holder {
                    if !ctx.is_valid_overwrite(holder.id(), entry.id()) {
                        return Err(CoreError::DuplicateKey { key: key.clone() });
                    }
                }
            }
        }
        for label in &labels {
            state
                .by_label
                .entry(label.clone())
                .or_default()
                .push(Arc::clone(entry));
        }
        state.labels.insert(entry.id(), labels);
        Ok(())
    }

    fn unregister(&self, entry: EntryId) -> bool {
        let mut state = self.state.write();
        let Some(labels) = state.labels.remove(&entry) else {
            return false;
        };
        for label in labels {
            if let Some(list) = state.by_label.get_mut(&label) {
                list.retain(|e| e.id() != entry);
                if list.is_empty() {
                    state.by_label.remove(&label);
                }
            }
        }
        true
    }

    fn contains(&self, entry: EntryId) -> bool {
        self.state.read().labels.contains_key(&entry)
    }

    fn len(&self) -> usize {
        self.state.read().labels.len()
    }

    fn select(
        &self,
        selector: &Selector,
        input: Option<Vec<Arc<Entry>>>,
        ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        let wanted = match (&selector.criteria, self.unique) {
            (Criteria::Key(key), true) => key,
            (Criteria::Label(label), false) => label,
            _ => return Err(unsupported(&self.name, selector)),
        };
        let state = self.state.read();
        check_total(&self.name, state.labels.len(), selector.count)?;
        match input {
            None => {
                let candidates = state.by_label.get(wanted).cloned().unwrap_or_default();
                drop(state);
                check_total(&self.name, candidates.len(), selector.count)?;
                let mandatory = if self.unique {
                    selector.count != Count::Max
                } else {
                    selector.count == Count::All
                };
                ctx.scan(&self.name, candidates, selector.count, mandatory, false)
            }
            Some(input) => {
                let kept = input
                    .into_iter()
                    .filter(|e| {
                        state
                            .labels
                            .get(&e.id())
                            .is_some_and(|labels| labels.iter().any(|l| l == wanted))
                    })
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

    fn key(k: &str) -> CoordinationPayload {
        CoordinationPayload::Key(k.to_string())
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let fx = Fixture::new();
        let coord = LabelCoordinator::keys("key");
        fx.register(&coord, 1, key("a"));
        let err = fx.try_register(&coord, 2, key("a")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { ref key } if key == "a"));
        assert!(err.is_retryable());
    }

    #[test]
    fn overwrite_by_taking_transaction_is_allowed() {
        let fx = Fixture::new();
        let coord = LabelCoordinator::keys("key");
        let old = fx.register(&coord, 1, key("a"));
        fx.take_lock_by_self(old.id());
        let new = fx.register_uncommitted(&coord, 2, key("a"));

        let got = fx.select(&coord, &Selector::key("a"), None).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id(), new.id());
    }

    #[test]
    fn labels_are_multi_valued() {
        let fx = Fixture::new();
        let coord = LabelCoordinator::labels("label");
        fx.register(&coord, 1, CoordinationPayload::Labels(vec!["red".into(), "big".into()]));
        fx.register(&coord, 2, CoordinationPayload::Labels(vec!["red".into()]));
        fx.register(&coord, 3, CoordinationPayload::Labels(vec!["big".into()]));

        let red = fx.select(&coord, &Selector::label("red", Count::All), None).unwrap();
        assert_eq!(Fixture::values(&red), [1, 2]);

        let big = fx
            .select(&coord, &Selector::label("big", Count::All), Some(red))
            .unwrap();
        assert_eq!(Fixture::values(&big), [1]);

        assert!(coord.unregister(EntryId::new(1)));
        assert_eq!(coord.label_count(), 2);
        let big = fx.select(&coord, &Selector::label("big", Count::Max), None).unwrap();
        assert_eq!(Fixture::values(&big), [3]);
    }

    #[test]
    fn missing_key_is_count_not_met() {
        let fx = Fixture::new();
        let coord = LabelCoordinator::keys("key");
        fx.register(&coord, 1, key("a"));
        let err = fx.select(&coord, &Selector::key("b"), None).unwrap_err();
        assert!(matches!(err, CoreError::CountNotMet { .. }));
    }

    #[test]
    fn key_coordinator_needs_key_data() {
        let fx = Fixture::new();
        let coord = LabelCoordinator::keys("key");
        assert!(fx
            .try_register(&coord, 1, CoordinationPayload::Empty)
            .is_err());
        assert!(!coord.is_implicit());
    }
}
