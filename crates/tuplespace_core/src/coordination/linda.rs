//! Template matching coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tuplespace_codec::Value;

use crate::container::Entry;
use crate::coordination::selection::{check_total, narrow};
use crate::coordination::{
    unsupported, CoordinationPayload, Coordinator, CoordinatorKind, Count, Criteria,
    RegisterContext, SelectionContext, Selector,
};
use crate::error::CoreResult;
use crate::types::EntryId;

/// Returns true if `candidate` matches `template`.
///
/// `Null` in the template matches anything at any depth. Otherwise kinds
/// must agree; arrays match element-wise and must have equal length;
/// maps match when every non-null template field is present in the
/// candidate and matches (extra candidate fields are ignored); all other
/// values must be equal.
#[must_use]
pub fn template_matches(template: &Value, candidate: &Value) -> bool {
    match (template, candidate) {
        (Value::Null, _) => true,
        (Value::Array(t), Value::Array(c)) => {
            t.len() == c.len() && t.iter().zip(c).all(|(t, c)| template_matches(t, c))
        }
        (Value::Map(t), Value::Map(c)) => t.iter().all(|(key, field)| {
            field.is_null()
                || c
                    .iter()
                    .find(|(k, _)| k == key)
                    .is_some_and(|(_, value)| template_matches(field, value))
        }),
        _ => template.kind() == candidate.kind() && template == candidate,
    }
}

/// Selects entries matching a template value.
#[derive(Debug)]
pub struct LindaCoordinator {
    name: String,
    entries: RwLock<BTreeMap<EntryId, Arc<Entry>>>,
}

impl LindaCoordinator {
    /// Creates an empty coordinator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Coordinator for LindaCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        CoordinatorKind::Linda
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
        let Criteria::Linda(template) = &selector.criteria else {
            return Err(unsupported(&self.name, selector));
        };
        let entries = self.entries.read();
        check_total(&self.name, entries.len(), selector.count)?;
        match input {
            None => {
                let candidates: Vec<_> = entries
                    .values()
                    .filter(|e| template_matches(template, e.value()))
                    .cloned()
                    .collect();
                drop(entries);
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
                    .filter(|e| entries.contains_key(&e.id()) && template_matches(template, e.value()))
                    .collect();
                drop(entries);
                narrow(&self.name, kept, selector.count)
            }
        }
    }
}
