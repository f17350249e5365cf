//! Coordinator over authorization rules.

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
use crate::error::{CoreError, CoreResult};
use crate::types::EntryId;

/// Subject, resource and action of a stored rule. `None` targets all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RuleTarget {
    subject: Option<String>,
    resource: Option<String>,
    action: Option<String>,
}

impl RuleTarget {
    fn from_value(value: &Value) -> CoreResult<Self> {
        if value.as_map().is_none() {
            return Err(CoreError::invalid_entry_type(format!(
                "authorization rule must be a map, got {}",
                value.kind()
            )));
        }
        Ok(Self {
            subject: field(value, "subject")?,
            resource: field(value, "resource")?,
            action: field(value, "action")?,
        })
    }

    fn matches(&self, subject: Option<&str>, resource: Option<&str>, action: Option<&str>) -> bool {
        fn one(rule: &Option<String>, wanted: Option<&str>) -> bool {
            match (rule, wanted) {
                (Some(rule), Some(wanted)) => rule == wanted,
                _ => true,
            }
        }
        one(&self.subject, subject) && one(&self.resource, resource) && one(&self.action, action)
    }
}

fn field(value: &Value, name: &str) -> CoreResult<Option<String>> {
    match value.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(text)) => Ok(Some(text.clone())),
        Some(other) => Err(CoreError::invalid_entry_type(format!(
            "rule field {name} must be text, got {}",
            other.kind()
        ))),
    }
}

/// Selects authorization rule entries by their target.
///
/// Entries must be maps whose optional `subject`, `resource` and
/// `action` fields are text; a missing or null field targets everything.
#[derive(Debug)]
pub struct AuthTargetCoordinator {
    name: String,
    rules: RwLock<BTreeMap<EntryId, (Arc<Entry>, RuleTarget)>>,
}

impl AuthTargetCoordinator {
    /// Creates an empty coordinator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Coordinator for AuthTargetCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        CoordinatorKind::AuthTarget
    }

    fn register(
        &self,
        entry: &Arc<Entry>,
        _payload: &CoordinationPayload,
        _ctx: &RegisterContext<'_>,
    ) -> CoreResult<()> {
        let target = RuleTarget::from_value(entry.value())?;
        self.rules
            .write()
            .insert(entry.id(), (Arc::clone(entry), target));
        Ok(())
    }

    fn unregister(&self, entry: EntryId) -> bool {
        self.rules.write().remove(&entry).is_some()
    }

    fn contains(&self, entry: EntryId) -> bool {
        self.rules.read().contains_key(&entry)
    }

    fn len(&self) -> usize {
        self.rules.read().len()
    }

    fn select(
        &self,
        selector: &Selector,
        input: Option<Vec<Arc<Entry>>>,
        ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        let Criteria::AuthTarget {
            subject,
            resource,
            action,
        } = &selector.criteria
        else {
            return Err(unsupported(&self.name, selector));
        };
        let (subject, resource, action) =
            (subject.as_deref(), resource.as_deref(), action.as_deref());
        let rules = self.rules.read();
        check_total(&self.name, rules.len(), selector.count)?;
        match input {
            None => {
                let candidates: Vec<_> = rules
                    .values()
                    .filter(|(_, target)| target.matches(subject, resource, action))
                    .map(|(entry, _)| Arc::clone(entry))
                    .collect();
                drop(rules);
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
                    .filter(|e| {
                        rules
                            .get(&e.id())
                            .is_some_and(|(_, target)| target.matches(subject, resource, action))
                    })
                    .collect();
                drop(rules);
                narrow(&self.name, kept, selector.count)
            }
        }
    }
}
