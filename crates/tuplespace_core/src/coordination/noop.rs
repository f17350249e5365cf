//! Coordinator that accepts registrations and answers nothing.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::container::Entry;
use crate::coordination::{
    CoordinationPayload, Coordinator, CoordinatorKind, RegisterContext, SelectionContext,
    Selector,
};
use crate::error::{CoreError, CoreResult};
use crate::types::EntryId;

/// Tracks membership only; every selection fails with `InvalidSelector`.
#[derive(Debug)]
pub struct NoOperationCoordinator {
    name: String,
    members: RwLock<BTreeSet<EntryId>>,
}

impl NoOperationCoordinator {
    /// Creates an empty coordinator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: RwLock::new(BTreeSet::new()),
        }
    }
}

impl Coordinator for NoOperationCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        CoordinatorKind::NoOperation
    }

    fn register(
        &self,
        entry: &Arc<Entry>,
        _payload: &CoordinationPayload,
        _ctx: &RegisterContext<'_>,
    ) -> CoreResult<()> {
        self.members.write().insert(entry.id());
        Ok(())
    }

    fn unregister(&self, entry: EntryId) -> bool {
        self.members.write().remove(&entry)
    }

    fn contains(&self, entry: EntryId) -> bool {
        self.members.read().contains(&entry)
    }

    fn len(&self) -> usize {
        self.members.read().len()
    }

    fn select(
        &self,
        selector: &Selector,
        _input: Option<Vec<Arc<Entry>>>,
        _ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        Err(CoreError::invalid_selector(format!(
            "coordinator {} does not select ({selector})",
            self.name
        )))
    }
}
