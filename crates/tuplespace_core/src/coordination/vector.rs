//! Positional coordinator.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::container::Entry;
use crate::coordination::selection::{check_total, narrow};
use crate::coordination::{
    unexpected_payload, unsupported, CoordinationPayload, Coordinator, CoordinatorKind, Count,
    Criteria, RegisterContext, SelectionContext, Selector, VectorIndex,
};
use crate::error::{CoreError, CoreResult};
use crate::types::EntryId;

/// Keeps entries at numbered positions.
///
/// Each position is a slot. An overwrite in progress puts the new entry
/// into the slot of the entry it replaces, so a slot holds more than one
/// entry only until the overwriting transaction ends. Inserting at a
/// position shifts every later slot up by one.
///
/// Structural changes are serialized by the coordinator lock the
/// container takes on its behalf.
#[derive(Debug)]
pub struct VectorCoordinator {
    name: String,
    slots: RwLock<Vec<Vec<Arc<Entry>>>>,
}

impl VectorCoordinator {
    /// Creates an empty vector.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Number of positions.
    #[must_use]
    pub fn positions(&self) -> usize {
        self.slots.read().len()
    }

    /// Position of an entry.
    #[must_use]
    pub fn position_of(&self, entry: EntryId) -> Option<usize> {
        self.slots
            .read()
            .iter()
            .position(|slot| slot.iter().any(|e| e.id() == entry))
    }
}

impl Coordinator for VectorCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        CoordinatorKind::Vector
    }

    fn is_implicit(&self) -> bool {
        false
    }

    fn needs_structure_lock(&self) -> bool {
        true
    }

    fn register(
        &self,
        entry: &Arc<Entry>,
        payload: &CoordinationPayload,
        ctx: &RegisterContext<'_>,
    ) -> CoreResult<()> {
        let CoordinationPayload::Vector(index) = payload else {
            return Err(unexpected_payload(&self.name, payload));
        };
        let mut slots = self.slots.write();
        let len = slots.len();
        match *index {
            VectorIndex::Append => slots.push(vec![Arc::clone(entry)]),
            VectorIndex::At(i) if i == len => slots.push(vec![Arc::clone(entry)]),
            VectorIndex::At(i) if i > len => {
                if !ctx.is_restoring() {
                    return Err(CoreError::invalid_operation(format!(
                        "vector index {i} out of range (size {len})"
                    )));
                }
                slots.push(vec![Arc::clone(entry)]);
            }
            VectorIndex::At(i) => {
                let overwrite = !ctx.is_restoring()
                    && slots[i]
                        .iter()
                        .any(|base| ctx.is_valid_overwrite(base.id(), entry.id()));
                if overwrite {
                    slots[i].push(Arc::clone(entry));
                } else {
                    slots.insert(i, vec![Arc::clone(entry)]);
                }
            }
        }
        Ok(())
    }

    fn unregister(&self, entry: EntryId) -> bool {
        let mut slots = self.slots.write();
        let Some(position) = slots
            .iter()
            .position(|slot| slot.iter().any(|e| e.id() == entry))
        else {
            return false;
        };
        if slots[position].len() == 1 {
            slots.remove(position);
        } else {
            slots[position].retain(|e| e.id() != entry);
        }
        true
    }

    fn contains(&self, entry: EntryId) -> bool {
        self.position_of(entry).is_some()
    }

    fn len(&self) -> usize {
        self.slots.read().iter().map(Vec::len).sum()
    }

    fn select(
        &self,
        selector: &Selector,
        input: Option<Vec<Arc<Entry>>>,
        ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        let Criteria::Vector(start) = selector.criteria else {
            return Err(unsupported(&self.name, selector));
        };
        let count = selector.count;
        match input {
            None => {
                let candidates: Vec<Vec<Arc<Entry>>> =
                    self.slots.read().iter().skip(start).cloned().collect();
                check_total(&self.name, candidates.len(), count)?;
                let mandatory = count != Count::Max;
                let mut result = Vec::new();
                for slot in candidates {
                    if count.is_met(result.len()) {
                        break;
                    }
                    let mut found = None;
                    for entry in slot {
                        if ctx.check_accessibility(&entry, mandatory)? {
                            found = Some(entry);
                            break;
                        }
                    }
                    match found {
                        Some(entry) => result.push(entry),
                        None => {
                            ctx.check_count(&self.name, result.len(), count)?;
                            return Ok(result);
                        }
                    }
                }
                ctx.check_count(&self.name, result.len(), count)?;
                Ok(result)
            }
            Some(input) => {
                let slots = self.slots.read();
                let mut run = Vec::new();
                for slot in slots.iter().skip(start) {
                    match slot.iter().find(|e| input.iter().any(|i| i.id() == e.id())) {
                        Some(entry) => run.push(Arc::clone(entry)),
                        None => break,
                    }
                }
                drop(slots);
                narrow(&self.name, run, count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::tests::Fixture;

    fn at(i: usize) -> CoordinationPayload {
        CoordinationPayload::Vector(VectorIndex::At(i))
    }

    fn append() -> CoordinationPayload {
        CoordinationPayload::Vector(VectorIndex::Append)
    }

    #[test]
    fn insert_shifts_later_positions() {
        let fx = Fixture::new();
        let coord = VectorCoordinator::new("vector");
        fx.register(&coord, 10, append());
        fx.register(&coord, 30, append());
        fx.register(&coord, 20, at(1));

        let got = fx.select(&coord, &Selector::vector(0, Count::All), None).unwrap();
        assert_eq!(Fixture::values(&got), [10, 20, 30]);
        assert_eq!(coord.position_of(EntryId::new(2)), Some(2));

        let got = fx
            .select(&coord, &Selector::vector(1, Count::Exactly(1)), None)
            .unwrap();
        assert_eq!(Fixture::values(&got), [20]);
    }

    #[test]
    fn out_of_range_index_fails_unless_restoring() {
        let fx = Fixture::new();
        let coord = VectorCoordinator::new("vector");
        let err = fx.try_register(&coord, 1, at(3)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        fx.restore(&coord, 2, at(3));
        assert_eq!(coord.positions(), 1);
    }

    #[test]
    fn overwrite_shares_the_slot() {
        let fx = Fixture::new();
        let coord = VectorCoordinator::new("vector");
        let old = fx.register(&coord, 1, append());
        fx.register(&coord, 2, append());
        fx.take_lock_by_self(old.id());
        fx.register_uncommitted(&coord, 3, at(0));
        assert_eq!(coord.positions(), 2);

        let got = fx.select(&coord, &Selector::vector(0, Count::All), None).unwrap();
        assert_eq!(Fixture::values(&got), [3, 2]);

        assert!(coord.unregister(old.id()));
        assert_eq!(coord.positions(), 2);
        assert_eq!(coord.len(), 2);
    }

    #[test]
    fn removal_closes_the_gap() {
        let fx = Fixture::new();
        let coord = VectorCoordinator::new("vector");
        for v in [1, 2, 3] {
            fx.register(&coord, v, append());
        }
        assert!(coord.unregister(EntryId::new(2)));
        let got = fx.select(&coord, &Selector::vector(1, Count::All), None).unwrap();
        assert_eq!(Fixture::values(&got), [3]);
    }

    #[test]
    fn locked_position_blocks() {
        let fx = Fixture::new();
        let coord = VectorCoordinator::new("vector");
        for v in [1, 2, 3] {
            fx.register(&coord, v, append());
        }
        fx.take_lock_by_other(EntryId::new(2));
        let err = fx
            .select(&coord, &Selector::vector(0, Count::Exactly(3)), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::EntryLocked { .. }));

        let got = fx.select(&coord, &Selector::vector(0, Count::Max), None).unwrap();
        assert_eq!(Fixture::values(&got), [1]);
    }

    #[test]
    fn chained_selection_takes_contiguous_run() {
        let fx = Fixture::new();
        let coord = VectorCoordinator::new("vector");
        for v in [1, 2, 3, 4] {
            fx.register(&coord, v, append());
        }
        let input = fx.entries(&[1, 2, 4]);
        let got = fx
            .select(&coord, &Selector::vector(0, Count::All), Some(input))
            .unwrap();
        assert_eq!(Fixture::values(&got), [1, 2]);
    }

    #[test]
    fn needs_data_and_structure_lock() {
        let coord = VectorCoordinator::new("vector");
        assert!(!coord.is_implicit());
        assert!(coord.needs_structure_lock());
        let fx = Fixture::new();
        assert!(fx.try_register(&coord, 1, CoordinationPayload::Empty).is_err());
    }
}
