//! Ordered property index for query coordinators.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tuplespace_codec::{Path, Resolved, Value, ValueKind};

use crate::coordination::query::matchmaker::IndexProbe;
use crate::types::EntryId;

/// Declares an index over a property path.
///
/// Only entries whose value kind is listed in `kinds` are indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Indexed property.
    pub path: Path,
    /// Entry kinds that take part.
    pub kinds: Vec<ValueKind>,
}

impl IndexDefinition {
    /// Indexes `path` for entries of the given kinds.
    #[must_use]
    pub fn new(path: Path, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        Self {
            path,
            kinds: kinds.into_iter().collect(),
        }
    }
}

/// Index key ordered by [`Value::index_cmp`].
#[derive(Debug, Clone)]
struct IndexKey(Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.index_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct IndexState {
    tree: BTreeMap<IndexKey, BTreeSet<EntryId>>,
    keys: HashMap<EntryId, Vec<IndexKey>>,
}

/// Ordered index answering comparison lookups.
///
/// Collection values are indexed once per element. Lookups only return
/// entries whose indexed value has the boundary's kind, so values of
/// different kinds sharing the index are never compared.
#[derive(Debug)]
pub struct ExtendedSearchIndex {
    definition: IndexDefinition,
    state: RwLock<IndexState>,
}

impl ExtendedSearchIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(definition: IndexDefinition) -> Self {
        Self {
            definition,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// The index definition.
    #[must_use]
    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    /// Indexes an entry value. Returns false if the entry does not take part.
    pub fn insert(&self, entry: EntryId, value: &Value) -> bool {
        if !self.definition.kinds.contains(&value.kind()) {
            return false;
        }
        let keys: Vec<IndexKey> = match self.definition.path.resolve(value) {
            Resolved::Found(Value::Array(items)) => items.into_iter().map(IndexKey).collect(),
            Resolved::Found(v) => vec![IndexKey(v)],
            Resolved::NoPathMatch => return false,
        };
        let mut state = self.state.write();
        for key in &keys {
            state.tree.entry(key.clone()).or_default().insert(entry);
        }
        state.keys.insert(entry, keys);
        true
    }

    /// Removes an entry.
    pub fn remove(&self, entry: EntryId) {
        let mut state = self.state.write();
        let Some(keys) = state.keys.remove(&entry) else {
            return;
        };
        for key in keys {
            if let Some(ids) = state.tree.get_mut(&key) {
                ids.remove(&entry);
                if ids.is_empty() {
                    state.tree.remove(&key);
                }
            }
        }
    }

    /// Number of indexed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().keys.len()
    }

    /// Returns true if no entry is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn range(&self, kind: ValueKind, low: Bound<&Value>, high: Bound<&Value>) -> BTreeSet<EntryId> {
        let wrap = |b: Bound<&Value>| match b {
            Bound::Included(v) => Bound::Included(IndexKey(v.clone())),
            Bound::Excluded(v) => Bound::Excluded(IndexKey(v.clone())),
            Bound::Unbounded => Bound::Unbounded,
        };
        let (low, high) = (wrap(low), wrap(high));
        if let (Bound::Included(l) | Bound::Excluded(l), Bound::Included(h) | Bound::Excluded(h)) =
            (&low, &high)
        {
            if l > h {
                return BTreeSet::new();
            }
        }
        let state = self.state.read();
        state
            .tree
            .range((low, high))
            .filter(|(key, _)| key.0.kind() == kind)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Entries with a value less than `value`.
    #[must_use]
    pub fn lookup_less_than(&self, value: &Value) -> BTreeSet<EntryId> {
        self.range(value.kind(), Bound::Unbounded, Bound::Excluded(value))
    }

    /// Entries with a value less than or equal to `value`.
    #[must_use]
    pub fn lookup_less_than_or_equal(&self, value: &Value) -> BTreeSet<EntryId> {
        self.range(value.kind(), Bound::Unbounded, Bound::Included(value))
    }

    /// Entries with a value greater than `value`.
    #[must_use]
    pub fn lookup_greater_than(&self, value: &Value) -> BTreeSet<EntryId> {
        self.range(value.kind(), Bound::Excluded(value), Bound::Unbounded)
    }

    /// Entries with a value greater than or equal to `value`.
    #[must_use]
    pub fn lookup_greater_than_or_equal(&self, value: &Value) -> BTreeSet<EntryId> {
        self.range(value.kind(), Bound::Included(value), Bound::Unbounded)
    }

    /// Entries with `low <= value <= high`. Bounds of different kinds
    /// select nothing.
    #[must_use]
    pub fn lookup_between(&self, low: &Value, high: &Value) -> BTreeSet<EntryId> {
        if low.kind() != high.kind() {
            return BTreeSet::new();
        }
        self.range(low.kind(), Bound::Included(low), Bound::Included(high))
    }

    /// Entries with a value equal to `value`.
    #[must_use]
    pub fn lookup_equal(&self, value: &Value) -> BTreeSet<EntryId> {
        self.range(value.kind(), Bound::Included(value), Bound::Included(value))
    }

    pub(crate) fn probe(&self, probe: IndexProbe<'_>) -> BTreeSet<EntryId> {
        match probe {
            IndexProbe::Equal(v) => self.lookup_equal(v),
            IndexProbe::LessThan(v) => self.lookup_less_than(v),
            IndexProbe::LessThanOrEqual(v) => self.lookup_less_than_or_equal(v),
            IndexProbe::GreaterThan(v) => self.lookup_greater_than(v),
            IndexProbe::GreaterThanOrEqual(v) => self.lookup_greater_than_or_equal(v),
            IndexProbe::Between(low, high) => self.lookup_between(low, high),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::query::matchmaker::Matchmaker;
    use proptest::prelude::*;

    fn index() -> ExtendedSearchIndex {
        ExtendedSearchIndex::new(IndexDefinition::new(
            Path::parse("price").unwrap(),
            [ValueKind::Map],
        ))
    }

    fn item(price: Value) -> Value {
        Value::record([("price", price)])
    }

    fn ids(set: BTreeSet<EntryId>) -> Vec<u64> {
        set.into_iter().map(EntryId::as_u64).collect()
    }

    #[test]
    fn range_lookups() {
        let idx = index();
        for (id, price) in [(1, 10), (2, 20), (3, 30)] {
            assert!(idx.insert(EntryId::new(id), &item(Value::Integer(price))));
        }
        assert_eq!(ids(idx.lookup_less_than(&Value::Integer(20))), [1]);
        assert_eq!(ids(idx.lookup_less_than_or_equal(&Value::Integer(20))), [1, 2]);
        assert_eq!(ids(idx.lookup_greater_than(&Value::Integer(20))), [3]);
        assert_eq!(ids(idx.lookup_greater_than_or_equal(&Value::Integer(20))), [2, 3]);
        assert_eq!(
            ids(idx.lookup_between(&Value::Integer(15), &Value::Integer(30))),
            [2, 3]
        );
        assert!(idx
            .lookup_between(&Value::Integer(30), &Value::Integer(15))
            .is_empty());
        assert_eq!(ids(idx.lookup_equal(&Value::Integer(30))), [3]);
    }

    #[test]
    fn other_kinds_are_never_returned() {
        let idx = index();
        idx.insert(EntryId::new(1), &item(Value::Integer(10)));
        idx.insert(EntryId::new(2), &item(Value::Float(10.0)));
        idx.insert(EntryId::new(3), &item(Value::from("10")));
        assert_eq!(ids(idx.lookup_less_than_or_equal(&Value::Integer(10))), [1]);
        assert_eq!(ids(idx.lookup_greater_than_or_equal(&Value::Float(0.0))), [2]);
        assert!(idx
            .lookup_between(&Value::Integer(0), &Value::Float(20.0))
            .is_empty());
    }

    #[test]
    fn restricted_kinds_and_collections() {
        let idx = index();
        assert!(!idx.insert(EntryId::new(1), &Value::Integer(10)));
        assert!(!idx.insert(EntryId::new(2), &Value::record([("cost", Value::Integer(1))])));
        idx.insert(
            EntryId::new(3),
            &item(Value::Array(vec![Value::Integer(5), Value::Integer(50)])),
        );
        assert_eq!(ids(idx.lookup_less_than(&Value::Integer(10))), [3]);
        assert_eq!(ids(idx.lookup_greater_than(&Value::Integer(10))), [3]);
        idx.remove(EntryId::new(3));
        assert!(idx.is_empty());
        assert!(idx.lookup_less_than(&Value::Integer(100)).is_empty());
    }

    fn float_strategy() -> impl Strategy<Value = f64> {
        prop_oneof![
            (-40i32..40).prop_map(f64::from),
            (1u64..1024).prop_map(|payload| f64::from_bits(0x7ff8_0000_0000_0000 | payload)),
            (1u64..1024).prop_map(|payload| f64::from_bits(0xfff8_0000_0000_0000 | payload)),
            Just(0.0),
            Just(-0.0),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
        ]
    }

    #[test]
    fn nan_prices_do_not_hide_neighbours() {
        let idx = index();
        let prices: Vec<f64> = (0..40)
            .map(|i| {
                if i % 3 == 0 {
                    f64::from_bits(0x7ff8_0000_0000_0000 | i)
                } else {
                    i as f64
                }
            })
            .collect();
        for (i, p) in prices.iter().enumerate() {
            idx.insert(EntryId::new(i as u64), &item(Value::Float(*p)));
        }
        let path = Path::parse("price").unwrap();
        for bound in 0..40 {
            let bound = f64::from(bound);
            let expected: Vec<u64> = prices
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    Matchmaker::greater_than(path.clone(), Value::Float(bound))
                        .matches(&item(Value::Float(**p)))
                        .unwrap()
                })
                .map(|(i, _)| i as u64)
                .collect();
            assert_eq!(ids(idx.lookup_greater_than(&Value::Float(bound))), expected);
        }
    }

    proptest! {
        #[test]
        fn float_lookups_agree_with_matchmakers(
            prices in proptest::collection::vec(float_strategy(), 0..30),
            low in float_strategy(),
            high in float_strategy(),
        ) {
            let idx = index();
            for (i, p) in prices.iter().enumerate() {
                idx.insert(EntryId::new(i as u64), &item(Value::Float(*p)));
            }
            let path = Path::parse("price").unwrap();
            let (low, high) = (Value::Float(low), Value::Float(high));
            let cases = [
                (Matchmaker::equal(path.clone(), low.clone()), idx.lookup_equal(&low)),
                (Matchmaker::less_than(path.clone(), low.clone()), idx.lookup_less_than(&low)),
                (
                    Matchmaker::less_than_or_equal(path.clone(), low.clone()),
                    idx.lookup_less_than_or_equal(&low),
                ),
                (
                    Matchmaker::greater_than(path.clone(), low.clone()),
                    idx.lookup_greater_than(&low),
                ),
                (
                    Matchmaker::greater_than_or_equal(path.clone(), low.clone()),
                    idx.lookup_greater_than_or_equal(&low),
                ),
                (
                    Matchmaker::between(path.clone(), low.clone(), high.clone()),
                    idx.lookup_between(&low, &high),
                ),
            ];
            for (matchmaker, hits) in cases {
                let expected: Vec<u64> = prices
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| matchmaker.matches(&item(Value::Float(**p))).unwrap())
                    .map(|(i, _)| i as u64)
                    .collect();
                prop_assert_eq!(ids(hits), expected, "{:?}", matchmaker);
            }
        }

        #[test]
        fn between_agrees_with_scan(
            prices in proptest::collection::vec(-50i64..50, 0..30),
            low in -60i64..60,
            high in -60i64..60,
        ) {
            let idx = index();
            for (i, p) in prices.iter().enumerate() {
                idx.insert(EntryId::new(i as u64), &item(Value::Integer(*p)));
            }
            let expected: Vec<u64> = prices
                .iter()
                .enumerate()
                .filter(|(_, p)| low <= **p && **p <= high)
                .map(|(i, _)| i as u64)
                .collect();
            let got = ids(idx.lookup_between(&Value::Integer(low), &Value::Integer(high)));
            prop_assert_eq!(got, expected);
        }
    }
}
