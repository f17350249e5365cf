//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random entries, templates and
//! request mixes.

use proptest::prelude::*;
use tuplespace_core::{CoordinationData, Count, Value, WriteEntry};

/// Strategy for generating valid container names.
pub fn container_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for generating key and label strings.
pub fn label_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex")
}

/// Strategy for scalar values of every kind except null.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for nested values up to depth 3.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,6}", inner), 0..4).prop_map(|fields| {
                let mut fields = fields;
                fields.sort_by(|a, b| a.0.cmp(&b.0));
                fields.dedup_by(|a, b| a.0 == b.0);
                Value::record(fields)
            }),
        ]
    })
}

/// Strategy for `{name, age, tags}` records, the shape the query
/// coordinator tests index.
pub fn person_strategy() -> impl Strategy<Value = Value> {
    (
        "[A-Z][a-z]{2,8}",
        0i64..100,
        prop::collection::vec("[a-z]{1,4}", 0..3),
    )
        .prop_map(|(name, age, tags)| {
            Value::record([
                ("name", Value::Text(name)),
                ("age", Value::Integer(age)),
                (
                    "tags",
                    Value::Array(tags.into_iter().map(Value::Text).collect()),
                ),
            ])
        })
}

/// Turns `value` into a template by replacing record fields with the
/// null wildcard where `mask` says so.
pub fn wildcard(value: &Value, mask: &[bool]) -> Value {
    match value {
        Value::Map(pairs) => Value::Map(
            pairs
                .iter()
                .enumerate()
                .map(|(i, (k, v))| {
                    if mask.get(i).copied().unwrap_or(false) {
                        (k.clone(), Value::Null)
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Strategy for selector counts.
pub fn count_strategy() -> impl Strategy<Value = Count> {
    prop_oneof![
        (1usize..8).prop_map(Count::Exactly),
        Just(Count::Max),
        Just(Count::All),
    ]
}

/// Strategy for write batches where every entry carries a label.
pub fn labelled_entries_strategy(max: usize) -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec((label_strategy(), scalar_value_strategy()), 1..=max.max(1))
}

/// Builds write entries from generated `(label, value)` pairs.
pub fn labelled_entries(pairs: &[(String, Value)]) -> Vec<WriteEntry> {
    pairs
        .iter()
        .map(|(label, value)| WriteEntry::new(value.clone()).with(CoordinationData::label(label)))
        .collect()
}

/// An operation in a generated request mix.
#[derive(Debug, Clone)]
pub enum SpaceOp {
    /// Write a value.
    Write(i64),
    /// Take the oldest entry, if any.
    Take,
    /// Read everything.
    ReadAll,
}

/// Strategy for a sequence of queue operations.
pub fn queue_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<SpaceOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => any::<i64>().prop_map(SpaceOp::Write),
            2 => Just(SpaceOp::Take),
            1 => Just(SpaceOp::ReadAll),
        ],
        0..max_len,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tuplespace_core::{coordination::template_matches, RequestContext, RequestTimeout, Selector};

    use crate::fixtures::scenarios::populated_queue;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_container_names_are_nonempty(name in container_name_strategy()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.len() <= 32);
        }

        #[test]
        fn test_value_matches_itself_as_template(value in value_strategy()) {
            prop_assert!(template_matches(&value, &value));
        }

        #[test]
        fn test_wildcarded_record_still_matches(
            person in person_strategy(),
            mask in prop::collection::vec(any::<bool>(), 3),
        ) {
            prop_assert!(template_matches(&wildcard(&person, &mask), &person));
        }

        #[test]
        fn test_queue_behaves_like_a_deque(ops in queue_ops_strategy(40)) {
            let (space, queue) = populated_queue(0);
            let mut model = VecDeque::new();
            let ctx = || RequestContext::new().timeout(RequestTimeout::Zero);

            for op in ops {
                match op {
                    SpaceOp::Write(v) => {
                        space.write(queue.id, vec![WriteEntry::new(v)], ctx()).unwrap();
                        model.push_back(v);
                    }
                    SpaceOp::Take => {
                        let got = space.take(queue.id, vec![Selector::fifo(Count::Exactly(1))], ctx());
                        match model.pop_front() {
                            Some(expected) => {
                                prop_assert_eq!(got.unwrap()[0].value().as_integer(), Some(expected));
                            }
                            None => prop_assert!(got.is_err()),
                        }
                    }
                    SpaceOp::ReadAll => {
                        let got: Vec<_> = space
                            .read(queue.id, vec![Selector::fifo(Count::All)], ctx())
                            .unwrap()
                            .iter()
                            .filter_map(|e| e.value().as_integer())
                            .collect();
                        prop_assert_eq!(got, model.iter().copied().collect::<Vec<_>>());
                    }
                }
            }
        }
    }
}
