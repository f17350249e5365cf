//! Boolean predicates over entry properties.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tuplespace_codec::{Path, Resolved, Value};

use crate::coordination::query::cache::RegexCache;
use crate::error::CoreResult;

/// Resolves properties of the value under evaluation.
pub(crate) trait Resolver {
    /// Resolves `path` against the current value.
    fn resolve(&self, path: &Path) -> Resolved;
}

/// Resolves directly against a value, without caching.
pub(crate) struct Direct<'a>(pub &'a Value);

impl Resolver for Direct<'_> {
    fn resolve(&self, path: &Path) -> Resolved {
        path.resolve(self.0)
    }
}

/// A predicate over properties of an entry value.
///
/// Every matchmaker treats a path that does not resolve as a non-match,
/// never as `Null`, except where noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Matchmaker {
    /// Property equals the value. A collection property matches when any
    /// element equals it.
    Equal(Path, Value),
    /// Property has the value's kind and differs from it.
    NotEqual(Path, Value),
    /// Property is strictly less than the value.
    LessThan(Path, Value),
    /// Property is less than or equal to the value.
    LessThanOrEqual(Path, Value),
    /// Property is strictly greater than the value.
    GreaterThan(Path, Value),
    /// Property is greater than or equal to the value.
    GreaterThanOrEqual(Path, Value),
    /// Property lies within the inclusive bounds.
    Between(Path, Value, Value),
    /// Property is a member of the set; a collection property must be a
    /// subset of it.
    ElementOf(Path, Vec<Value>),
    /// No element of the property equals the value. A missing path
    /// matches.
    AllNotEqual(Path, Value),
    /// Every element of the property is strictly less than the value.
    AllLessThan(Path, Value),
    /// Text property fully matches the regular expression.
    Regex(Path, String),
    /// Every element of the property satisfies the inner matchmaker,
    /// whose paths are resolved against the element.
    ForAll(Path, Box<Matchmaker>),
    /// The path resolves, possibly to `Null`.
    Exists(Path),
    /// All inner matchmakers match.
    And(Vec<Matchmaker>),
    /// Any inner matchmaker matches.
    Or(Vec<Matchmaker>),
    /// The inner matchmaker does not match.
    Not(Box<Matchmaker>),
}

fn compare(property: &Value, value: &Value) -> Option<Ordering> {
    if property.kind() != value.kind() || !property.kind().is_comparable() {
        return None;
    }
    property.natural_cmp(value)
}

impl Matchmaker {
    /// Property equals `value`.
    #[must_use]
    pub fn equal(path: Path, value: impl Into<Value>) -> Self {
        Self::Equal(path, value.into())
    }

    /// Property differs from `value`.
    #[must_use]
    pub fn not_equal(path: Path, value: impl Into<Value>) -> Self {
        Self::NotEqual(path, value.into())
    }

    /// Property is less than `value`.
    #[must_use]
    pub fn less_than(path: Path, value: impl Into<Value>) -> Self {
        Self::LessThan(path, value.into())
    }

    /// Property is less than or equal to `value`.
    #[must_use]
    pub fn less_than_or_equal(path: Path, value: impl Into<Value>) -> Self {
        Self::LessThanOrEqual(path, value.into())
    }

    /// Property is greater than `value`.
    #[must_use]
    pub fn greater_than(path: Path, value: impl Into<Value>) -> Self {
        Self::GreaterThan(path, value.into())
    }

    /// Property is greater than or equal to `value`.
    #[must_use]
    pub fn greater_than_or_equal(path: Path, value: impl Into<Value>) -> Self {
        Self::GreaterThanOrEqual(path, value.into())
    }

    /// Property lies in `[low, high]`.
    #[must_use]
    pub fn between(path: Path, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Between(path, low.into(), high.into())
    }

    /// Negates this matchmaker.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluates the matchmaker against a whole value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSelector` for a malformed regular expression.
    pub fn matches(&self, value: &Value) -> CoreResult<bool> {
        self.evaluate(&Direct(value), &RegexCache::new())
    }

    pub(crate) fn evaluate(&self, source: &dyn Resolver, regexes: &RegexCache) -> CoreResult<bool> {
        use Resolved::{Found, NoPathMatch};

        let ordered = |path: &Path, value: &Value, accept: fn(Ordering) -> bool| match source
            .resolve(path)
        {
            Found(property) => compare(&property, value).is_some_and(accept),
            NoPathMatch => false,
        };

        Ok(match self {
            Self::Equal(path, value) => match source.resolve(path) {
                Found(Value::Array(items)) if !matches!(value, Value::Array(_)) => {
                    items.contains(value)
                }
                Found(property) => property == *value,
                NoPathMatch => false,
            },
            Self::NotEqual(path, value) => match source.resolve(path) {
                Found(property) => property.kind() == value.kind() && property != *value,
                NoPathMatch => false,
            },
            Self::LessThan(path, value) => ordered(path, value, Ordering::is_lt),
            Self::LessThanOrEqual(path, value) => ordered(path, value, Ordering::is_le),
            Self::GreaterThan(path, value) => ordered(path, value, Ordering::is_gt),
            Self::GreaterThanOrEqual(path, value) => ordered(path, value, Ordering::is_ge),
            Self::Between(path, low, high) => match source.resolve(path) {
                Found(property) => {
                    compare(&property, low).is_some_and(Ordering::is_ge)
                        && compare(&property, high).is_some_and(Ordering::is_le)
                }
                NoPathMatch => false,
            },
            Self::ElementOf(path, set) => {
                if set.is_empty() {
                    return Ok(false);
                }
                match source.resolve(path) {
                    Found(Value::Array(items)) => items.iter().all(|item| set.contains(item)),
                    Found(property) => set.contains(&property),
                    NoPathMatch => false,
                }
            }
            Self::AllNotEqual(path, value) => match source.resolve(path) {
                Found(Value::Null) => !value.is_null(),
                Found(Value::Array(items)) => !items.contains(value),
                Found(property) => property != *value,
                NoPathMatch => true,
            },
            Self::AllLessThan(path, value) => match source.resolve(path) {
                Found(Value::Null) | NoPathMatch => false,
                Found(Value::Array(items)) => items
                    .iter()
                    .all(|item| compare(item, value).is_some_and(Ordering::is_lt)),
                Found(property) => compare(&property, value).is_some_and(Ordering::is_lt),
            },
            Self::Regex(path, pattern) => match source.resolve(path) {
                Found(Value::Text(text)) => regexes.get(pattern)?.is_match(&text),
                _ => false,
            },
            Self::ForAll(path, inner) => match source.resolve(path) {
                Found(Value::Array(items)) => {
                    for item in &items {
                        if !inner.evaluate(&Direct(item), regexes)? {
                            return Ok(false);
                        }
                    }
                    true
                }
                Found(property) => inner.evaluate(&Direct(&property), regexes)?,
                NoPathMatch => false,
            },
            Self::Exists(path) => matches!(source.resolve(path), Found(_)),
            Self::And(inner) => {
                for m in inner {
                    if !m.evaluate(source, regexes)? {
                        return Ok(false);
                    }
                }
                true
            }
            Self::Or(inner) => {
                for m in inner {
                    if m.evaluate(source, regexes)? {
                        return Ok(true);
                    }
                }
                false
            }
            Self::Not(inner) => !inner.evaluate(source, regexes)?,
        })
    }

    /// The path and boundary of a comparison an ordered index can answer.
    pub(crate) fn index_probe(&self) -> Option<(&Path, IndexProbe<'_>)> {
        match self {
            Self::Equal(path, value) => Some((path, IndexProbe::Equal(value))),
            Self::LessThan(path, value) => Some((path, IndexProbe::LessThan(value))),
            Self::LessThanOrEqual(path, value) => Some((path, IndexProbe::LessThanOrEqual(value))),
            Self::GreaterThan(path, value) => Some((path, IndexProbe::GreaterThan(value))),
            Self::GreaterThanOrEqual(path, value) => {
                Some((path, IndexProbe::GreaterThanOrEqual(value)))
            }
            Self::Between(path, low, high) => Some((path, IndexProbe::Between(low, high))),
            _ => None,
        }
    }
}

/// A lookup on an ordered index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum IndexProbe<'a> {
    Equal(&'a Value),
    LessThan(&'a Value),
    LessThanOrEqual(&'a Value),
    GreaterThan(&'a Value),
    GreaterThanOrEqual(&'a Value),
    Between(&'a Value, &'a Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(expr: &str) -> Path {
        Path::parse(expr).unwrap()
    }

    fn person() -> Value {
        Value::record([
            ("name", Value::from("Ada")),
            ("age", Value::Integer(36)),
            ("nick", Value::Null),
            (
                "scores",
                Value::Array(vec![Value::Integer(3), Value::Integer(5)]),
            ),
        ])
    }

    fn check(m: Matchmaker) -> bool {
        m.matches(&person()).unwrap()
    }

    #[test]
    fn comparisons_require_same_kind() {
        assert!(check(Matchmaker::equal(p("age"), 36)));
        assert!(check(Matchmaker::less_than(p("age"), 40)));
        assert!(!check(Matchmaker::less_than(p("age"), 40.0)));
        assert!(!check(Matchmaker::less_than(p("missing"), 40)));
        assert!(check(Matchmaker::between(p("age"), 36, 36)));
        assert!(!check(Matchmaker::not_equal(p("age"), "36")));
        assert!(check(Matchmaker::not_equal(p("age"), 35)));
        assert!(check(Matchmaker::greater_than_or_equal(p("name"), "Ad")));
    }

    #[test]
    fn equal_on_collection_matches_any_element() {
        assert!(check(Matchmaker::equal(p("scores"), 5)));
        assert!(!check(Matchmaker::equal(p("scores"), 4)));
        assert!(check(Matchmaker::equal(p("nick"), Value::Null)));
        assert!(!check(Matchmaker::equal(p("missing"), Value::Null)));
    }

    #[test]
    fn element_of() {
        let set = |items: Vec<Value>| items;
        assert!(!check(Matchmaker::ElementOf(p("age"), Vec::new())));
        assert!(check(Matchmaker::ElementOf(
            p("age"),
            set(vec![Value::Integer(1), Value::Integer(36)])
        )));
        assert!(check(Matchmaker::ElementOf(
            p("scores"),
            set(vec![Value::Integer(3), Value::Integer(5), Value::Integer(7)])
        )));
        assert!(!check(Matchmaker::ElementOf(
            p("scores"),
            set(vec![Value::Integer(3)])
        )));
        assert!(!check(Matchmaker::ElementOf(p("nick"), set(vec![Value::Integer(3)]))));
        assert!(check(Matchmaker::ElementOf(p("nick"), set(vec![Value::Null]))));
        assert!(!check(Matchmaker::ElementOf(p("missing"), set(vec![Value::Null]))));
    }

    #[test]
    fn all_not_equal_and_all_less_than() {
        assert!(check(Matchmaker::AllNotEqual(p("scores"), Value::Integer(4))));
        assert!(!check(Matchmaker::AllNotEqual(p("scores"), Value::Integer(5))));
        assert!(check(Matchmaker::AllNotEqual(p("nick"), Value::Integer(1))));
        assert!(check(Matchmaker::AllNotEqual(p("missing"), Value::Integer(1))));

        assert!(check(Matchmaker::AllLessThan(p("scores"), Value::Integer(6))));
        assert!(!check(Matchmaker::AllLessThan(p("scores"), Value::Integer(5))));
        assert!(!check(Matchmaker::AllLessThan(p("nick"), Value::Integer(6))));
        assert!(!check(Matchmaker::AllLessThan(p("missing"), Value::Integer(6))));
        assert!(!check(Matchmaker::AllLessThan(p("scores"), Value::from("z"))));
    }

    #[test]
    fn for_all_resolves_against_elements() {
        let positive = Matchmaker::greater_than(Path::root(), 0);
        assert!(check(Matchmaker::ForAll(p("scores"), Box::new(positive.clone()))));
        let big = Matchmaker::greater_than(Path::root(), 4);
        assert!(!check(Matchmaker::ForAll(p("scores"), Box::new(big))));
        assert!(!check(Matchmaker::ForAll(p("missing"), Box::new(positive.clone()))));

        let is_null = Matchmaker::equal(Path::root(), Value::Null);
        assert!(check(Matchmaker::ForAll(p("nick"), Box::new(is_null))));
        assert!(!check(Matchmaker::ForAll(p("nick"), Box::new(positive))));
    }

    #[test]
    fn exists_distinguishes_null_from_missing() {
        assert!(check(Matchmaker::Exists(p("nick"))));
        assert!(!check(Matchmaker::Exists(p("missing"))));
    }

    #[test]
    fn regex_is_a_full_match() {
        assert!(check(Matchmaker::Regex(p("name"), "A.a".into())));
        assert!(!check(Matchmaker::Regex(p("name"), "A".into())));
        assert!(!check(Matchmaker::Regex(p("age"), "3.*".into())));
        assert!(Matchmaker::Regex(p("name"), "(".into())
            .matches(&person())
            .is_err());
    }

    #[test]
    fn combinators() {
        let adult = Matchmaker::greater_than_or_equal(p("age"), 18);
        let named_bob = Matchmaker::equal(p("name"), "Bob");
        assert!(check(Matchmaker::Or(vec![named_bob.clone(), adult.clone()])));
        assert!(!check(Matchmaker::And(vec![named_bob.clone(), adult])));
        assert!(check(named_bob.negate()));
    }
}
