//! Dynamic entry value type.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A dynamic value stored as the payload of a tuplespace entry.
///
/// Values form a small self-describing tree. Every value carries a
/// [`ValueKind`] tag which decides whether two values can be compared
/// with [`Value::natural_cmp`].
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value. Acts as a wildcard inside templates.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// Double precision float.
    Float(f64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs.
    Map(Vec<(Value, Value)>),
}

/// The kind tag of a [`Value`].
///
/// Kinds replace runtime type inspection: comparability and collection
/// semantics are decided from the tag alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// `Value::Null`.
    Null,
    /// `Value::Bool`.
    Bool,
    /// `Value::Integer`.
    Integer,
    /// `Value::Float`.
    Float,
    /// `Value::Bytes`.
    Bytes,
    /// `Value::Text`.
    Text,
    /// `Value::Array`.
    Array,
    /// `Value::Map`.
    Map,
}

impl ValueKind {
    /// All kinds in declaration order.
    pub const ALL: [ValueKind; 8] = [
        ValueKind::Null,
        ValueKind::Bool,
        ValueKind::Integer,
        ValueKind::Float,
        ValueKind::Bytes,
        ValueKind::Text,
        ValueKind::Array,
        ValueKind::Map,
    ];

    /// Stable name of this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Bytes => "bytes",
            ValueKind::Text => "text",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
        }
    }

    /// Returns true if values of this kind have a natural ordering.
    #[must_use]
    pub const fn is_comparable(self) -> bool {
        matches!(
            self,
            ValueKind::Bool
                | ValueKind::Integer
                | ValueKind::Float
                | ValueKind::Bytes
                | ValueKind::Text
        )
    }

    /// Returns true if values of this kind are element collections.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, ValueKind::Array)
    }

    /// Parses a kind from its [`name`](Self::name).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Create a map value with keys sorted by [`Value::index_cmp`].
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.index_cmp(&b.0));
        Value::Map(pairs)
    }

    /// Create a map value with text keys.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::map(
            fields
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v))
                .collect(),
        )
    }

    /// Returns the kind tag of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Text(_) => ValueKind::Text,
            Value::Array(_) => ValueKind::Array,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Compare two values using their natural ordering.
    ///
    /// Returns `None` when the kinds differ or the kind has no natural
    /// ordering. Integers and floats are distinct kinds and never compare.
    /// Floats use the IEEE 754 total order: `-0.0 < 0.0`, and NaNs sort
    /// beyond the infinities by sign and payload.
    pub fn natural_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(a.total_cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total ordering used by ordered indexes over mixed kinds.
    ///
    /// Same-kind comparable values use their natural order and equal
    /// values compare equal. Anything else is ordered by kind name and
    /// then by hash, with hash ties treated as equal. Indexes should be
    /// restricted to a single kind; this order only keeps mixed keys
    /// from corrupting the structure.
    pub fn index_cmp(&self, other: &Self) -> Ordering {
        if let Some(ord) = self.natural_cmp(other) {
            return ord;
        }
        if self == other {
            return Ordering::Equal;
        }
        let by_name = self.kind().name().cmp(other.kind().name());
        if by_name != Ordering::Equal {
            return by_name;
        }
        self.hash_code().cmp(&other.hash_code())
    }

    /// Stable 64-bit hash of this value.
    #[must_use]
    pub fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, if it is one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a text key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up an element of this array value.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.as_array().and_then(|items| items.get(index))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Integer(n) => n.hash(state),
            Value::Float(n) => n.to_bits().hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Text(s) => s.hash(state),
            Value::Array(items) => items.hash(state),
            Value::Map(pairs) => pairs.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bytes(b) => write!(f, "h'{}'", hex(b)),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keys_are_sorted() {
        let map = Value::record([
            ("z", Value::Integer(1)),
            ("a", Value::Integer(2)),
            ("m", Value::Integer(3)),
        ]);

        let pairs = map.as_map().unwrap();
        assert_eq!(pairs[0].0, Value::from("a"));
        assert_eq!(pairs[1].0, Value::from("m"));
        assert_eq!(pairs[2].0, Value::from("z"));
    }

    #[test]
    fn natural_cmp_same_kind() {
        assert_eq!(
            Value::Integer(1).natural_cmp(&Value::Integer(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::from("b").natural_cmp(&Value::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Float(1.5).natural_cmp(&Value::Float(1.5)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn natural_cmp_rejects_mixed_kinds() {
        assert_eq!(Value::Integer(1).natural_cmp(&Value::Float(1.0)), None);
        assert_eq!(Value::Null.natural_cmp(&Value::Null), None);
        assert_eq!(
            Value::Array(vec![]).natural_cmp(&Value::Array(vec![])),
            None
        );
    }

    #[test]
    fn floats_are_totally_ordered() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan.natural_cmp(&Value::Float(1.0)), Some(Ordering::Greater));
        assert_eq!(
            Value::Float(-f64::NAN).natural_cmp(&Value::Float(f64::NEG_INFINITY)),
            Some(Ordering::Less)
        );
        assert_eq!(nan.natural_cmp(&nan), Some(Ordering::Equal));
        assert_eq!(
            Value::Float(-0.0).natural_cmp(&Value::Float(0.0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Float(-0.0).index_cmp(&Value::Float(0.0)),
            Ordering::Less
        );
    }

    #[test]
    fn index_cmp_orders_by_kind_name() {
        // "float" < "integer" < "text"
        let mut values = vec![
            Value::from("x"),
            Value::Integer(3),
            Value::Float(9.0),
            Value::Integer(1),
        ];
        values.sort_by(Value::index_cmp);
        assert_eq!(
            values,
            vec![
                Value::Float(9.0),
                Value::Integer(1),
                Value::Integer(3),
                Value::from("x"),
            ]
        );
    }

    #[test]
    fn index_cmp_equal_incomparables() {
        let a = Value::Array(vec![Value::Integer(1)]);
        let b = Value::Array(vec![Value::Integer(1)]);
        let c = Value::Array(vec![Value::Integer(2)]);
        assert_eq!(a.index_cmp(&b), Ordering::Equal);
        assert_ne!(a.index_cmp(&c), Ordering::Equal);
        assert_eq!(a.index_cmp(&c), c.index_cmp(&a).reverse());
    }

    #[test]
    fn kind_tags() {
        assert_eq!(Value::Null.kind(), ValueKind::Null);
        assert_eq!(Value::from(1.0).kind(), ValueKind::Float);
        assert!(ValueKind::Text.is_comparable());
        assert!(!ValueKind::Map.is_comparable());
        assert!(ValueKind::Array.is_collection());
        assert_eq!(ValueKind::from_name("bytes"), Some(ValueKind::Bytes));
        assert_eq!(ValueKind::from_name("nope"), None);
    }

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());

        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_bool(), None);
        assert_eq!(Value::Integer(42).as_integer(), Some(42));
        assert_eq!(Value::Float(0.5).as_float(), Some(0.5));
        assert_eq!(Value::from("hello").as_text(), Some("hello"));
        assert_eq!(Value::Bytes(vec![1, 2, 3]).as_bytes(), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn map_get_and_index() {
        let map = Value::record([
            ("name", Value::from("Alice")),
            ("tags", Value::from(vec![Value::from("a"), Value::from("b")])),
        ]);

        assert_eq!(map.get("name"), Some(&Value::from("Alice")));
        assert_eq!(map.get("missing"), None);
        assert_eq!(
            map.get("tags").and_then(|t| t.get_index(1)),
            Some(&Value::from("b"))
        );
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(
            Value::Float(2.0).hash_code(),
            Value::Float(2.0).hash_code()
        );
    }

    #[test]
    fn display_is_readable() {
        let v = Value::record([("seat", Value::Integer(10)), ("row", Value::Null)]);
        assert_eq!(v.to_string(), "{\"row\": null, \"seat\": 10}");
    }

    #[test]
    fn option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
    }
}
