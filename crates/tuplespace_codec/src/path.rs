//! Property paths into structured values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Text key of a map.
    Key(String),
    /// Position in an array.
    Index(usize),
}

/// A path into a value: a sequence of map keys and array indices.
///
/// The empty path designates the value itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Path {
    segments: Vec<PathSegment>,
}

/// Outcome of resolving a [`Path`] against a value.
///
/// `NoPathMatch` is distinct from a resolved `Null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The path exists and leads to this value.
    Found(Value),
    /// Some segment of the path does not exist.
    NoPathMatch,
}

impl Resolved {
    /// Returns the found value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Resolved::Found(v) => Some(v),
            Resolved::NoPathMatch => None,
        }
    }
}

impl Path {
    /// The path designating the whole value.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Creates a path from segments.
    #[must_use]
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Parses a dotted path such as `"address.lines.0"`.
    ///
    /// Segments made only of digits are array indices. `"*"` and the
    /// empty string parse to the root path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for empty segments like `"a..b"`.
    pub fn parse(expr: &str) -> CodecResult<Self> {
        if expr.is_empty() || expr == "*" {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for part in expr.split('.') {
            if part.is_empty() {
                return Err(CodecError::invalid_path(expr));
            }
            let segment = if part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse::<usize>()
                    .map(PathSegment::Index)
                    .map_err(|_| CodecError::invalid_path(expr))?
            } else {
                PathSegment::Key(part.to_string())
            };
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns true if this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Walks the path and borrows the target, if present.
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(key) => current.get(key)?,
                PathSegment::Index(i) => current.get_index(*i)?,
            };
        }
        Some(current)
    }

    /// Resolves the path against a value.
    pub fn resolve(&self, value: &Value) -> Resolved {
        match self.lookup(value) {
            Some(v) => Resolved::Found(v.clone()),
            None => Resolved::NoPathMatch,
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("*");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Key(k) => f.write_str(k)?,
                PathSegment::Index(n) => write!(f, "{n}")?,
            }
        }
        Ok(())
    }
}
