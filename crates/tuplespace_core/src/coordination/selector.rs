//! Selectors: what an operation asks a coordinator for.

use std::fmt;

use serde::{Deserialize, Serialize};
use tuplespace_codec::{Value, ValueKind};

use crate::coordination::query::Query;
use crate::coordination::CoordinatorKind;

/// How many entries a selector requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Count {
    /// At least this many; the selection returns exactly this many.
    Exactly(usize),
    /// As many as currently accessible. Never fails; locked entries are
    /// skipped.
    Max,
    /// Every match. A locked match fails the selection.
    All,
}

impl Count {
    /// Returns true once `found` entries satisfy a specific count.
    ///
    /// `Max` and `All` are never met early.
    #[must_use]
    pub const fn is_met(self, found: usize) -> bool {
        match self {
            Self::Exactly(n) => found >= n,
            Self::Max | Self::All => false,
        }
    }

    /// Returns true if `found` entries fall short of a specific count.
    #[must_use]
    pub const fn is_short(self, found: usize) -> bool {
        match self {
            Self::Exactly(n) => found < n,
            Self::Max | Self::All => false,
        }
    }

    /// The requested number, zero for `Max` and `All`.
    #[must_use]
    pub const fn requested(self) -> usize {
        match self {
            Self::Exactly(n) => n,
            Self::Max | Self::All => 0,
        }
    }

    /// Returns true for `Max` and `All`.
    #[must_use]
    pub const fn is_special(self) -> bool {
        !matches!(self, Self::Exactly(_))
    }
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "{n}"),
            Self::Max => f.write_str("MAX"),
            Self::All => f.write_str("ALL"),
        }
    }
}

/// Coordinator-specific selection criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Criteria {
    /// Any entries in registration order.
    Any,
    /// Oldest entries first.
    Fifo,
    /// Newest entries first.
    Lifo,
    /// The entry with this unique key.
    Key(String),
    /// Entries with this label.
    Label(String),
    /// Entries matching a template; `Null` matches anything.
    Linda(Value),
    /// Entries selected by a query pipeline.
    Query(Query),
    /// Consecutive entries starting at this vector position.
    Vector(usize),
    /// Entries in random order.
    Random,
    /// Entries whose value has this kind.
    Type(ValueKind),
    /// Authorization rules targeting a subject, resource and action;
    /// `None` matches anything.
    AuthTarget {
        /// Subject of the rule.
        subject: Option<String>,
        /// Resource of the rule.
        resource: Option<String>,
        /// Action of the rule.
        action: Option<String>,
    },
    /// Rejected by every coordinator.
    NoOperation,
}

impl Criteria {
    fn default_coordinator(&self) -> CoordinatorKind {
        match self {
            Self::Any => CoordinatorKind::Any,
            Self::Fifo => CoordinatorKind::Fifo,
            Self::Lifo => CoordinatorKind::Lifo,
            Self::Key(_) => CoordinatorKind::Key,
            Self::Label(_) => CoordinatorKind::Label,
            Self::Linda(_) => CoordinatorKind::Linda,
            Self::Query(_) => CoordinatorKind::Query,
            Self::Vector(_) => CoordinatorKind::Vector,
            Self::Random => CoordinatorKind::Random,
            Self::Type(_) => CoordinatorKind::Type,
            Self::AuthTarget { .. } => CoordinatorKind::AuthTarget,
            Self::NoOperation => CoordinatorKind::NoOperation,
        }
    }
}

/// One link of a selector chain: a coordinator name, criteria and count.
///
/// The constructors target the coordinator's default name; use
/// [`Selector::named`] for a differently named coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Name of the coordinator answering this selector.
    pub coordinator: String,
    /// What to select.
    pub criteria: Criteria,
    /// How many entries to select.
    pub count: Count,
}

impl Selector {
    /// Creates a selector for the default coordinator of `criteria`.
    #[must_use]
    pub fn new(criteria: Criteria, count: Count) -> Self {
        Self {
            coordinator: criteria.default_coordinator().default_name().to_string(),
            criteria,
            count,
        }
    }

    /// Retargets the selector at the coordinator called `name`.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.coordinator = name.into();
        self
    }

    /// Any entries.
    #[must_use]
    pub fn any(count: Count) -> Self {
        Self::new(Criteria::Any, count)
    }

    /// Oldest entries first.
    #[must_use]
    pub fn fifo(count: Count) -> Self {
        Self::new(Criteria::Fifo, count)
    }

    /// Newest entries first.
    #[must_use]
    pub fn lifo(count: Count) -> Self {
        Self::new(Criteria::Lifo, count)
    }

    /// The entry with `key`.
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self::new(Criteria::Key(key.into()), Count::Exactly(1))
    }

    /// Entries labelled `label`.
    #[must_use]
    pub fn label(label: impl Into<String>, count: Count) -> Self {
        Self::new(Criteria::Label(label.into()), count)
    }

    /// Entries matching `template`.
    #[must_use]
    pub fn linda(template: Value, count: Count) -> Self {
        Self::new(Criteria::Linda(template), count)
    }

    /// Entries selected by `query`.
    #[must_use]
    pub fn query(query: Query, count: Count) -> Self {
        Self::new(Criteria::Query(query), count)
    }

    /// Entries starting at vector position `index`.
    #[must_use]
    pub fn vector(index: usize, count: Count) -> Self {
        Self::new(Criteria::Vector(index), count)
    }

    /// Entries in random order.
    #[must_use]
    pub fn random(count: Count) -> Self {
        Self::new(Criteria::Random, count)
    }

    /// Entries whose value is of `kind`.
    #[must_use]
    pub fn of_type(kind: ValueKind, count: Count) -> Self {
        Self::new(Criteria::Type(kind), count)
    }

    /// Authorization rules for a subject, resource and action.
    #[must_use]
    pub fn auth_target(
        subject: Option<&str>,
        resource: Option<&str>,
        action: Option<&str>,
        count: Count,
    ) -> Self {
        Self::new(
            Criteria::AuthTarget {
                subject: subject.map(str::to_string),
                resource: resource.map(str::to_string),
                action: action.map(str::to_string),
            },
            count,
        )
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (count={})", self.coordinator, self.count)
    }
}
