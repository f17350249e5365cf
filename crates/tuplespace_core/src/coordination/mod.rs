//! Coordinators: pluggable indexing and selection strategies.
//!
//! A container owns a set of named coordinators. Every written entry is
//! registered with the container's obligatory coordinators and with any
//! optional coordinator the write supplies data for (implicit
//! coordinators supply their own default data). Selection runs a chain
//! of [`Selector`]s; the first selector checks accessibility of its
//! candidates, later selectors narrow the predecessor's result.
//!
//! Available coordinators:
//!
//! | Kind | Data | Implicit |
//! |---|---|---|
//! | any | none | yes |
//! | fifo / lifo | none | yes |
//! | key | unique key | no |
//! | label | labels | no |
//! | linda | none | yes |
//! | query | none | yes |
//! | vector | position | no |
//! | random | none | yes |
//! | type | none | yes |
//! | auth_target | none | yes |
//! | noop | ignored | yes |

mod any;
mod auth_target;
mod label;
mod linda;
mod noop;
pub mod query;
mod queue;
mod random;
mod registry;
mod selection;
mod selector;
mod typed;
mod vector;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::container::Entry;
use crate::error::CoreResult;
use crate::isolation::{LockTable, LockTarget};
use crate::types::{ContainerId, EntryId};

pub use any::AnyCoordinator;
pub use auth_target::AuthTargetCoordinator;
pub use label::LabelCoordinator;
pub use linda::{template_matches, LindaCoordinator};
pub use noop::NoOperationCoordinator;
pub use queue::{QueueCoordinator, QueueOrder};
pub use random::RandomCoordinator;
pub use registry::{CoordinatorFactory, CoordinatorRegistry};
pub use selection::{EntryFilter, SelectionContext};
pub use selector::{Count, Criteria, Selector};
pub use typed::TypeCoordinator;
pub use vector::VectorCoordinator;

pub use query::{IndexDefinition, Matchmaker, Query, QueryCoordinator, Stage};

/// The kind of a coordinator, naming the factory that builds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinatorKind {
    /// [`AnyCoordinator`].
    Any,
    /// [`QueueCoordinator`] in FIFO order.
    Fifo,
    /// [`QueueCoordinator`] in LIFO order.
    Lifo,
    /// [`LabelCoordinator`] with unique keys.
    Key,
    /// [`LabelCoordinator`] with multi-valued labels.
    Label,
    /// [`LindaCoordinator`].
    Linda,
    /// [`QueryCoordinator`].
    Query,
    /// [`VectorCoordinator`].
    Vector,
    /// [`RandomCoordinator`].
    Random,
    /// [`TypeCoordinator`].
    Type,
    /// [`AuthTargetCoordinator`].
    AuthTarget,
    /// [`NoOperationCoordinator`].
    NoOperation,
    /// A coordinator supplied through [`CoordinatorRegistry::register`].
    Custom(String),
}

impl CoordinatorKind {
    /// Registry key of this kind; built-in kinds also use it as the
    /// default coordinator name.
    #[must_use]
    pub fn default_name(&self) -> &str {
        match self {
            Self::Any => "any",
            Self::Fifo => "fifo",
            Self::Lifo => "lifo",
            Self::Key => "key",
            Self::Label => "label",
            Self::Linda => "linda",
            Self::Query => "query",
            Self::Vector => "vector",
            Self::Random => "random",
            Self::Type => "type",
            Self::AuthTarget => "auth_target",
            Self::NoOperation => "noop",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for CoordinatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Declarative description of a coordinator, stored with the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSpec {
    /// Factory kind.
    pub kind: CoordinatorKind,
    /// Name, unique within the container.
    pub name: String,
    /// Index definitions (query coordinators only).
    pub indexes: Vec<query::IndexDefinition>,
}

impl CoordinatorSpec {
    /// A coordinator of `kind` under its default name.
    #[must_use]
    pub fn new(kind: CoordinatorKind) -> Self {
        Self {
            name: kind.default_name().to_string(),
            kind,
            indexes: Vec::new(),
        }
    }

    /// Renames the coordinator.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds an index definition.
    #[must_use]
    pub fn with_index(mut self, index: query::IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Position of a vector write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorIndex {
    /// Insert at this position, shifting later entries.
    At(usize),
    /// Append after the last position.
    Append,
}

/// Data a write supplies to one coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinationPayload {
    /// No data (order- and content-based coordinators).
    Empty,
    /// A unique key.
    Key(String),
    /// One or more labels.
    Labels(Vec<String>),
    /// A vector position.
    Vector(VectorIndex),
}

/// Coordination data addressed to a named coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoordinationData {
    /// Target coordinator name.
    pub coordinator: String,
    /// The data.
    pub payload: CoordinationPayload,
}

impl CoordinationData {
    /// Creates coordination data for the coordinator called `coordinator`.
    #[must_use]
    pub fn new(coordinator: impl Into<String>, payload: CoordinationPayload) -> Self {
        Self {
            coordinator: coordinator.into(),
            payload,
        }
    }

    /// Key data for the default key coordinator.
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self::new("key", CoordinationPayload::Key(key.into()))
    }

    /// Label data for the default label coordinator.
    #[must_use]
    pub fn label(label: impl Into<String>) -> Self {
        Self::new("label", CoordinationPayload::Labels(vec![label.into()]))
    }

    /// Several labels for the default label coordinator.
    #[must_use]
    pub fn labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            "label",
            CoordinationPayload::Labels(labels.into_iter().map(Into::into).collect()),
        )
    }

    /// Vector data for the default vector coordinator.
    #[must_use]
    pub fn vector(index: VectorIndex) -> Self {
        Self::new("vector", CoordinationPayload::Vector(index))
    }

    /// Empty data for the default coordinator of `kind`.
    #[must_use]
    pub fn empty(kind: &CoordinatorKind) -> Self {
        Self::new(kind.default_name(), CoordinationPayload::Empty)
    }

    /// Retargets the data at the coordinator called `name`.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.coordinator = name.into();
        self
    }
}

/// Isolation queries available to coordinators during registration.
#[derive(Debug, Clone, Copy)]
pub struct RegisterContext<'a> {
    locks: &'a LockTable,
    container: ContainerId,
    restoring: bool,
}

impl<'a> RegisterContext<'a> {
    /// Creates a context for registering into `container`.
    #[must_use]
    pub fn new(locks: &'a LockTable, container: ContainerId) -> Self {
        Self {
            locks,
            container,
            restoring: false,
        }
    }

    /// Marks registration of restored entries, which never conflict.
    #[must_use]
    pub fn restoring(mut self) -> Self {
        self.restoring = true;
        self
    }

    /// Returns true while restoring persisted entries.
    #[must_use]
    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    /// Returns true if `new` may replace `base` under the same key or
    /// position: `base` is being taken by the transaction writing `new`.
    #[must_use]
    pub fn is_valid_overwrite(&self, base: EntryId, new: EntryId) -> bool {
        self.locks.is_valid_overwrite(
            LockTarget::Entry(self.container, base),
            LockTarget::Entry(self.container, new),
        )
    }
}

/// A pluggable indexing and selection strategy for one container.
///
/// Coordinators guard their own indexes; the container keeps
/// registration consistent across coordinators.
pub trait Coordinator: Send + Sync + fmt::Debug {
    /// Name, unique within the container.
    fn name(&self) -> &str;

    /// Kind of the coordinator.
    fn kind(&self) -> CoordinatorKind;

    /// Returns true if the coordinator supplies default data when a
    /// write omits it.
    fn is_implicit(&self) -> bool {
        true
    }

    /// Default data for implicit registration.
    fn default_payload(&self) -> CoordinationPayload {
        CoordinationPayload::Empty
    }

    /// Returns true if structural changes need the coordinator lock.
    fn needs_structure_lock(&self) -> bool {
        false
    }

    /// Adds an entry to the coordinator's indexes.
    ///
    /// # Errors
    ///
    /// Fails if the payload does not fit the coordinator, the entry value
    /// does not fit, or a key is taken.
    fn register(
        &self,
        entry: &Arc<Entry>,
        payload: &CoordinationPayload,
        ctx: &RegisterContext<'_>,
    ) -> CoreResult<()>;

    /// Removes an entry from every index. Returns true if it was present.
    fn unregister(&self, entry: EntryId) -> bool;

    /// Returns true if the entry is registered.
    fn contains(&self, entry: EntryId) -> bool;

    /// Number of registered entries, visible or not.
    fn len(&self) -> usize;

    /// Returns true if no entry is registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Selects entries.
    ///
    /// `input` is the predecessor's result for a non-first selector.
    ///
    /// # Errors
    ///
    /// Fails with count-not-met, entry-locked, access-denied or
    /// invalid-selector errors.
    fn select(
        &self,
        selector: &Selector,
        input: Option<Vec<Arc<Entry>>>,
        ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>>;
}

pub(crate) fn unsupported(coordinator: &str, selector: &Selector) -> crate::error::CoreError {
    crate::error::CoreError::invalid_selector(format!(
        "coordinator {coordinator} cannot answer {:?}",
        selector.criteria
    ))
}

pub(crate) fn unexpected_payload(
    coordinator: &str,
    payload: &CoordinationPayload,
) -> crate::error::CoreError {
    crate::error::CoreError::invalid_operation(format!(
        "coordinator {coordinator} cannot use {payload:?}"
    ))
}
