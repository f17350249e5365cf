//! Container definitions and their persisted descriptors.

use serde::{Deserialize, Serialize};

use crate::coordination::{CoordinatorKind, CoordinatorSpec};
use crate::types::ContainerId;

/// What a create-container request asks for.
///
/// Without an obligatory coordinator the container gets an `any`
/// coordinator.
///
/// ```
/// use tuplespace_core::{ContainerDefinition, CoordinatorKind, CoordinatorSpec};
///
/// let def = ContainerDefinition::named("jobs")
///     .size(100)
///     .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo))
///     .optional(CoordinatorSpec::new(CoordinatorKind::Label));
/// assert_eq!(def.name.as_deref(), Some("jobs"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    /// Unique name, if any.
    pub name: Option<String>,
    /// Maximum number of entries; `None` is unbounded.
    pub size: Option<usize>,
    /// Coordinators every write must register with.
    pub obligatory: Vec<CoordinatorSpec>,
    /// Coordinators a write registers with when it supplies data or the
    /// coordinator is implicit.
    pub optional: Vec<CoordinatorSpec>,
}

impl ContainerDefinition {
    /// An unnamed, unbounded container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An unbounded container called `name`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Bounds the container.
    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Adds an obligatory coordinator.
    #[must_use]
    pub fn obligatory(mut self, spec: CoordinatorSpec) -> Self {
        self.obligatory.push(spec);
        self
    }

    /// Adds an optional coordinator.
    #[must_use]
    pub fn optional(mut self, spec: CoordinatorSpec) -> Self {
        self.optional.push(spec);
        self
    }

    pub(crate) fn into_descriptor(mut self, id: ContainerId) -> ContainerDescriptor {
        if self.obligatory.is_empty() {
            self.obligatory.push(CoordinatorSpec::new(CoordinatorKind::Any));
        }
        ContainerDescriptor {
            id,
            name: self.name,
            size: self.size,
            obligatory: self.obligatory,
            optional: self.optional,
        }
    }
}

/// Everything needed to rebuild an empty container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Container id.
    pub id: ContainerId,
    /// Unique name, if any.
    pub name: Option<String>,
    /// Size limit.
    pub size: Option<usize>,
    /// Obligatory coordinators, never empty.
    pub obligatory: Vec<CoordinatorSpec>,
    /// Optional coordinators.
    pub optional: Vec<CoordinatorSpec>,
}

impl ContainerDescriptor {
    /// All coordinator specs, obligatory first.
    pub fn coordinators(&self) -> impl Iterator<Item = (&CoordinatorSpec, bool)> {
        self.obligatory
            .iter()
            .map(|s| (s, true))
            .chain(self.optional.iter().map(|s| (s, false)))
    }

    /// Name for messages: the container name, or its id.
    #[must_use]
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_is_the_default_obligatory_coordinator() {
        let d = ContainerDefinition::new().into_descriptor(ContainerId::new(4));
        assert_eq!(d.obligatory, [CoordinatorSpec::new(CoordinatorKind::Any)]);
        assert_eq!(d.label(), "cnt:4");
    }

    #[test]
    fn explicit_obligatory_coordinators_are_kept() {
        let d = ContainerDefinition::named("q")
            .obligatory(CoordinatorSpec::new(CoordinatorKind::Fifo))
            .optional(CoordinatorSpec::new(CoordinatorKind::Key))
            .into_descriptor(ContainerId::new(1));
        let kinds: Vec<_> = d.coordinators().map(|(s, o)| (s.kind.clone(), o)).collect();
        assert_eq!(
            kinds,
            [(CoordinatorKind::Fifo, true), (CoordinatorKind::Key, false)]
        );
        assert_eq!(d.label(), "q");
    }
}
