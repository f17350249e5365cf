//! Factories turning coordinator specs into coordinators.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::coordination::{
    AnyCoordinator, AuthTargetCoordinator, Coordinator, CoordinatorKind, CoordinatorSpec,
    LabelCoordinator, LindaCoordinator, NoOperationCoordinator, QueryCoordinator,
    QueueCoordinator, QueueOrder, RandomCoordinator, TypeCoordinator, VectorCoordinator,
};
use crate::error::{CoreError, CoreResult};

/// Builds a coordinator from its spec.
pub type CoordinatorFactory =
    Arc<dyn Fn(&CoordinatorSpec) -> CoreResult<Arc<dyn Coordinator>> + Send + Sync>;

/// Coordinator factories by kind name.
///
/// The default registry knows every built-in kind; custom kinds are
/// added with [`register`](Self::register) and referenced through
/// [`CoordinatorKind::Custom`].
#[derive(Clone)]
pub struct CoordinatorRegistry {
    factories: HashMap<String, CoordinatorFactory>,
}

fn builtin(kind: CoordinatorKind) -> CoordinatorFactory {
    Arc::new(move |spec: &CoordinatorSpec| {
        let name = spec.name.clone();
        let coordinator: Arc<dyn Coordinator> = match &kind {
            CoordinatorKind::Any => Arc::new(AnyCoordinator::new(name)),
            CoordinatorKind::Fifo => Arc::new(QueueCoordinator::new(name, QueueOrder::Fifo)),
            CoordinatorKind::Lifo => Arc::new(QueueCoordinator::new(name, QueueOrder::Lifo)),
            CoordinatorKind::Key => Arc::new(LabelCoordinator::keys(name)),
            CoordinatorKind::Label => Arc::new(LabelCoordinator::labels(name)),
            CoordinatorKind::Linda => Arc::new(LindaCoordinator::new(name)),
            CoordinatorKind::Query => Arc::new(QueryCoordinator::new(name, spec.indexes.clone())),
            CoordinatorKind::Vector => Arc::new(VectorCoordinator::new(name)),
            CoordinatorKind::Random => Arc::new(RandomCoordinator::new(name)),
            CoordinatorKind::Type => Arc::new(TypeCoordinator::new(name)),
            CoordinatorKind::AuthTarget => Arc::new(AuthTargetCoordinator::new(name)),
            CoordinatorKind::NoOperation => Arc::new(NoOperationCoordinator::new(name)),
            CoordinatorKind::Custom(other) => {
                return Err(CoreError::coordinator_not_registered(other.clone()))
            }
        };
        Ok(coordinator)
    })
}

impl CoordinatorRegistry {
    /// Creates a registry with every built-in kind.
    #[must_use]
    pub fn new() -> Self {
        let factories = [
            CoordinatorKind::Any,
            CoordinatorKind::Fifo,
            CoordinatorKind::Lifo,
            CoordinatorKind::Key,
            CoordinatorKind::Label,
            CoordinatorKind::Linda,
            CoordinatorKind::Query,
            CoordinatorKind::Vector,
            CoordinatorKind::Random,
            CoordinatorKind::Type,
            CoordinatorKind::AuthTarget,
            CoordinatorKind::NoOperation,
        ]
        .into_iter()
        .map(|kind| (kind.default_name().to_string(), builtin(kind)))
        .collect();
        Self { factories }
    }

    /// Adds or replaces the factory for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: CoordinatorFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Returns true if a factory exists for `kind`.
    #[must_use]
    pub fn contains(&self, kind: &CoordinatorKind) -> bool {
        self.factories.contains_key(kind.default_name())
    }

    /// Builds the coordinator described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorNotRegistered` for an unknown kind, or the
    /// factory's error.
    pub fn create(&self, spec: &CoordinatorSpec) -> CoreResult<Arc<dyn Coordinator>> {
        let factory = self
            .factories
            .get(spec.kind.default_name())
            .ok_or_else(|| CoreError::coordinator_not_registered(spec.kind.to_string()))?;
        factory(spec)
    }
}

impl Default for CoordinatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CoordinatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("CoordinatorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_builtin_kinds() {
        let registry = CoordinatorRegistry::new();
        let fifo = registry
            .create(&CoordinatorSpec::new(CoordinatorKind::Fifo).named("jobs"))
            .unwrap();
        assert_eq!(fifo.name(), "jobs");
        assert_eq!(fifo.kind(), CoordinatorKind::Fifo);

        let key = registry.create(&CoordinatorSpec::new(CoordinatorKind::Key)).unwrap();
        assert!(!key.is_implicit());
    }

    #[test]
    fn custom_kinds_need_a_factory() {
        let mut registry = CoordinatorRegistry::new();
        let spec = CoordinatorSpec::new(CoordinatorKind::Custom("mine".into()));
        assert!(matches!(
            registry.create(&spec),
            Err(CoreError::CoordinatorNotRegistered { .. })
        ));

        registry.register(
            "mine",
            Arc::new(|spec: &CoordinatorSpec| {
                Ok(Arc::new(AnyCoordinator::new(spec.name.clone())) as Arc<dyn Coordinator>)
            }),
        );
        assert!(registry.contains(&spec.kind));
        assert_eq!(registry.create(&spec).unwrap().name(), "mine");
    }
}
