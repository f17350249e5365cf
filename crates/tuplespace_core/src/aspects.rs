//! Interception hooks around operations and transaction finishes.
//!
//! An [`Aspect`] is registered space-wide or for one container. Before an
//! operation runs, every interested aspect's `pre` hook is consulted;
//! after it succeeded, every `post` hook sees the affected entries.
//! Space-wide aspects run before container aspects, each group in
//! registration order. The first result other than `Ok` or
//! `OkWithEvents` ends the chain.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::container::Entry;
use crate::context::RequestContext;
use crate::error::CoreError;
use crate::runtime::OperationKind;
use crate::types::{AspectId, ContainerId, TransactionId};
use crate::wait::EventCategory;

/// What an intercepted call is about.
#[derive(Debug, Clone, Copy)]
pub struct AspectCall<'a> {
    /// The intercepted operation.
    pub kind: OperationKind,
    /// Target container, if the operation names one.
    pub container: Option<ContainerId>,
    /// Transaction the operation runs in.
    pub transaction: TransactionId,
    /// The request's context.
    pub context: &'a RequestContext,
}

/// Verdict of a hook.
#[derive(Debug)]
pub enum AspectResult {
    /// Continue.
    Ok,
    /// Fail the operation with this error.
    NotOk(CoreError),
    /// Park the operation until entries are inserted or removed.
    Reschedule,
    /// Do not run the operation and report it as skipped. Only meaningful
    /// in `pre`.
    Skip,
    /// Continue and fire these event categories when the operation
    /// finishes.
    OkWithEvents(Vec<EventCategory>),
}

impl AspectResult {
    fn continues(&self) -> bool {
        matches!(self, Self::Ok | Self::OkWithEvents(_))
    }
}

/// A hook run around operations.
///
/// ```
/// use std::sync::Arc;
/// use tuplespace_core::{Aspect, AspectCall, AspectResult, CoreError, Entry, OperationKind};
///
/// struct NoTakes;
///
/// impl Aspect for NoTakes {
///     fn intercepts(&self, kind: OperationKind) -> bool {
///         kind == OperationKind::Take
///     }
///
///     fn pre(&self, _call: &AspectCall<'_>) -> AspectResult {
///         AspectResult::NotOk(CoreError::access_denied("takes are disabled"))
///     }
/// }
/// ```
pub trait Aspect: Send + Sync {
    /// Returns true if the hooks should run for `kind`.
    fn intercepts(&self, _kind: OperationKind) -> bool {
        true
    }

    /// Runs before the operation.
    fn pre(&self, _call: &AspectCall<'_>) -> AspectResult {
        AspectResult::Ok
    }

    /// Runs after the operation succeeded, before its sub-transaction
    /// commits.
    fn post(&self, _call: &AspectCall<'_>, _affected: &[Arc<Entry>]) -> AspectResult {
        AspectResult::Ok
    }
}

type Registered = Vec<(AspectId, Arc<dyn Aspect>)>;

#[derive(Default)]
struct Registry {
    next: u64,
    space: Registered,
    containers: HashMap<ContainerId, Registered>,
}

/// Registered aspects.
#[derive(Default)]
pub struct AspectManager {
    registry: RwLock<Registry>,
}

impl AspectManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an aspect for `container`, or space-wide for `None`.
    pub fn add(&self, container: Option<ContainerId>, aspect: Arc<dyn Aspect>) -> AspectId {
        let mut registry = self.registry.write();
        registry.next += 1;
        let id = AspectId::new(registry.next);
        match container {
            Some(c) => registry.containers.entry(c).or_default().push((id, aspect)),
            None => registry.space.push((id, aspect)),
        }
        debug!(aspect = %id, container = ?container, "aspect registered");
        id
    }

    /// Unregisters an aspect. Returns false if it was unknown.
    pub fn remove(&self, id: AspectId) -> bool {
        let mut registry = self.registry.write();
        let before = registry.space.len();
        registry.space.retain(|(a, _)| *a != id);
        let mut removed = registry.space.len() != before;
        registry.containers.retain(|_, list| {
            let before = list.len();
            list.retain(|(a, _)| *a != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        if removed {
            debug!(aspect = %id, "aspect removed");
        }
        removed
    }

    /// Drops every aspect of a container.
    pub fn remove_container(&self, container: ContainerId) {
        self.registry.write().containers.remove(&container);
    }

    /// Number of registered aspects.
    #[must_use]
    pub fn len(&self) -> usize {
        let registry = self.registry.read();
        registry.space.len() + registry.containers.values().map(Vec::len).sum::<usize>()
    }

    /// Returns true if no aspect is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn chain(&self, call: &AspectCall<'_>) -> Vec<Arc<dyn Aspect>> {
        let registry = self.registry.read();
        let scoped = call
            .container
            .and_then(|c| registry.containers.get(&c))
            .into_iter()
            .flatten();
        registry
            .space
            .iter()
            .chain(scoped)
            .filter(|(_, a)| a.intercepts(call.kind))
            .map(|(_, a)| Arc::clone(a))
            .collect()
    }

    /// Runs the `pre` hooks.
    pub fn pre(&self, call: &AspectCall<'_>) -> AspectResult {
        Self::fold(self.chain(call).iter().map(|a| a.pre(call)))
    }

    /// Runs the `post` hooks. `Skip` counts as `Ok` here.
    pub fn post(&self, call: &AspectCall<'_>, affected: &[Arc<Entry>]) -> AspectResult {
        Self::fold(self.chain(call).iter().map(|a| match a.post(call, affected) {
            AspectResult::Skip => AspectResult::Ok,
            other => other,
        }))
    }

    fn fold(results: impl Iterator<Item = AspectResult>) -> AspectResult {
        let mut events = Vec::new();
        for result in results {
            if !result.continues() {
                return result;
            }
            if let AspectResult::OkWithEvents(more) = result {
                events.extend(more);
            }
        }
        if events.is_empty() {
            AspectResult::Ok
        } else {
            events.sort_unstable();
            events.dedup();
            AspectResult::OkWithEvents(events)
        }
    }
}

impl fmt::Debug for AspectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectManager")
            .field("aspects", &self.len())
            .finish()
    }
}
