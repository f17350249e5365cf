//! Access control for requests and the entries they touch.

use std::fmt;

use tuplespace_codec::Value;

use crate::container::{ContainerDescriptor, Entry};
use crate::context::RequestContext;
use crate::coordination::template_matches;
use crate::isolation::SubTransaction;
use crate::runtime::OperationKind;

/// Decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// The request may proceed.
    Permitted,
    /// A rule forbids the request.
    Denied,
    /// No rule applies.
    NotApplicable,
    /// The decision could not be made.
    Indeterminate,
}

impl AuthorizationResult {
    /// Only `Permitted` lets a request through.
    #[must_use]
    pub const fn is_permitted(self) -> bool {
        matches!(self, Self::Permitted)
    }
}

/// Decides whether requests may run and which entries they see.
pub trait AccessManager: Send + Sync {
    /// Decides whether `operation` may run on `container`. `container` is
    /// `None` for operations that do not target one.
    fn check_permissions(
        &self,
        container: Option<&ContainerDescriptor>,
        operation: OperationKind,
        stx: &SubTransaction,
        ctx: &RequestContext,
    ) -> AuthorizationResult;

    /// Decides whether a permitted request may see or write `entry`.
    fn permits_entry(
        &self,
        _container: &ContainerDescriptor,
        _operation: OperationKind,
        _ctx: &RequestContext,
        _entry: &Entry,
    ) -> bool {
        true
    }
}

/// Effect of a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Allow.
    Permit,
    /// Forbid. Wins over any permit.
    Deny,
}

/// One access rule. `None` fields match anything.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRule {
    /// Requesting subject.
    pub subject: Option<String>,
    /// Container name.
    pub container: Option<String>,
    /// Operation.
    pub operation: Option<OperationKind>,
    /// Restricts the rule to entries matching this template.
    pub entry_template: Option<Value>,
    /// What a match means.
    pub effect: Effect,
}

impl AccessRule {
    /// A rule permitting everything.
    #[must_use]
    pub fn permit() -> Self {
        Self {
            subject: None,
            container: None,
            operation: None,
            entry_template: None,
            effect: Effect::Permit,
        }
    }

    /// A rule denying everything.
    #[must_use]
    pub fn deny() -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::permit()
        }
    }

    /// Restricts the rule to a subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Restricts the rule to a container name.
    #[must_use]
    pub fn container(mut self, name: impl Into<String>) -> Self {
        self.container = Some(name.into());
        self
    }

    /// Restricts the rule to an operation.
    #[must_use]
    pub fn operation(mut self, operation: OperationKind) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Restricts the rule to entries matching `template`.
    #[must_use]
    pub fn entries(mut self, template: impl Into<Value>) -> Self {
        self.entry_template = Some(template.into());
        self
    }

    fn applies(
        &self,
        container: Option<&ContainerDescriptor>,
        operation: OperationKind,
        ctx: &RequestContext,
    ) -> bool {
        let subject = match &self.subject {
            Some(s) => ctx.subject.as_deref() == Some(s.as_str()),
            None => true,
        };
        let target = match &self.container {
            Some(name) => container.and_then(|c| c.name.as_deref()) == Some(name.as_str()),
            None => true,
        };
        subject && target && self.operation.map_or(true, |op| op == operation)
    }
}

/// Evaluates an in-memory rule list with deny-overrides.
///
/// A request is denied by a matching deny rule without an entry template
/// and permitted by any other matching permit rule. Entry templates only
/// narrow which entries a permitted request sees.
///
/// ```
/// use tuplespace_core::{AccessRule, OperationKind, RuleAccessManager};
///
/// let access = RuleAccessManager::new(vec![
///     AccessRule::permit().subject("alice"),
///     AccessRule::deny().subject("alice").operation(OperationKind::DestroyContainer),
/// ]);
/// assert_eq!(access.rules().len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct RuleAccessManager {
    rules: Vec<AccessRule>,
}

impl RuleAccessManager {
    /// Creates a manager over `rules`.
    #[must_use]
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    /// The rules.
    #[must_use]
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    fn matching<'a>(
        &'a self,
        container: Option<&'a ContainerDescriptor>,
        operation: OperationKind,
        ctx: &'a RequestContext,
    ) -> impl Iterator<Item = &'a AccessRule> + 'a {
        self.rules
            .iter()
            .filter(move |r| r.applies(container, operation, ctx))
    }
}

impl AccessManager for RuleAccessManager {
    fn check_permissions(
        &self,
        container: Option<&ContainerDescriptor>,
        operation: OperationKind,
        _stx: &SubTransaction,
        ctx: &RequestContext,
    ) -> AuthorizationResult {
        let mut permitted = false;
        for rule in self.matching(container, operation, ctx) {
            match rule.effect {
                Effect::Deny if rule.entry_template.is_none() => {
                    return AuthorizationResult::Denied
                }
                Effect::Deny => {}
                Effect::Permit => permitted = true,
            }
        }
        if permitted {
            AuthorizationResult::Permitted
        } else {
            AuthorizationResult::NotApplicable
        }
    }

    fn permits_entry(
        &self,
        container: &ContainerDescriptor,
        operation: OperationKind,
        ctx: &RequestContext,
        entry: &Entry,
    ) -> bool {
        let mut permitted = false;
        for rule in self.matching(Some(container), operation, ctx) {
            let covers = rule
                .entry_template
                .as_ref()
                .map_or(true, |t| template_matches(t, entry.value()));
            match rule.effect {
                Effect::Deny if rule.entry_template.is_some() && covers => return false,
                Effect::Permit if covers => permitted = true,
                _ => {}
            }
        }
        permitted
    }
}

impl fmt::Debug for RuleAccessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleAccessManager")
            .field("rules", &self.rules.len())
            .finish()
    }
}
