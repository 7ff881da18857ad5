//! Declared access policies
//!
//! These are the schema-level declarations attached to an object type. They
//! are created by DDL and read-only at query time; indexing, inheritance
//! resolution and combination live in `keel-db-policy`.

use crate::expr::Expr;
use std::fmt;

/// Action a policy governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyAction {
    Read,
    Insert,
    Update,
    Delete,
}

impl PolicyAction {
    /// All actions, in a fixed order
    pub const ALL: [PolicyAction; 4] = [
        PolicyAction::Read,
        PolicyAction::Insert,
        PolicyAction::Update,
        PolicyAction::Delete,
    ];

    /// The mutation actions `WRITE` expands to
    pub const WRITE: [PolicyAction; 3] = [
        PolicyAction::Insert,
        PolicyAction::Update,
        PolicyAction::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Read => "read",
            PolicyAction::Insert => "insert",
            PolicyAction::Update => "update",
            PolicyAction::Delete => "delete",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            PolicyAction::Read => 0b0001,
            PolicyAction::Insert => 0b0010,
            PolicyAction::Update => 0b0100,
            PolicyAction::Delete => 0b1000,
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of actions a policy is tagged with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ActionSet(u8);

impl ActionSet {
    /// Empty set (rejected when a catalog is built)
    pub fn empty() -> Self {
        Self(0)
    }

    /// `READ`
    pub fn read() -> Self {
        Self::of(&[PolicyAction::Read])
    }

    /// `WRITE` = insert, update and delete
    pub fn write() -> Self {
        Self::of(&PolicyAction::WRITE)
    }

    /// Every action
    pub fn all() -> Self {
        Self::of(&PolicyAction::ALL)
    }

    pub fn of(actions: &[PolicyAction]) -> Self {
        let mut set = Self::empty();
        for action in actions {
            set = set.with(*action);
        }
        set
    }

    /// Builder: add one action
    pub fn with(self, action: PolicyAction) -> Self {
        Self(self.0 | action.bit())
    }

    /// Builder: union with another set
    pub fn union(self, other: ActionSet) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(&self, action: PolicyAction) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate contained actions in `PolicyAction::ALL` order
    pub fn iter(&self) -> impl Iterator<Item = PolicyAction> + '_ {
        PolicyAction::ALL
            .into_iter()
            .filter(move |a| self.contains(*a))
    }
}

impl From<PolicyAction> for ActionSet {
    fn from(action: PolicyAction) -> Self {
        ActionSet::empty().with(action)
    }
}

/// Effect of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// A named access policy declared on exactly one object type
///
/// `when` gates applicability (absent = always applicable); `using` is the
/// instance predicate (absent = true). An ALLOW policy must carry `using`;
/// that is checked when the policy catalog is built.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPolicy {
    pub name: String,
    pub actions: ActionSet,
    pub effect: PolicyEffect,
    pub when: Option<Expr>,
    pub using: Option<Expr>,
}

impl AccessPolicy {
    /// `ALLOW <actions> USING (<using>)`
    pub fn allow(name: impl Into<String>, actions: impl Into<ActionSet>, using: Expr) -> Self {
        Self {
            name: name.into(),
            actions: actions.into(),
            effect: PolicyEffect::Allow,
            when: None,
            using: Some(using),
        }
    }

    /// `DENY <actions>`; narrow it with [`AccessPolicy::using`]
    pub fn deny(name: impl Into<String>, actions: impl Into<ActionSet>) -> Self {
        Self {
            name: name.into(),
            actions: actions.into(),
            effect: PolicyEffect::Deny,
            when: None,
            using: None,
        }
    }

    /// Builder: set the `WHEN` applicability guard
    pub fn when(mut self, when: Expr) -> Self {
        self.when = Some(when);
        self
    }

    /// Builder: set the `USING` predicate
    pub fn using(mut self, using: Expr) -> Self {
        self.using = Some(using);
        self
    }

    pub fn is_allow(&self) -> bool {
        self.effect == PolicyEffect::Allow
    }

    pub fn applies_to(&self, action: PolicyAction) -> bool {
        self.actions.contains(action)
    }
}
