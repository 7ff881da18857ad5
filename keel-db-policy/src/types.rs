//! Policy types
//!
//! Derived, per-(type, action) views over the declared policies:
//! [`EffectivePolicySet`] is what the hierarchy resolver produces and
//! [`CombinedFilter`] is what the combinator reduces it to.

use keel_db_core::{AccessPolicy, Expr, PolicyAction, TypeName};
use std::sync::Arc;

/// A policy visible to a concrete type, with the type that declares it
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub declared_on: TypeName,
    pub policy: Arc<AccessPolicy>,
}

impl EffectivePolicy {
    pub fn name(&self) -> &str {
        &self.policy.name
    }

    pub fn is_allow(&self) -> bool {
        self.policy.is_allow()
    }

    /// Sort key giving a declaration-order-independent ordering
    pub(crate) fn sort_key(&self) -> (&TypeName, &str) {
        (&self.declared_on, self.policy.name.as_str())
    }
}

/// Own and inherited policies of one concrete type for one action.
///
/// Entry order carries no meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicySet {
    pub ty: TypeName,
    pub action: PolicyAction,
    pub entries: Vec<EffectivePolicy>,
}

impl EffectivePolicySet {
    /// Whether any ALLOW policy is declared, regardless of WHEN applicability
    pub fn has_allow(&self) -> bool {
        self.entries.iter().any(EffectivePolicy::is_allow)
    }

    /// Empty means unrestricted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn allows(&self) -> impl Iterator<Item = &EffectivePolicy> {
        self.entries.iter().filter(|e| e.is_allow())
    }

    pub fn denies(&self) -> impl Iterator<Item = &EffectivePolicy> {
        self.entries.iter().filter(|e| !e.is_allow())
    }
}

/// The single visibility predicate for one (type, action) under one session.
///
/// `expr` is evaluated with the candidate object as subject; an object is
/// admitted when the result contains `true`.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedFilter {
    pub ty: TypeName,
    pub action: PolicyAction,
    pub expr: Expr,
    /// Applicable ALLOW terms that went into the fold
    pub allow_terms: usize,
    /// Applicable DENY terms that went into the fold
    pub deny_terms: usize,
}

impl CombinedFilter {
    /// Filter admitting everything
    pub fn unrestricted(ty: TypeName, action: PolicyAction) -> Self {
        Self {
            ty,
            action,
            expr: Expr::bool(true),
            allow_terms: 0,
            deny_terms: 0,
        }
    }

    /// True if the filter folded to constant `true`
    pub fn is_unrestricted(&self) -> bool {
        self.expr.as_const_bool() == Some(true)
    }

    /// True if the filter folded to constant `false`
    pub fn denies_all(&self) -> bool {
        self.expr.as_const_bool() == Some(false)
    }
}
