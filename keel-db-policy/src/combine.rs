//! Predicate combinator
//!
//! Reduces an [`EffectivePolicySet`] to one [`CombinedFilter`] under a
//! session:
//!
//! 1. WHEN clauses are folded against the session. A clause folding to a
//!    constant decides applicability now; one that still depends on the
//!    instance is conjoined with the policy's USING predicate.
//! 2. Every term is normalised to a singleton boolean (`true IN term`), so
//!    an empty-valued predicate reads as `false` and never absorbs its
//!    siblings in the OR fold.
//! 3. allow = `true` when no ALLOW policy is declared at all, otherwise the
//!    OR of applicable ALLOW terms (`false` when none apply).
//! 4. deny = OR of applicable DENY terms.
//! 5. filter = `allow AND NOT deny`, folded.
//!
//! Terms are ordered by (declaring type, policy name) before folding, so the
//! output expression is identical for any declaration order.

use crate::error::Result;
use crate::fold::fold;
use crate::types::{CombinedFilter, EffectivePolicy, EffectivePolicySet};
use keel_db_core::{ops, Expr, Schema, SessionContext};
use tracing::field::Empty;

/// Combines effective policy sets for one session
#[derive(Debug, Clone, Copy)]
pub struct PredicateCombinator<'a> {
    schema: &'a Schema,
    session: &'a SessionContext,
}

impl<'a> PredicateCombinator<'a> {
    pub fn new(schema: &'a Schema, session: &'a SessionContext) -> Self {
        Self { schema, session }
    }

    /// Combine `set` into a single filter
    pub fn combine(&self, set: &EffectivePolicySet) -> Result<CombinedFilter> {
        let span = tracing::debug_span!(
            "policy_combine",
            ty = %set.ty,
            action = %set.action,
            declared = set.len(),
            allow_terms = Empty,
            deny_terms = Empty,
        );
        let _guard = span.enter();

        let mut entries: Vec<&EffectivePolicy> = set.entries.iter().collect();
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut allow_terms = Vec::new();
        let mut deny_terms = Vec::new();
        for entry in entries {
            let Some(term) = self.policy_term(entry)? else {
                continue;
            };
            if entry.is_allow() {
                allow_terms.push(term);
            } else {
                deny_terms.push(term);
            }
        }
        span.record("allow_terms", allow_terms.len());
        span.record("deny_terms", deny_terms.len());

        let (allow_count, deny_count) = (allow_terms.len(), deny_terms.len());
        let allow = if set.has_allow() {
            Expr::any(allow_terms)
        } else {
            Expr::bool(true)
        };
        let deny = Expr::any(deny_terms);

        let expr = fold(
            &Expr::all(vec![allow, deny.negate()]),
            self.schema,
            self.session,
        )?;
        tracing::trace!(filter = %expr, "combined filter");

        Ok(CombinedFilter {
            ty: set.ty.clone(),
            action: set.action,
            expr,
            allow_terms: allow_count,
            deny_terms: deny_count,
        })
    }

    /// The normalised contribution of one policy, or `None` if its WHEN
    /// clause rules it out for this session.
    fn policy_term(&self, entry: &EffectivePolicy) -> Result<Option<Expr>> {
        let policy = &entry.policy;

        let when = match &policy.when {
            None => None,
            Some(when) => match fold(when, self.schema, self.session)? {
                Expr::Const(values) if ops::is_true(&values) => None,
                Expr::Const(_) => {
                    tracing::trace!(policy = %policy.name, "WHEN not applicable");
                    return Ok(None);
                }
                conditional => Some(normalize(conditional)),
            },
        };

        let using = match &policy.using {
            Some(using) => normalize(fold(using, self.schema, self.session)?),
            None => Expr::bool(true),
        };

        let term = match when {
            Some(when) => fold(&Expr::all(vec![when, using]), self.schema, self.session)?,
            None => using,
        };
        Ok(Some(term))
    }
}

/// Reduce a predicate to a singleton boolean: `true` iff it yields `true`.
fn normalize(expr: Expr) -> Expr {
    match expr {
        Expr::Const(values) => Expr::bool(ops::is_true(&values)),
        other => Expr::bool(true).is_in(other),
    }
}
