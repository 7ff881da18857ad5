//! Access policy enforcement for Keel
//!
//! This crate turns the access policies declared on object types into one
//! visibility predicate per (concrete type, action, session):
//!
//! - **Catalog**: declared policies indexed by type and action
//! - **Hierarchy resolution**: a type's own policies plus every ancestor's
//! - **Combination**: WHEN gating, ALLOW/DENY fold, partial evaluation
//!
//! # Core Types
//!
//! - [`PolicyEngine`]: installed schema snapshot, catalog and resolver cache, shared
//! - [`PolicyContext`]: one request's pinned snapshot, session globals and options
//! - [`EffectivePolicySet`]: own and inherited policies for a (type, action)
//! - [`CombinedFilter`]: the folded predicate the query rewriter splices in
//!
//! # Combination Semantics
//!
//! 1. **Structural default**: a type with no declared ALLOW policy for an
//!    action is unrestricted for it (modulo DENY)
//! 2. **WHEN gating**: a policy whose WHEN folds to anything but `true` is
//!    skipped; it neither allows nor denies
//! 3. **Allow**: OR of applicable ALLOW predicates
//! 4. **Deny overrides**: any applicable DENY predicate removes the object
//! 5. **Order independence**: terms are sorted before folding
//!
//! Policy predicates are evaluated as root: objects they reach are not
//! filtered again, so enforcement never recurses.

mod catalog;
mod combine;
mod context;
mod error;
mod fold;
mod options;
mod resolver;
mod types;

pub use catalog::PolicyCatalog;
pub use combine::PredicateCombinator;
pub use context::{PolicyContext, PolicyEngine, SchemaState};
pub use error::{PolicyError, Result};
pub use fold::fold;
pub use options::PolicyOptions;
pub use resolver::HierarchyResolver;
pub use types::{CombinedFilter, EffectivePolicy, EffectivePolicySet};
