//! Policy catalog
//!
//! Indexes the policies declared in a schema snapshot by
//! `(declaring type, action)` so the hierarchy resolver can gather a type's
//! effective set with one lookup per ancestor.
//!
//! # Key Design Decisions
//!
//! - A policy is indexed once per action it governs (`WRITE` is already
//!   expanded by `ActionSet`)
//! - Declaration order is preserved within each bucket, though nothing
//!   downstream depends on it
//! - Per-policy invariants are checked here, once per schema version

use crate::error::{PolicyError, Result};
use keel_db_core::{AccessPolicy, PolicyAction, Schema, TypeName};
use std::collections::HashMap;
use std::sync::Arc;

/// Declared policies of a schema snapshot, indexed by type and action
#[derive(Debug, Clone, Default)]
pub struct PolicyCatalog {
    version: u64,
    by_type_action: HashMap<(TypeName, PolicyAction), Vec<Arc<AccessPolicy>>>,
    total: usize,
}

impl PolicyCatalog {
    /// Build the catalog for a schema snapshot.
    ///
    /// Fails on an ALLOW policy without `USING` or a policy governing no
    /// action.
    pub fn build(schema: &Schema) -> Result<Self> {
        let mut catalog = Self {
            version: schema.version(),
            ..Self::default()
        };

        for ty in schema.types() {
            for policy in &ty.policies {
                validate(&ty.name, policy)?;

                let policy = Arc::new(policy.clone());
                for action in policy.actions.iter() {
                    catalog
                        .by_type_action
                        .entry((ty.name.clone(), action))
                        .or_default()
                        .push(Arc::clone(&policy));
                }
                catalog.total += 1;
            }
        }

        tracing::debug!(
            version = catalog.version,
            policies = catalog.total,
            "policy catalog built"
        );
        Ok(catalog)
    }

    /// Schema version this catalog was built from
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of declared policies
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Policies declared directly on `ty` governing `action`
    pub fn declared(&self, ty: &TypeName, action: PolicyAction) -> &[Arc<AccessPolicy>] {
        self.by_type_action
            .get(&(ty.clone(), action))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn validate(ty: &TypeName, policy: &AccessPolicy) -> Result<()> {
    if policy.name.is_empty() {
        return Err(PolicyError::invalid_policy(
            ty.as_str(),
            "",
            "policy name must not be empty",
        ));
    }
    if policy.actions.is_empty() {
        return Err(PolicyError::invalid_policy(
            ty.as_str(),
            &policy.name,
            "policy must govern at least one action",
        ));
    }
    if policy.is_allow() && policy.using.is_none() {
        return Err(PolicyError::invalid_policy(
            ty.as_str(),
            &policy.name,
            "ALLOW policy requires a USING predicate",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_db_core::{ActionSet, Expr, ObjectType};

    fn make_schema(policies: Vec<AccessPolicy>) -> Schema {
        let mut tgt = ObjectType::new("Tgt");
        for p in policies {
            tgt = tgt.policy(p);
        }
        Schema::builder().version(7).object_type(tgt).build().unwrap()
    }

    #[test]
    fn test_write_indexes_each_mutation() {
        let schema = make_schema(vec![
            AccessPolicy::allow("redact", ActionSet::read(), Expr::global("filter_owned").negate()),
            AccessPolicy::allow("dml_always", ActionSet::write(), Expr::bool(true)),
        ]);
        let catalog = PolicyCatalog::build(&schema).unwrap();
        let tgt = TypeName::new("Tgt");

        assert_eq!(catalog.version(), 7);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.declared(&tgt, PolicyAction::Read)[0].name, "redact");
        for action in [PolicyAction::Insert, PolicyAction::Update, PolicyAction::Delete] {
            let declared = catalog.declared(&tgt, action);
            assert_eq!(declared.len(), 1);
            assert_eq!(declared[0].name, "dml_always");
        }
        assert!(catalog.declared(&TypeName::new("Object"), PolicyAction::Read).is_empty());
    }

    #[test]
    fn test_allow_without_using_rejected() {
        let mut policy = AccessPolicy::allow("p", ActionSet::read(), Expr::bool(true));
        policy.using = None;
        let err = PolicyCatalog::build(&make_schema(vec![policy])).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPolicy { policy, .. } if policy == "p"));
    }

    #[test]
    fn test_empty_actions_rejected() {
        let policy = AccessPolicy::deny("nothing", ActionSet::empty());
        let err = PolicyCatalog::build(&make_schema(vec![policy])).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPolicy { .. }));
    }
}
