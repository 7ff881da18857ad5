//! Type hierarchy resolver
//!
//! Computes the effective policy set of a concrete type for one action by
//! walking the type and its ancestor closure and collecting every policy
//! that governs the action.
//!
//! Results are `Arc`-shared and cached per epoch. The engine passes the
//! generation of the installed snapshot, which grows on every install even
//! when the schema version does not; standalone callers use the schema
//! version. A request against a newer epoch clears the cache; requests
//! against an older one (a compilation that pinned a snapshot before DDL
//! landed) are answered without touching the cache.

use crate::catalog::PolicyCatalog;
use crate::error::{PolicyError, Result};
use crate::types::{EffectivePolicy, EffectivePolicySet};
use keel_db_core::{PolicyAction, Schema, TypeName};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct ResolverCache {
    /// Schema version the entries were computed from
    epoch: Option<u64>,
    entries: HashMap<(TypeName, PolicyAction), Arc<EffectivePolicySet>>,
}

/// Cached effective-policy-set resolution
#[derive(Debug, Default)]
pub struct HierarchyResolver {
    cache: RwLock<ResolverCache>,
}

impl HierarchyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective policies of `ty` for `action`, cached under the schema
    /// version.
    ///
    /// `catalog` must have been built from `schema`.
    pub fn resolve(
        &self,
        schema: &Schema,
        catalog: &PolicyCatalog,
        ty: &str,
        action: PolicyAction,
    ) -> Result<Arc<EffectivePolicySet>> {
        self.resolve_at(schema.version(), schema, catalog, ty, action)
    }

    /// Effective policies of `ty` for `action`, cached under `epoch`.
    ///
    /// Two different snapshots must never be resolved under the same epoch.
    pub fn resolve_at(
        &self,
        epoch: u64,
        schema: &Schema,
        catalog: &PolicyCatalog,
        ty: &str,
        action: PolicyAction,
    ) -> Result<Arc<EffectivePolicySet>> {
        if catalog.version() != schema.version() {
            return Err(PolicyError::internal(format!(
                "catalog version {} does not match schema version {}",
                catalog.version(),
                schema.version()
            )));
        }
        let object_type = schema
            .get(ty)
            .ok_or_else(|| PolicyError::unknown_type(ty))?;
        let key = (object_type.name.clone(), action);

        if let Ok(cache) = self.cache.read() {
            if cache.epoch == Some(epoch) {
                if let Some(hit) = cache.entries.get(&key) {
                    return Ok(Arc::clone(hit));
                }
            }
        }

        let entries = std::iter::once(&object_type.name)
            .chain(schema.ancestors_of(ty))
            .flat_map(|declared_on| {
                catalog
                    .declared(declared_on, action)
                    .iter()
                    .map(move |policy| EffectivePolicy {
                        declared_on: declared_on.clone(),
                        policy: Arc::clone(policy),
                    })
            })
            .collect();
        let resolved = Arc::new(EffectivePolicySet {
            ty: key.0.clone(),
            action,
            entries,
        });

        if let Ok(mut cache) = self.cache.write() {
            let cached_epoch = cache.epoch;
            match cached_epoch {
                Some(current) if current > epoch => {}
                Some(current) if current == epoch => {
                    cache.entries.insert(key, Arc::clone(&resolved));
                }
                previous => {
                    if previous.is_some() {
                        tracing::debug!(
                            from = ?previous,
                            to = epoch,
                            evicted = cache.entries.len(),
                            "schema version changed, clearing effective policy cache"
                        );
                    }
                    cache.entries.clear();
                    cache.epoch = Some(epoch);
                    cache.entries.insert(key, Arc::clone(&resolved));
                }
            }
        }

        Ok(resolved)
    }

    /// Number of cached entries
    pub fn cached_len(&self) -> usize {
        self.cache.read().map(|c| c.entries.len()).unwrap_or(0)
    }

    /// Epoch the cache currently holds
    pub fn epoch(&self) -> Option<u64> {
        self.cache.read().ok().and_then(|c| c.epoch)
    }
}
