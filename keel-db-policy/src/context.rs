//! Policy engine and per-request policy context
//!
//! [`PolicyEngine`] owns the installed schema snapshot, its policy catalog
//! and the shared hierarchy resolver; it is shared across sessions.
//! [`PolicyContext`] pins one snapshot for one request together with that
//! request's session globals and options, and caches combined filters.
//! Contexts never share session state, so concurrent requests cannot
//! observe each other's globals.

use crate::catalog::PolicyCatalog;
use crate::combine::PredicateCombinator;
use crate::error::{PolicyError, Result};
use crate::options::PolicyOptions;
use crate::resolver::HierarchyResolver;
use crate::types::{CombinedFilter, EffectivePolicySet};
use keel_db_core::{PolicyAction, Schema, SessionContext, TypeName};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A schema snapshot with its policy catalog
#[derive(Debug)]
pub struct SchemaState {
    schema: Arc<Schema>,
    catalog: PolicyCatalog,
    /// Install counter of the owning engine, distinct per snapshot
    generation: u64,
}

impl SchemaState {
    fn build(schema: Arc<Schema>) -> Result<Self> {
        let catalog = PolicyCatalog::build(&schema)?;
        Ok(Self {
            schema,
            catalog,
            generation: 0,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    pub fn version(&self) -> u64 {
        self.schema.version()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Shared policy engine
#[derive(Debug)]
pub struct PolicyEngine {
    state: RwLock<Arc<SchemaState>>,
    resolver: HierarchyResolver,
}

impl PolicyEngine {
    /// Create an engine for an initial schema snapshot
    pub fn new(schema: Arc<Schema>) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(Arc::new(SchemaState::build(schema)?)),
            resolver: HierarchyResolver::new(),
        })
    }

    /// Install a new schema snapshot (after DDL).
    ///
    /// Contexts created earlier keep their pinned snapshot. Every install
    /// starts a new generation, so cached effective policy sets are dropped
    /// on the next resolution even when the schema version is unchanged.
    pub fn install_schema(&self, schema: Arc<Schema>) -> Result<()> {
        let mut next = SchemaState::build(schema)?;
        let mut state = self
            .state
            .write()
            .map_err(|_| PolicyError::internal("schema state lock poisoned"))?;
        if next.version() < state.version() {
            return Err(PolicyError::StaleSchema {
                installed: state.version(),
                offered: next.version(),
            });
        }
        next.generation = state.generation + 1;
        tracing::debug!(
            from = state.version(),
            to = next.version(),
            generation = next.generation,
            policies = next.catalog.len(),
            "installing schema snapshot"
        );
        *state = Arc::new(next);
        Ok(())
    }

    /// Currently installed snapshot
    pub fn snapshot(&self) -> Arc<SchemaState> {
        match self.state.read() {
            Ok(state) => Arc::clone(&*state),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Currently installed schema
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(self.snapshot().schema())
    }

    /// Effective policies of `ty` for `action` in the installed snapshot
    pub fn effective_policies(
        &self,
        ty: &str,
        action: PolicyAction,
    ) -> Result<Arc<EffectivePolicySet>> {
        self.resolve(&self.snapshot(), ty, action)
    }

    fn resolve(
        &self,
        state: &SchemaState,
        ty: &str,
        action: PolicyAction,
    ) -> Result<Arc<EffectivePolicySet>> {
        self.resolver
            .resolve_at(state.generation, &state.schema, &state.catalog, ty, action)
    }

    pub fn resolver(&self) -> &HierarchyResolver {
        &self.resolver
    }
}

type FilterCache = HashMap<(TypeName, PolicyAction), Arc<CombinedFilter>>;

/// Policy context for one request
///
/// Cheap to clone; clones share the filter cache.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    engine: Arc<PolicyEngine>,
    state: Arc<SchemaState>,
    session: Arc<SessionContext>,
    options: PolicyOptions,
    filter_cache: Arc<RwLock<FilterCache>>,
}

impl PolicyContext {
    /// Pin the engine's current snapshot for a request
    pub fn new(engine: Arc<PolicyEngine>, session: SessionContext, options: PolicyOptions) -> Self {
        let state = engine.snapshot();
        Self {
            engine,
            state,
            session: Arc::new(session),
            options,
            filter_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Context that bypasses every access policy
    pub fn root(engine: Arc<PolicyEngine>) -> Self {
        Self::new(engine, SessionContext::new(), PolicyOptions::root())
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.state.schema()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn options(&self) -> PolicyOptions {
        self.options
    }

    pub fn is_bypass(&self) -> bool {
        self.options.is_bypass()
    }

    /// Effective policies of `ty` for `action` in the pinned snapshot
    pub fn effective_policies(
        &self,
        ty: &str,
        action: PolicyAction,
    ) -> Result<Arc<EffectivePolicySet>> {
        self.engine.resolve(&self.state, ty, action)
    }

    /// Combined filter for objects of exactly `ty` under `action`.
    ///
    /// Bypass contexts get an unrestricted filter for every known type.
    pub fn filter_for(&self, ty: &str, action: PolicyAction) -> Result<Arc<CombinedFilter>> {
        let name = self
            .schema()
            .get(ty)
            .map(|t| t.name.clone())
            .ok_or_else(|| PolicyError::unknown_type(ty))?;

        if self.is_bypass() {
            return Ok(Arc::new(CombinedFilter::unrestricted(name, action)));
        }

        let key = (name, action);
        if let Ok(cache) = self.filter_cache.read() {
            if let Some(hit) = cache.get(&key) {
                return Ok(Arc::clone(hit));
            }
        }

        let set = self.effective_policies(ty, action)?;
        let filter = Arc::new(PredicateCombinator::new(self.schema(), &self.session).combine(&set)?);

        if let Ok(mut cache) = self.filter_cache.write() {
            cache.insert(key, Arc::clone(&filter));
        }
        Ok(filter)
    }
}
