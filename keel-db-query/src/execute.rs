//! Query execution
//!
//! [`QueryEngine`] compiles statements through the policy rewriter and runs
//! them against a store. Results are rendered as JSON values:
//!
//! - objects without a shape render as `{"id": "<uuid>"}`
//! - single shape elements render as a value or `null`, multi ones as arrays
//! - mutations return the ids of the objects they touched
//!
//! INSERT checks each new object against its type's INSERT policies after
//! it is materialised; a rejected object rolls back everything the
//! statement created. DELETE refuses objects that something outside the
//! statement still reaches through a required link.

use crate::error::{QueryError, Result};
use crate::eval::Evaluator;
use crate::ir::{Delete, Insert, InsertValue, Select, Shape, Statement, Update};
use crate::rewrite::PolicyRewriter;
use keel_db_core::{DataSink, DataSource, ObjectId, Schema, SessionContext, TypeName, Value};
use keel_db_policy::{PolicyContext, PolicyEngine, PolicyOptions};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::field::Empty;

/// Policy-aware statement compiler and executor
#[derive(Debug, Clone)]
pub struct QueryEngine {
    policy: Arc<PolicyEngine>,
}

impl QueryEngine {
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        Self { policy }
    }

    pub fn policy_engine(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// Policy context for one request against the installed schema
    pub fn context(&self, session: SessionContext, options: PolicyOptions) -> PolicyContext {
        PolicyContext::new(Arc::clone(&self.policy), session, options)
    }

    /// Rewrite a statement for `ctx`. Unknown types and pointers fail here.
    pub fn compile(&self, ctx: &PolicyContext, stmt: impl Into<Statement>) -> Result<Statement> {
        PolicyRewriter::new(ctx).rewrite(stmt.into())
    }

    /// Compile and run a read-only SELECT
    pub fn query(
        &self,
        source: &dyn DataSource,
        ctx: &PolicyContext,
        select: Select,
    ) -> Result<Vec<JsonValue>> {
        let Statement::Select(select) = self.compile(ctx, select)? else {
            return Err(QueryError::internal("rewriter changed statement kind"));
        };
        let span = tracing::debug_span!("query_execute", statement = "select", rows = Empty);
        let _guard = span.enter();

        let ev = Evaluator::new(ctx.schema(), source, ctx.session());
        let rows = run_select(&ev, &select)?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Compile and run any statement
    pub fn execute<S: DataSink>(
        &self,
        store: &mut S,
        ctx: &PolicyContext,
        stmt: impl Into<Statement>,
    ) -> Result<Vec<JsonValue>> {
        let compiled = self.compile(ctx, stmt)?;
        let span = tracing::debug_span!("query_execute", statement = compiled.kind(), rows = Empty);
        let _guard = span.enter();

        let rows = match &compiled {
            Statement::Select(select) => {
                let ev = Evaluator::new(ctx.schema(), &*store, ctx.session());
                run_select(&ev, select)?
            }
            Statement::Insert(insert) => {
                let mut created = Vec::new();
                match insert_object(store, ctx, insert, &mut created) {
                    Ok(id) => vec![Value::Object(id).to_json()],
                    Err(e) => {
                        for id in created.iter().rev() {
                            store.delete(*id);
                        }
                        tracing::debug!(rolled_back = created.len(), error = %e, "insert rolled back");
                        return Err(e);
                    }
                }
            }
            Statement::Update(update) => run_update(store, ctx, update)?,
            Statement::Delete(delete) => run_delete(store, ctx, delete)?,
        };

        span.record("rows", rows.len());
        Ok(rows)
    }
}

fn run_select(ev: &Evaluator<'_>, select: &Select) -> Result<Vec<JsonValue>> {
    let mut rows = ev.eval(&select.expr, None)?;
    if let Some(filter) = &select.filter {
        rows = ev.keep(rows, filter)?;
    }
    rows.iter()
        .map(|row| render(ev, row, select.shape.as_ref()))
        .collect()
}

fn render(ev: &Evaluator<'_>, value: &Value, shape: Option<&Shape>) -> Result<JsonValue> {
    let Some(shape) = shape.filter(|_| value.as_object().is_some()) else {
        return Ok(value.to_json());
    };

    let mut map = serde_json::Map::new();
    for el in &shape.elements {
        let values = ev.eval(&el.expr, Some(value))?;
        let rendered = if el.single {
            match values.first() {
                Some(v) => render(ev, v, el.shape.as_ref())?,
                None => JsonValue::Null,
            }
        } else {
            JsonValue::Array(
                values
                    .iter()
                    .map(|v| render(ev, v, el.shape.as_ref()))
                    .collect::<Result<_>>()?,
            )
        };
        map.insert(el.name.clone(), rendered);
    }
    Ok(JsonValue::Object(map))
}

/// Check values assigned to a pointer against its declared multiplicity
fn check_assigned(schema: &Schema, ty: &TypeName, name: &str, values: &[Value]) -> Result<()> {
    let pointer = schema.pointer(ty, name).ok_or_else(|| {
        QueryError::internal(format!("pointer '{}' vanished from '{}'", name, ty))
    })?;
    if pointer.required && values.is_empty() {
        return Err(QueryError::cardinality_violation(format!(
            "missing value for required {} '{}' of object type '{}'",
            pointer.kind_str(),
            name,
            ty
        )));
    }
    if pointer.is_single() && values.len() > 1 {
        return Err(QueryError::cardinality_violation(format!(
            "more than one element assigned to single {} '{}' of object type '{}'",
            pointer.kind_str(),
            name,
            ty
        )));
    }
    Ok(())
}

fn insert_object<S: DataSink>(
    store: &mut S,
    ctx: &PolicyContext,
    insert: &Insert,
    created: &mut Vec<ObjectId>,
) -> Result<ObjectId> {
    let schema = ctx.schema();
    let mut fields = Vec::with_capacity(insert.fields.len());
    for (name, value) in &insert.fields {
        let values = match value {
            InsertValue::Expr(expr) => {
                Evaluator::new(schema, &*store, ctx.session()).eval(expr, None)?
            }
            InsertValue::Nested(nested) => {
                vec![Value::Object(insert_object(store, ctx, nested, created)?)]
            }
        };
        check_assigned(schema, &insert.ty, name, &values)?;
        fields.push((name.clone(), values));
    }

    let id = store.insert(&insert.ty, fields);
    created.push(id);

    let ev = Evaluator::new(schema, &*store, ctx.session());
    if !ev.admits(insert.guard.as_deref(), id)? {
        tracing::warn!(ty = %insert.ty, "insert rejected by access policy");
        return Err(QueryError::insert_violation(insert.ty.as_str()));
    }
    Ok(id)
}

/// Evaluate a mutation's target set and apply its filter
fn mutation_targets(
    ev: &Evaluator<'_>,
    target: &keel_db_core::Expr,
    filter: Option<&keel_db_core::Expr>,
) -> Result<Vec<ObjectId>> {
    let mut targets = ev.eval(target, None)?;
    if let Some(filter) = filter {
        targets = ev.keep(targets, filter)?;
    }
    targets
        .iter()
        .map(|v| {
            v.as_object()
                .ok_or_else(|| QueryError::internal("mutation target is not an object"))
        })
        .collect()
}

fn run_update<S: DataSink>(store: &mut S, ctx: &PolicyContext, update: &Update) -> Result<Vec<JsonValue>> {
    let schema = ctx.schema();
    let (targets, assignments) = {
        let ev = Evaluator::new(schema, &*store, ctx.session());
        let targets = mutation_targets(&ev, &update.target, update.filter.as_ref())?;

        let mut assignments = Vec::with_capacity(targets.len() * update.set.len());
        for &id in &targets {
            let ty = store
                .type_of(id)
                .ok_or_else(|| QueryError::internal(format!("object {} has no type", id)))?;
            let subject = Value::Object(id);
            for (name, expr) in &update.set {
                let values = ev.eval(expr, Some(&subject))?;
                check_assigned(schema, &ty, name, &values)?;
                assignments.push((id, name.as_str(), values));
            }
        }
        (targets, assignments)
    };

    for (id, name, values) in assignments {
        store.set_pointer(id, name, values)?;
    }
    Ok(targets.into_iter().map(|id| Value::Object(id).to_json()).collect())
}

/// Refuse to delete an object that a surviving object reaches through a
/// required link. Referrers are read raw: a link hidden by a read policy
/// still counts.
fn check_required_referrers(
    schema: &Schema,
    source: &dyn DataSource,
    targets: &[ObjectId],
) -> Result<()> {
    let mut required_links: Vec<&str> = schema
        .types()
        .flat_map(|ty| ty.pointers.iter())
        .filter(|p| p.is_link() && p.required)
        .map(|p| p.name.as_str())
        .collect();
    required_links.sort_unstable();
    required_links.dedup();

    for &target in targets {
        for &link in &required_links {
            for referrer in source.referrers(target, link) {
                if targets.contains(&referrer) {
                    continue;
                }
                let Some(owner) = source.type_of(referrer) else {
                    continue;
                };
                if schema
                    .pointer(&owner, link)
                    .is_some_and(|p| p.is_link() && p.required)
                {
                    let target_ty = source
                        .type_of(target)
                        .map(|ty| ty.to_string())
                        .unwrap_or_default();
                    tracing::warn!(%owner, link, target = %target, "delete blocked by required link");
                    return Err(QueryError::cardinality_violation(format!(
                        "deletion of object type '{}' is prohibited by required link '{}' of object type '{}'",
                        target_ty, link, owner
                    )));
                }
            }
        }
    }
    Ok(())
}

fn run_delete<S: DataSink>(store: &mut S, ctx: &PolicyContext, delete: &Delete) -> Result<Vec<JsonValue>> {
    let targets = {
        let ev = Evaluator::new(ctx.schema(), &*store, ctx.session());
        mutation_targets(&ev, &delete.target, delete.filter.as_ref())?
    };
    check_required_referrers(ctx.schema(), &*store, &targets)?;

    let mut deleted = Vec::with_capacity(targets.len());
    for id in targets {
        if store.delete(id) {
            deleted.push(Value::Object(id).to_json());
        }
    }
    Ok(deleted)
}
