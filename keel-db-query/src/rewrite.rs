//! Policy rewriter
//!
//! Walks a statement, types every expression against the pinned schema
//! snapshot, and attaches an [`AccessGuard`] wherever objects of a type
//! become observable:
//!
//! - type references (`Issue`)
//! - forward link hops (`.owner`), guarded at the link's target types
//! - backward link hops (`.<owner`), guarded at the link's source types
//! - nested shapes, each element at its own type
//! - mutation targets, guarded with the statement's own action
//!
//! Every guard is built by [`PolicyRewriter::guard_for`], keyed by
//! (types, action), so forward and backward traversal share enforcement.
//! Link hops also carry their declared multiplicity for the cardinality
//! enforcer. Guard filters are policy predicates and are not rewritten:
//! they run as root.

use crate::error::{QueryError, Result};
use crate::infer::{known_type, step_type, Inferred, StaticType};
use crate::ir::{Delete, Insert, InsertValue, Select, Shape, ShapeElement, Statement, Update};
use keel_db_core::{
    AccessGuard, Expr, PathExpr, PolicyAction, Pointer, Schema, Step, TypeName, ID_POINTER,
};
use keel_db_policy::PolicyContext;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::field::Empty;

type GuardKey = (Vec<TypeName>, PolicyAction);

/// Rewrites statements for one policy context
#[derive(Debug)]
pub struct PolicyRewriter<'a> {
    ctx: &'a PolicyContext,
    guards: HashMap<GuardKey, Option<Arc<AccessGuard>>>,
    guard_sites: usize,
}

impl<'a> PolicyRewriter<'a> {
    pub fn new(ctx: &'a PolicyContext) -> Self {
        Self {
            ctx,
            guards: HashMap::new(),
            guard_sites: 0,
        }
    }

    fn schema(&self) -> &'a Schema {
        self.ctx.schema()
    }

    /// Number of guarded sites in everything rewritten so far
    pub fn guard_sites(&self) -> usize {
        self.guard_sites
    }

    /// Rewrite a statement
    pub fn rewrite(&mut self, stmt: Statement) -> Result<Statement> {
        let span = tracing::debug_span!(
            "policy_rewrite",
            statement = stmt.kind(),
            bypass = self.ctx.is_bypass(),
            guards = Empty,
        );
        let _guard = span.enter();

        let rewritten = match stmt {
            Statement::Select(select) => Statement::Select(self.rewrite_select(&select)?),
            Statement::Insert(insert) => Statement::Insert(self.rewrite_insert(&insert)?),
            Statement::Update(update) => Statement::Update(self.rewrite_update(&update)?),
            Statement::Delete(delete) => Statement::Delete(self.rewrite_delete(&delete)?),
        };

        span.record("guards", self.guard_sites);
        Ok(rewritten)
    }

    /// Guard admitting only objects visible under `action`, or `None` when
    /// every concrete type involved is unrestricted (or policies are bypassed).
    pub fn guard_for(
        &mut self,
        types: &[TypeName],
        action: PolicyAction,
    ) -> Result<Option<Arc<AccessGuard>>> {
        if self.ctx.is_bypass() {
            return Ok(None);
        }

        let key = (types.to_vec(), action);
        if let Some(cached) = self.guards.get(&key) {
            if cached.is_some() {
                self.guard_sites += 1;
            }
            return Ok(cached.clone());
        }

        let mut guard = AccessGuard::new(action);
        for ty in types {
            for concrete in self.schema().concrete_types(ty)? {
                if guard.filters.contains_key(&concrete) {
                    continue;
                }
                let filter = self.ctx.filter_for(&concrete, action)?;
                if !filter.is_unrestricted() {
                    guard.filters.insert(concrete, filter.expr.clone());
                }
            }
        }

        let guard = (!guard.is_empty()).then(|| Arc::new(guard));
        if guard.is_some() {
            self.guard_sites += 1;
        }
        self.guards.insert(key, guard.clone());
        Ok(guard)
    }

    /// Type and rewrite one expression. `subject` is the type of the object
    /// in scope, if any.
    pub fn rewrite_expr(
        &mut self,
        expr: &Expr,
        subject: Option<&Inferred>,
    ) -> Result<(Expr, Inferred)> {
        match expr {
            Expr::Const(values) => Ok((expr.clone(), Inferred::scalar(values.len() <= 1))),
            Expr::Global(name) => {
                if self.schema().global(name).is_none() {
                    return Err(QueryError::invalid_query(format!(
                        "unknown global '{}'",
                        name
                    )));
                }
                Ok((expr.clone(), Inferred::scalar(true)))
            }
            Expr::Subject => subject
                .map(|s| (Expr::Subject, s.clone()))
                .ok_or_else(|| QueryError::invalid_query("__subject__ used outside of a shape or filter")),
            Expr::Objects { ty, .. } => {
                let ty = known_type(self.schema(), ty)?;
                let guard = self.guard_for(std::slice::from_ref(&ty), PolicyAction::Read)?;
                Ok((
                    Expr::Objects {
                        ty: ty.clone(),
                        guard,
                    },
                    Inferred::objects(vec![ty], false),
                ))
            }
            Expr::Path(path) => {
                let (source, source_ty) = self.rewrite_expr(&path.source, subject)?;
                let step = step_type(self.schema(), &source_ty, &path.step)?;
                let guard = match (&path.step, step.output.ty.object_types()) {
                    (Step::Pointer(_) | Step::Backlink { .. }, Some(types)) => {
                        self.guard_for(types, PolicyAction::Read)?
                    }
                    _ => None,
                };
                let rewritten = Expr::Path(Box::new(PathExpr {
                    source,
                    step: path.step.clone(),
                    guard,
                    multiplicity: step.multiplicity,
                }));
                Ok((rewritten, step.output))
            }
            Expr::Filter { source, predicate } => {
                let (source, source_ty) = self.rewrite_expr(source, subject)?;
                let element = element_of(&source_ty);
                let (predicate, _) = self.rewrite_expr(predicate, Some(&element))?;
                Ok((source.filter(predicate), source_ty))
            }
            Expr::Not(inner) => {
                let (inner, ty) = self.rewrite_expr(inner, subject)?;
                Ok((inner.negate(), Inferred::scalar(ty.single)))
            }
            Expr::And(terms) | Expr::Or(terms) => {
                let mut rewritten = Vec::with_capacity(terms.len());
                let mut single = true;
                for term in terms {
                    let (term, ty) = self.rewrite_expr(term, subject)?;
                    single &= ty.single;
                    rewritten.push(term);
                }
                let out = if matches!(expr, Expr::And(_)) {
                    Expr::And(rewritten)
                } else {
                    Expr::Or(rewritten)
                };
                Ok((out, Inferred::scalar(single)))
            }
            Expr::Eq(l, r) | Expr::OptEq(l, r) => {
                let (l, lt) = self.rewrite_expr(l, subject)?;
                let (r, rt) = self.rewrite_expr(r, subject)?;
                let out = if matches!(expr, Expr::Eq(..)) {
                    l.equals(r)
                } else {
                    l.opt_equals(r)
                };
                Ok((out, Inferred::scalar(lt.single && rt.single)))
            }
            Expr::In(l, r) => {
                let (l, lt) = self.rewrite_expr(l, subject)?;
                let (r, _) = self.rewrite_expr(r, subject)?;
                Ok((l.is_in(r), Inferred::scalar(lt.single)))
            }
            Expr::Coalesce(l, r) => {
                let (l, lt) = self.rewrite_expr(l, subject)?;
                let (r, rt) = self.rewrite_expr(r, subject)?;
                let ty = Inferred {
                    ty: lt.ty,
                    single: lt.single && rt.single,
                };
                Ok((l.coalesce(r), ty))
            }
            Expr::Exists(inner) => {
                let (inner, _) = self.rewrite_expr(inner, subject)?;
                Ok((inner.exists(), Inferred::scalar(true)))
            }
        }
    }

    fn rewrite_shape(&mut self, shape: &Shape, subject: &Inferred) -> Result<Shape> {
        if subject.ty.object_types().is_none() {
            return Err(QueryError::invalid_query("shape applied to a scalar"));
        }
        let element = element_of(subject);

        let mut names = HashSet::new();
        let mut elements = Vec::with_capacity(shape.elements.len());
        for el in &shape.elements {
            if !names.insert(el.name.as_str()) {
                return Err(QueryError::invalid_query(format!(
                    "duplicate shape element '{}'",
                    el.name
                )));
            }
            let (expr, ty) = self.rewrite_expr(&el.expr, Some(&element))?;
            let nested = match &el.shape {
                Some(nested) => Some(self.rewrite_shape(nested, &ty)?),
                None => None,
            };
            elements.push(ShapeElement {
                name: el.name.clone(),
                expr,
                shape: nested,
                single: ty.single,
            });
        }
        Ok(Shape { elements })
    }

    fn rewrite_select(&mut self, select: &Select) -> Result<Select> {
        let (expr, ty) = self.rewrite_expr(&select.expr, None)?;
        let filter = match &select.filter {
            Some(predicate) => Some(self.rewrite_expr(predicate, Some(&element_of(&ty)))?.0),
            None => None,
        };
        let shape = match &select.shape {
            Some(shape) => Some(self.rewrite_shape(shape, &ty)?),
            None => None,
        };
        Ok(Select {
            expr,
            filter,
            shape,
        })
    }

    fn rewrite_insert(&mut self, insert: &Insert) -> Result<Insert> {
        let schema = self.schema();
        let ty = known_type(schema, &insert.ty)?;
        if schema.object_type(&ty)?.is_abstract {
            return Err(QueryError::invalid_query(format!(
                "cannot insert into abstract object type '{}'",
                ty
            )));
        }

        let mut assigned = HashSet::new();
        let mut fields = Vec::with_capacity(insert.fields.len());
        for (name, value) in &insert.fields {
            if !assigned.insert(name.as_str()) {
                return Err(QueryError::invalid_query(format!(
                    "'{}' is assigned more than once",
                    name
                )));
            }
            let pointer = assignable_pointer(schema, &ty, name)?;
            let value = match value {
                InsertValue::Expr(expr) => {
                    let (expr, value_ty) = self.rewrite_expr(expr, None)?;
                    check_assignment(schema, &ty, pointer, &value_ty.ty)?;
                    InsertValue::Expr(expr)
                }
                InsertValue::Nested(nested) => {
                    let value_ty = StaticType::Objects(vec![nested.ty.clone()]);
                    check_assignment(schema, &ty, pointer, &value_ty)?;
                    InsertValue::Nested(Box::new(self.rewrite_insert(nested)?))
                }
            };
            fields.push((name.clone(), value));
        }

        let declared = std::iter::once(&ty)
            .chain(schema.ancestors_of(&ty))
            .filter_map(|t| schema.get(t))
            .flat_map(|t| t.pointers.iter());
        for pointer in declared {
            if pointer.required && pointer.name != ID_POINTER && !assigned.contains(pointer.name.as_str()) {
                return Err(QueryError::invalid_query(format!(
                    "missing value for required {} '{}' of object type '{}'",
                    pointer.kind_str(),
                    pointer.name,
                    ty
                )));
            }
        }

        let guard = self.guard_for(std::slice::from_ref(&ty), PolicyAction::Insert)?;
        Ok(Insert { ty, fields, guard })
    }

    /// Type a mutation target and guard it with the mutation's action
    fn rewrite_target(&mut self, target: &Expr, action: PolicyAction) -> Result<(Expr, TypeName)> {
        let Expr::Objects { ty, .. } = target else {
            return Err(QueryError::invalid_query(format!(
                "{} target must be an object type",
                action
            )));
        };
        let ty = known_type(self.schema(), ty)?;
        let guard = self.guard_for(std::slice::from_ref(&ty), action)?;
        Ok((
            Expr::Objects {
                ty: ty.clone(),
                guard,
            },
            ty,
        ))
    }

    fn rewrite_mutation_filter(&mut self, filter: &Option<Expr>, ty: &TypeName) -> Result<Option<Expr>> {
        let element = Inferred::objects(vec![ty.clone()], true);
        match filter {
            Some(predicate) => Ok(Some(self.rewrite_expr(predicate, Some(&element))?.0)),
            None => Ok(None),
        }
    }

    fn rewrite_update(&mut self, update: &Update) -> Result<Update> {
        let (target, ty) = self.rewrite_target(&update.target, PolicyAction::Update)?;
        let filter = self.rewrite_mutation_filter(&update.filter, &ty)?;
        let element = Inferred::objects(vec![ty.clone()], true);

        let schema = self.schema();
        let mut assigned = HashSet::new();
        let mut set = Vec::with_capacity(update.set.len());
        for (name, value) in &update.set {
            if !assigned.insert(name.as_str()) {
                return Err(QueryError::invalid_query(format!(
                    "'{}' is assigned more than once",
                    name
                )));
            }
            let pointer = assignable_pointer(schema, &ty, name)?;
            let (value, value_ty) = self.rewrite_expr(value, Some(&element))?;
            check_assignment(schema, &ty, pointer, &value_ty.ty)?;
            set.push((name.clone(), value));
        }

        Ok(Update {
            target,
            filter,
            set,
        })
    }

    fn rewrite_delete(&mut self, delete: &Delete) -> Result<Delete> {
        let (target, ty) = self.rewrite_target(&delete.target, PolicyAction::Delete)?;
        let filter = self.rewrite_mutation_filter(&delete.filter, &ty)?;
        Ok(Delete { target, filter })
    }
}

/// Type of one element of a set, as seen by a filter or shape
fn element_of(set: &Inferred) -> Inferred {
    Inferred {
        ty: set.ty.clone(),
        single: true,
    }
}

fn assignable_pointer<'s>(schema: &'s Schema, ty: &TypeName, name: &str) -> Result<&'s Pointer> {
    if name == ID_POINTER {
        return Err(QueryError::invalid_query(format!(
            "cannot assign to '{}'",
            ID_POINTER
        )));
    }
    schema.pointer(ty, name).ok_or_else(|| {
        QueryError::invalid_query(format!(
            "object type '{}' has no link or property '{}'",
            ty, name
        ))
    })
}

fn check_assignment(
    schema: &Schema,
    ty: &TypeName,
    pointer: &Pointer,
    value: &StaticType,
) -> Result<()> {
    let compatible = match value {
        StaticType::Scalar => !pointer.is_link(),
        StaticType::Objects(types) => {
            pointer.is_link()
                && types.iter().all(|t| {
                    pointer
                        .target_types()
                        .iter()
                        .any(|target| schema.is_subtype(t, target))
                })
        }
    };
    if compatible {
        Ok(())
    } else {
        Err(QueryError::invalid_query(format!(
            "invalid value for {} '{}' of object type '{}'",
            pointer.kind_str(),
            pointer.name,
            ty
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_db_core::{AccessPolicy, ActionSet, GlobalDef, ObjectType, ScalarType, SessionContext};
    use keel_db_policy::{PolicyEngine, PolicyOptions};

    fn make_engine() -> Arc<PolicyEngine> {
        let schema = Schema::builder()
            .object_type(
                ObjectType::new("Tgt")
                    .pointer(Pointer::property("b", ScalarType::Bool).required())
                    .policy(AccessPolicy::allow(
                        "redact",
                        ActionSet::read(),
                        Expr::global("filter_owned").negate(),
                    ))
                    .policy(AccessPolicy::allow("dml_always", ActionSet::write(), Expr::bool(true))),
            )
            .object_type(
                ObjectType::new("Ptr").pointer(Pointer::link("tgt", "Tgt").required()),
            )
            .global(
                GlobalDef::new("filter_owned", ScalarType::Bool)
                    .required()
                    .with_default(false),
            )
            .build()
            .unwrap();
        Arc::new(PolicyEngine::new(Arc::new(schema)).unwrap())
    }

    fn filtered_ctx(engine: &Arc<PolicyEngine>) -> PolicyContext {
        PolicyContext::new(
            Arc::clone(engine),
            SessionContext::new().with_global("filter_owned", true),
            PolicyOptions::default(),
        )
    }

    fn path_of(expr: &Expr) -> &PathExpr {
        match expr {
            Expr::Path(path) => path,
            other => panic!("expected path, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_hop_gets_guard_and_multiplicity() {
        let engine = make_engine();
        let ctx = filtered_ctx(&engine);
        let mut rewriter = PolicyRewriter::new(&ctx);

        let (expr, ty) = rewriter
            .rewrite_expr(&Expr::objects("Ptr").ptr("tgt"), None)
            .unwrap();
        let path = path_of(&expr);
        let guard = path.guard.as_ref().unwrap();
        assert_eq!(guard.action, PolicyAction::Read);
        assert_eq!(guard.filter_for("Tgt"), Some(&Expr::bool(false)));
        let mult = path.multiplicity.as_ref().unwrap();
        assert_eq!((mult.owner.as_str(), mult.pointer.as_str()), ("Ptr", "tgt"));
        assert!(mult.required && mult.single);
        assert_eq!(ty.ty, StaticType::Objects(vec![TypeName::new("Tgt")]));

        // Ptr itself has no policies
        assert!(matches!(&path.source, Expr::Objects { guard: None, .. }));
    }

    #[test]
    fn test_backlink_uses_same_guard() {
        let engine = make_engine();
        let ctx = filtered_ctx(&engine);
        let mut rewriter = PolicyRewriter::new(&ctx);

        let forward = rewriter.guard_for(&[TypeName::new("Tgt")], PolicyAction::Read).unwrap();
        let (expr, ty) = rewriter
            .rewrite_expr(&Expr::objects("Tgt").backlink("tgt"), None)
            .unwrap();
        // sources of `tgt` are Ptr objects, which are unrestricted
        assert_eq!(ty.ty, StaticType::Objects(vec![TypeName::new("Ptr")]));
        assert!(path_of(&expr).guard.is_none());
        assert!(path_of(&expr).multiplicity.is_none());

        let (expr, _) = rewriter
            .rewrite_expr(&Expr::objects("Tgt"), None)
            .unwrap();
        let Expr::Objects { guard, .. } = expr else {
            panic!("expected objects");
        };
        assert!(Arc::ptr_eq(guard.as_ref().unwrap(), forward.as_ref().unwrap()));
    }

    #[test]
    fn test_mutation_targets_use_their_action() {
        let engine = make_engine();
        let ctx = filtered_ctx(&engine);
        let mut rewriter = PolicyRewriter::new(&ctx);

        let stmt = rewriter
            .rewrite(Delete::new(Expr::objects("Tgt")).into())
            .unwrap();
        let Statement::Delete(delete) = stmt else {
            panic!("expected delete");
        };
        // dml_always makes DELETE unrestricted even though READ is redacted
        assert!(matches!(delete.target, Expr::Objects { guard: None, .. }));
    }

    #[test]
    fn test_bypass_injects_nothing() {
        let engine = make_engine();
        let ctx = PolicyContext::root(engine);
        let mut rewriter = PolicyRewriter::new(&ctx);
        let (expr, _) = rewriter
            .rewrite_expr(&Expr::objects("Ptr").ptr("tgt"), None)
            .unwrap();
        let path = path_of(&expr);
        assert!(path.guard.is_none());
        assert!(path.multiplicity.is_some());
        assert_eq!(rewriter.guard_sites(), 0);
    }

    #[test]
    fn test_invalid_queries() {
        let engine = make_engine();
        let ctx = filtered_ctx(&engine);
        let mut rewriter = PolicyRewriter::new(&ctx);

        let unknown_type = rewriter.rewrite(Select::new(Expr::objects("Nope")).into());
        assert!(matches!(unknown_type, Err(QueryError::InvalidQuery(_))));

        let unknown_ptr = rewriter.rewrite(Select::new(Expr::objects("Ptr").ptr("nope")).into());
        assert!(matches!(unknown_ptr, Err(QueryError::InvalidQuery(_))));

        let missing_required = rewriter.rewrite(Insert::new("Ptr").into());
        assert!(matches!(missing_required, Err(QueryError::InvalidQuery(msg)) if msg.contains("tgt")));

        let wrong_value = rewriter.rewrite(Insert::new("Tgt").set("b", Expr::objects("Ptr")).into());
        assert!(matches!(wrong_value, Err(QueryError::InvalidQuery(_))));

        let subject = rewriter.rewrite(Select::new(Expr::subject()).into());
        assert!(matches!(subject, Err(QueryError::InvalidQuery(_))));
    }
}
