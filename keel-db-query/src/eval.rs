//! Expression evaluator
//!
//! Evaluates rewritten expressions against a [`DataSource`]. Access guards
//! attached by the rewriter are applied as objects are produced, and link
//! hops carrying multiplicity metadata are passed through the cardinality
//! enforcer per source object. Guard filters are themselves evaluated by
//! this evaluator; they carry no guards, so they see unfiltered data.

use crate::enforce::{enforce, HopResult};
use crate::error::{QueryError, Result};
use keel_db_core::{
    ops, AccessGuard, DataSource, Expr, ObjectId, PathExpr, Schema, SessionContext, Step,
    TypeName, Value, ID_POINTER,
};

/// Evaluates expressions for one request
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    schema: &'a Schema,
    source: &'a dyn DataSource,
    session: &'a SessionContext,
}

impl std::fmt::Debug for Evaluator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("schema_version", &self.schema.version())
            .finish_non_exhaustive()
    }
}

impl<'a> Evaluator<'a> {
    pub fn new(schema: &'a Schema, source: &'a dyn DataSource, session: &'a SessionContext) -> Self {
        Self {
            schema,
            source,
            session,
        }
    }

    /// Evaluate `expr` with `subject` as the object in scope
    pub fn eval(&self, expr: &Expr, subject: Option<&Value>) -> Result<Vec<Value>> {
        match expr {
            Expr::Const(values) => Ok(values.clone()),
            Expr::Global(name) => Ok(self.session.lookup(self.schema, name)),
            Expr::Subject => subject
                .map(|s| vec![s.clone()])
                .ok_or_else(|| QueryError::internal("no subject in scope")),
            Expr::Objects { ty, guard } => {
                let mut out = Vec::new();
                for concrete in self.schema.concrete_types(ty)? {
                    for id in self.source.instances_of(&concrete) {
                        if self.admit_typed(guard.as_deref(), id, &concrete)? {
                            out.push(Value::Object(id));
                        }
                    }
                }
                Ok(out)
            }
            Expr::Path(path) => {
                let sources = self.eval(&path.source, subject)?;
                let mut out = Vec::new();
                for from in &sources {
                    self.step(path, from, &mut out)?;
                }
                Ok(ops::dedup_objects(out))
            }
            Expr::Filter { source, predicate } => {
                let values = self.eval(source, subject)?;
                self.keep(values, predicate)
            }
            Expr::Not(inner) => Ok(ops::not(&self.eval(inner, subject)?)?),
            Expr::And(terms) => {
                let mut acc = vec![Value::Bool(true)];
                for term in terms {
                    acc = ops::and(&acc, &self.eval(term, subject)?)?;
                }
                Ok(acc)
            }
            Expr::Or(terms) => {
                let mut acc = vec![Value::Bool(false)];
                for term in terms {
                    acc = ops::or(&acc, &self.eval(term, subject)?)?;
                }
                Ok(acc)
            }
            Expr::Eq(l, r) => Ok(ops::eq(&self.eval(l, subject)?, &self.eval(r, subject)?)?),
            Expr::OptEq(l, r) => Ok(ops::opt_eq(&self.eval(l, subject)?, &self.eval(r, subject)?)?),
            Expr::In(l, r) => Ok(ops::is_in(&self.eval(l, subject)?, &self.eval(r, subject)?)?),
            Expr::Coalesce(l, r) => {
                let left = self.eval(l, subject)?;
                if left.is_empty() {
                    self.eval(r, subject)
                } else {
                    Ok(left)
                }
            }
            Expr::Exists(inner) => Ok(ops::exists(&self.eval(inner, subject)?)),
        }
    }

    /// Keep the elements of `values` for which `predicate` yields `true`
    pub fn keep(&self, values: Vec<Value>, predicate: &Expr) -> Result<Vec<Value>> {
        let mut kept = Vec::with_capacity(values.len());
        for value in values {
            if ops::is_true(&self.eval(predicate, Some(&value))?) {
                kept.push(value);
            }
        }
        Ok(kept)
    }

    /// Whether `guard` admits object `id`
    pub fn admits(&self, guard: Option<&AccessGuard>, id: ObjectId) -> Result<bool> {
        let Some(guard) = guard else {
            return Ok(true);
        };
        match self.source.type_of(id) {
            Some(ty) => self.admit_typed(Some(guard), id, &ty),
            None => Ok(false),
        }
    }

    fn admit_typed(&self, guard: Option<&AccessGuard>, id: ObjectId, ty: &TypeName) -> Result<bool> {
        match guard.and_then(|g| g.filter_for(ty)) {
            None => Ok(true),
            Some(filter) => Ok(ops::is_true(&self.eval(filter, Some(&Value::Object(id)))?)),
        }
    }

    fn step(&self, path: &PathExpr, from: &Value, out: &mut Vec<Value>) -> Result<()> {
        let Some(id) = from.as_object() else {
            return Err(QueryError::internal(format!(
                "cannot apply '{}' to {}",
                path.step, from
            )));
        };

        match &path.step {
            Step::Pointer(name) if name == ID_POINTER => {
                out.push(Value::Uuid(id.as_uuid()));
            }
            Step::Pointer(name) => {
                let stored = self.source.pointer_values(id, name);
                let structural = stored.len();
                let mut visible = Vec::with_capacity(structural);
                for value in stored {
                    let admitted = match value.as_object() {
                        Some(target) => self.admits(path.guard.as_deref(), target)?,
                        None => true,
                    };
                    if admitted {
                        visible.push(value);
                    }
                }
                let visible = match &path.multiplicity {
                    Some(multiplicity) => enforce(HopResult::new(structural, visible), multiplicity)?,
                    None => visible,
                };
                out.extend(visible);
            }
            Step::Backlink { link, source: only } => {
                for referrer in self.source.referrers(id, link) {
                    let Some(ty) = self.source.type_of(referrer) else {
                        continue;
                    };
                    if only.as_ref().is_some_and(|only| !self.schema.is_subtype(&ty, only)) {
                        continue;
                    }
                    if self.admit_typed(path.guard.as_deref(), referrer, &ty)? {
                        out.push(Value::Object(referrer));
                    }
                }
            }
            Step::Is(ty) => {
                if self
                    .source
                    .type_of(id)
                    .is_some_and(|actual| self.schema.is_subtype(&actual, ty))
                {
                    out.push(from.clone());
                }
            }
        }
        Ok(())
    }
}
