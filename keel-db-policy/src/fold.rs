//! Partial evaluation of policy predicates
//!
//! Substitutes session globals and folds every operator whose operands are
//! all constant, using the same set semantics as the query evaluator
//! (`keel_db_core::ops`). Subtrees that depend on the candidate object are
//! left in place.

use keel_db_core::{ops, Expr, Result, Schema, SessionContext, Value};

/// Fold `expr` against the session's global bindings.
pub fn fold(expr: &Expr, schema: &Schema, session: &SessionContext) -> Result<Expr> {
    let folded = match expr {
        Expr::Const(_) | Expr::Subject | Expr::Objects { .. } => expr.clone(),
        Expr::Global(name) => Expr::Const(session.lookup(schema, name)),
        Expr::Path(path) => {
            let mut path = (**path).clone();
            path.source = fold(&path.source, schema, session)?;
            Expr::Path(Box::new(path))
        }
        Expr::Filter { source, predicate } => Expr::Filter {
            source: Box::new(fold(source, schema, session)?),
            predicate: Box::new(fold(predicate, schema, session)?),
        },
        Expr::Not(inner) => match fold(inner, schema, session)? {
            Expr::Const(values) => Expr::Const(ops::not(&values)?),
            other => other.negate(),
        },
        Expr::And(terms) => fold_junction(terms, true, schema, session)?,
        Expr::Or(terms) => fold_junction(terms, false, schema, session)?,
        Expr::Eq(l, r) => fold_binary(l, r, schema, session, Expr::Eq, ops::eq)?,
        Expr::OptEq(l, r) => fold_binary(l, r, schema, session, Expr::OptEq, ops::opt_eq)?,
        Expr::In(l, r) => fold_binary(l, r, schema, session, Expr::In, ops::is_in)?,
        Expr::Coalesce(l, r) => match fold(l, schema, session)? {
            Expr::Const(values) if !values.is_empty() => Expr::Const(values),
            Expr::Const(_) => fold(r, schema, session)?,
            other => other.coalesce(fold(r, schema, session)?),
        },
        Expr::Exists(inner) => match fold(inner, schema, session)? {
            Expr::Const(values) => Expr::Const(ops::exists(&values)),
            other => other.exists(),
        },
    };
    Ok(folded)
}

fn fold_binary(
    l: &Expr,
    r: &Expr,
    schema: &Schema,
    session: &SessionContext,
    rebuild: fn(Box<Expr>, Box<Expr>) -> Expr,
    op: fn(&[Value], &[Value]) -> Result<Vec<Value>>,
) -> Result<Expr> {
    let l = fold(l, schema, session)?;
    let r = fold(r, schema, session)?;
    match (&l, &r) {
        (Expr::Const(a), Expr::Const(b)) => Ok(Expr::Const(op(a, b)?)),
        _ => Ok(rebuild(Box::new(l), Box::new(r))),
    }
}

/// Fold an AND (`conjunction`) or OR node.
///
/// The identity constant is dropped from the term list. The absorbing
/// constant short-circuits only when every term is a singleton boolean,
/// since an empty operand would otherwise make the whole product empty.
fn fold_junction(
    terms: &[Expr],
    conjunction: bool,
    schema: &Schema,
    session: &SessionContext,
) -> Result<Expr> {
    let identity = conjunction;
    let mut folded = Vec::with_capacity(terms.len());
    for term in terms {
        match fold(term, schema, session)? {
            Expr::And(inner) if conjunction => folded.extend(inner),
            Expr::Or(inner) if !conjunction => folded.extend(inner),
            other => folded.push(other),
        }
    }

    if folded.iter().all(Expr::is_const) {
        let mut acc = vec![Value::Bool(identity)];
        for term in &folded {
            if let Expr::Const(values) = term {
                acc = if conjunction {
                    ops::and(&acc, values)?
                } else {
                    ops::or(&acc, values)?
                };
            }
        }
        return Ok(Expr::Const(acc));
    }

    if folded.iter().all(is_singleton_bool)
        && folded.iter().any(|t| t.as_const_bool() == Some(!identity))
    {
        return Ok(Expr::bool(!identity));
    }

    folded.retain(|t| t.as_const_bool() != Some(identity));
    Ok(match folded.len() {
        0 => Expr::bool(identity),
        1 => folded.swap_remove(0),
        _ if conjunction => Expr::And(folded),
        _ => Expr::Or(folded),
    })
}

/// True if `expr` always evaluates to exactly one boolean.
pub(crate) fn is_singleton_bool(expr: &Expr) -> bool {
    match expr {
        Expr::Const(values) => values.len() == 1 && values[0].as_bool().is_some(),
        Expr::Exists(_) => true,
        Expr::In(l, _) => matches!(&**l, Expr::Const(values) if values.len() == 1),
        Expr::Not(inner) => is_singleton_bool(inner),
        Expr::And(terms) | Expr::Or(terms) => terms.iter().all(is_singleton_bool),
        _ => false,
    }
}
