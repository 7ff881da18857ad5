//! Set operators
//!
//! Runtime semantics of the expression operators over value sets. Both the
//! query evaluator and the policy partial evaluator call into this module,
//! so a predicate folded at compile time yields exactly what it would have
//! produced at run time.
//!
//! Binary operators take the cross product of their operands: an empty
//! operand yields an empty result. `?=`, `IN` and `EXISTS` are the
//! exceptions and define their own empty-set behavior; `??` is lazy in its
//! right operand and lives with its callers.

use crate::error::{Error, Result};
use crate::value::{ObjectId, Value};
use std::collections::HashSet;

fn check_comparable(a: &Value, b: &Value) -> Result<()> {
    if a.scalar_type() != b.scalar_type() {
        return Err(Error::type_mismatch(format!(
            "cannot compare {} with {}",
            a, b
        )));
    }
    Ok(())
}

fn expect_bool(v: &Value, op: &str) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| Error::type_mismatch(format!("operand of {} must be bool, got {}", op, v)))
}

/// `l = r`
pub fn eq(left: &[Value], right: &[Value]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for a in left {
        for b in right {
            check_comparable(a, b)?;
            out.push(Value::Bool(a == b));
        }
    }
    Ok(out)
}

/// `l ?= r`: two empty sets are equal, one empty set is unequal.
pub fn opt_eq(left: &[Value], right: &[Value]) -> Result<Vec<Value>> {
    match (left.is_empty(), right.is_empty()) {
        (true, true) => Ok(vec![Value::Bool(true)]),
        (true, false) | (false, true) => Ok(vec![Value::Bool(false)]),
        (false, false) => eq(left, right),
    }
}

/// `l IN r`: one result per element of `l`
pub fn is_in(left: &[Value], right: &[Value]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(left.len());
    for a in left {
        if let Some(b) = right.first() {
            check_comparable(a, b)?;
        }
        out.push(Value::Bool(right.contains(a)));
    }
    Ok(out)
}

/// `NOT s`
pub fn not(set: &[Value]) -> Result<Vec<Value>> {
    set.iter()
        .map(|v| expect_bool(v, "NOT").map(|b| Value::Bool(!b)))
        .collect()
}

fn bool_product(left: &[Value], right: &[Value], op: &str, f: fn(bool, bool) -> bool) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for a in left {
        let a = expect_bool(a, op)?;
        for b in right {
            out.push(Value::Bool(f(a, expect_bool(b, op)?)));
        }
    }
    Ok(out)
}

/// `l AND r`
pub fn and(left: &[Value], right: &[Value]) -> Result<Vec<Value>> {
    bool_product(left, right, "AND", |a, b| a && b)
}

/// `l OR r`
pub fn or(left: &[Value], right: &[Value]) -> Result<Vec<Value>> {
    bool_product(left, right, "OR", |a, b| a || b)
}

/// `EXISTS s`
pub fn exists(set: &[Value]) -> Vec<Value> {
    vec![Value::Bool(!set.is_empty())]
}

/// True if the set contains `true`. Filters keep an element exactly when
/// this holds for its predicate result.
pub fn is_true(set: &[Value]) -> bool {
    set.iter().any(|v| matches!(v, Value::Bool(true)))
}

/// Remove duplicate object references, keeping first occurrence order.
///
/// Scalars are left untouched: multiplicity of scalar results is preserved.
pub fn dedup_objects(values: Vec<Value>) -> Vec<Value> {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    values
        .into_iter()
        .filter(|v| match v.as_object() {
            Some(id) => seen.insert(id),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(v: bool) -> Value {
        Value::Bool(v)
    }

    #[test]
    fn test_eq_cross_product() {
        let left = vec![Value::str("a"), Value::str("b")];
        let right = vec![Value::str("a")];
        assert_eq!(eq(&left, &right).unwrap(), vec![b(true), b(false)]);
        assert!(eq(&left, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_eq_type_mismatch() {
        let err = eq(&[Value::Int(1)], &[Value::str("1")]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn test_opt_eq_empty_handling() {
        assert_eq!(opt_eq(&[], &[]).unwrap(), vec![b(true)]);
        assert_eq!(opt_eq(&[Value::str("Yury")], &[]).unwrap(), vec![b(false)]);
        assert_eq!(
            opt_eq(&[Value::str("Yury")], &[Value::str("Yury")]).unwrap(),
            vec![b(true)]
        );
    }

    #[test]
    fn test_in() {
        let watchers = vec![Value::str("Elvis")];
        assert_eq!(is_in(&[Value::str("Yury")], &watchers).unwrap(), vec![b(false)]);
        assert_eq!(is_in(&[Value::str("Elvis")], &watchers).unwrap(), vec![b(true)]);
        assert!(is_in(&[], &watchers).unwrap().is_empty());
    }

    #[test]
    fn test_bool_ops() {
        assert_eq!(and(&[b(true)], &[b(false)]).unwrap(), vec![b(false)]);
        assert_eq!(or(&[b(true)], &[b(false)]).unwrap(), vec![b(true)]);
        assert!(and(&[], &[b(true)]).unwrap().is_empty());
        assert_eq!(not(&[b(true), b(false)]).unwrap(), vec![b(false), b(true)]);
        assert!(not(&[Value::Int(1)]).is_err());
        assert_eq!(exists(&[]), vec![b(false)]);
    }

    #[test]
    fn test_is_true_and_dedup() {
        assert!(is_true(&[b(false), b(true)]));
        assert!(!is_true(&[]));

        let id = ObjectId::new();
        let values = vec![
            Value::Object(id),
            Value::Int(1),
            Value::Object(id),
            Value::Int(1),
        ];
        assert_eq!(
            dedup_objects(values),
            vec![Value::Object(id), Value::Int(1), Value::Int(1)]
        );
    }
}
