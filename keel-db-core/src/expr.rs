//! Expression tree
//!
//! The expression language shared by access-policy predicates (WHEN / USING)
//! and compiled query bodies. Expressions evaluate to *sets* of values; a
//! single value is a one-element set and "null" is the empty set.
//!
//! Path hops carry optional compiler-inserted metadata:
//! - an [`AccessGuard`] naming the per-type visibility filters to apply to
//!   the objects the hop produces
//! - a [`PointerMultiplicity`] recording the declared cardinality of the
//!   traversed link, so violations can be detected after filtering
//!
//! Both are `None` in user-written expressions and are filled in by the
//! query rewriter.

use crate::access::PolicyAction;
use crate::name::TypeName;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single navigation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Forward traversal of a link or property (`.owner`)
    Pointer(String),
    /// Reverse traversal of a link (`.<references`, `.<references[IS User]`)
    Backlink {
        link: String,
        source: Option<TypeName>,
    },
    /// Type intersection (`[IS Issue]`)
    Is(TypeName),
}

/// Visibility filters for the objects produced by a hop or set reference.
///
/// Keyed by concrete type. A concrete type with no entry is unrestricted.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessGuard {
    pub action: PolicyAction,
    pub filters: BTreeMap<TypeName, Expr>,
}

impl AccessGuard {
    pub fn new(action: PolicyAction) -> Self {
        Self {
            action,
            filters: BTreeMap::new(),
        }
    }

    /// Filter for objects of exactly `ty`, if that type is restricted
    pub fn filter_for(&self, ty: &str) -> Option<&Expr> {
        self.filters.get(ty)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Declared multiplicity of a traversed link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerMultiplicity {
    /// Type that declares the pointer (used in violation messages)
    pub owner: TypeName,
    pub pointer: String,
    pub required: bool,
    pub single: bool,
}

/// One path hop with its compiler metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub source: Expr,
    pub step: Step,
    pub guard: Option<Arc<AccessGuard>>,
    pub multiplicity: Option<PointerMultiplicity>,
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal set
    Const(Vec<Value>),
    /// Session global (`global cur_user`)
    Global(String),
    /// The object currently in scope (`__subject__`, or the shape/filter element)
    Subject,
    /// Every object of a type and its subtypes
    Objects {
        ty: TypeName,
        guard: Option<Arc<AccessGuard>>,
    },
    Path(Box<PathExpr>),
    /// Keep elements of `source` for which `predicate` contains `true`
    Filter {
        source: Box<Expr>,
        predicate: Box<Expr>,
    },
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// `=`
    Eq(Box<Expr>, Box<Expr>),
    /// `?=` (two empty sets are equal)
    OptEq(Box<Expr>, Box<Expr>),
    /// `IN`
    In(Box<Expr>, Box<Expr>),
    /// `??`
    Coalesce(Box<Expr>, Box<Expr>),
    Exists(Box<Expr>),
}

impl Expr {
    pub fn bool(value: bool) -> Self {
        Expr::Const(vec![Value::Bool(value)])
    }

    pub fn int(value: i64) -> Self {
        Expr::Const(vec![Value::Int(value)])
    }

    pub fn string(value: impl AsRef<str>) -> Self {
        Expr::Const(vec![Value::str(value)])
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Const(vec![value.into()])
    }

    /// The empty set
    pub fn empty() -> Self {
        Expr::Const(Vec::new())
    }

    pub fn global(name: impl Into<String>) -> Self {
        Expr::Global(name.into())
    }

    pub fn subject() -> Self {
        Expr::Subject
    }

    pub fn objects(ty: impl Into<TypeName>) -> Self {
        Expr::Objects {
            ty: ty.into(),
            guard: None,
        }
    }

    /// Conjunction of all terms (`true` when empty)
    pub fn all(terms: Vec<Expr>) -> Self {
        Expr::And(terms)
    }

    /// Disjunction of all terms (`false` when empty)
    pub fn any(terms: Vec<Expr>) -> Self {
        Expr::Or(terms)
    }

    fn step(self, step: Step) -> Self {
        Expr::Path(Box::new(PathExpr {
            source: self,
            step,
            guard: None,
            multiplicity: None,
        }))
    }

    /// `.name`
    pub fn ptr(self, name: impl Into<String>) -> Self {
        self.step(Step::Pointer(name.into()))
    }

    /// `.<link`
    pub fn backlink(self, link: impl Into<String>) -> Self {
        self.step(Step::Backlink {
            link: link.into(),
            source: None,
        })
    }

    /// `.<link[IS ty]`
    pub fn backlink_from(self, link: impl Into<String>, ty: impl Into<TypeName>) -> Self {
        self.step(Step::Backlink {
            link: link.into(),
            source: Some(ty.into()),
        })
    }

    /// `[IS ty]`
    pub fn is(self, ty: impl Into<TypeName>) -> Self {
        self.step(Step::Is(ty.into()))
    }

    /// `self FILTER predicate`
    pub fn filter(self, predicate: Expr) -> Self {
        Expr::Filter {
            source: Box::new(self),
            predicate: Box::new(predicate),
        }
    }

    /// `NOT self`
    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// `self = other`
    pub fn equals(self, other: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    /// `self ?= other`
    pub fn opt_equals(self, other: Expr) -> Self {
        Expr::OptEq(Box::new(self), Box::new(other))
    }

    /// `self IN set`
    pub fn is_in(self, set: Expr) -> Self {
        Expr::In(Box::new(self), Box::new(set))
    }

    /// `self ?? fallback`
    pub fn coalesce(self, fallback: Expr) -> Self {
        Expr::Coalesce(Box::new(self), Box::new(fallback))
    }

    /// `EXISTS self`
    pub fn exists(self) -> Self {
        Expr::Exists(Box::new(self))
    }

    /// `Some(b)` if this is the literal singleton `{b}`
    pub fn as_const_bool(&self) -> Option<bool> {
        match self {
            Expr::Const(values) if values.len() == 1 => values[0].as_bool(),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// True if evaluation depends on the object in scope.
    ///
    /// Filter predicates rebind the subject, so only their source counts.
    pub fn references_subject(&self) -> bool {
        match self {
            Expr::Subject => true,
            Expr::Const(_) | Expr::Global(_) | Expr::Objects { .. } => false,
            Expr::Path(path) => path.source.references_subject(),
            Expr::Filter { source, .. } => source.references_subject(),
            Expr::Not(inner) | Expr::Exists(inner) => inner.references_subject(),
            Expr::And(terms) | Expr::Or(terms) => terms.iter().any(Expr::references_subject),
            Expr::Eq(l, r) | Expr::OptEq(l, r) | Expr::In(l, r) | Expr::Coalesce(l, r) => {
                l.references_subject() || r.references_subject()
            }
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Pointer(name) => write!(f, ".{}", name),
            Step::Backlink { link, source: None } => write!(f, ".<{}", link),
            Step::Backlink {
                link,
                source: Some(ty),
            } => write!(f, ".<{}[IS {}]", link, ty),
            Step::Is(ty) => write!(f, "[IS {}]", ty),
        }
    }
}

/// Compact EdgeQL-like rendering, used in debug logging
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, terms: &[Expr], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", term)?;
            }
            write!(f, ")")
        }

        match self {
            Expr::Const(values) if values.len() == 1 => write!(f, "{}", values[0]),
            Expr::Const(values) => {
                write!(f, "{{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
            Expr::Global(name) => write!(f, "global {}", name),
            Expr::Subject => write!(f, "__subject__"),
            Expr::Objects { ty, .. } => write!(f, "{}", ty),
            Expr::Path(path) => write!(f, "{}{}", path.source, path.step),
            Expr::Filter { source, predicate } => write!(f, "({} FILTER {})", source, predicate),
            Expr::Not(inner) => write!(f, "NOT {}", inner),
            Expr::And(terms) if terms.is_empty() => write!(f, "true"),
            Expr::Or(terms) if terms.is_empty() => write!(f, "false"),
            Expr::And(terms) => join(f, terms, "AND"),
            Expr::Or(terms) => join(f, terms, "OR"),
            Expr::Eq(l, r) => write!(f, "({} = {})", l, r),
            Expr::OptEq(l, r) => write!(f, "({} ?= {})", l, r),
            Expr::In(l, r) => write!(f, "({} IN {})", l, r),
            Expr::Coalesce(l, r) => write!(f, "({} ?? {})", l, r),
            Expr::Exists(inner) => write!(f, "EXISTS {}", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_produce_paths() {
        let expr = Expr::subject().ptr("owner").ptr("name");
        let Expr::Path(outer) = &expr else {
            panic!("expected path");
        };
        assert_eq!(outer.step, Step::Pointer("name".into()));
        assert!(outer.guard.is_none());
        assert!(matches!(&outer.source, Expr::Path(inner) if inner.source == Expr::Subject));
    }

    #[test]
    fn test_const_bool() {
        assert_eq!(Expr::bool(true).as_const_bool(), Some(true));
        assert_eq!(Expr::empty().as_const_bool(), None);
        assert_eq!(Expr::string("x").as_const_bool(), None);
    }

    #[test]
    fn test_references_subject() {
        assert!(Expr::subject().ptr("owner").references_subject());
        assert!(!Expr::global("cur_user").references_subject());
        // predicate subject is rebound to the filtered element
        let filtered = Expr::objects("User").filter(Expr::subject().ptr("name").equals(Expr::string("Yury")));
        assert!(!filtered.references_subject());
        assert!(Expr::global("cur_user")
            .is_in(Expr::subject().ptr("watchers").ptr("name"))
            .coalesce(Expr::bool(false))
            .references_subject());
    }

    #[test]
    fn test_display() {
        let expr = Expr::subject()
            .ptr("owner")
            .ptr("name")
            .opt_equals(Expr::global("cur_user"));
        assert_eq!(expr.to_string(), "(__subject__.owner.name ?= global cur_user)");
        assert_eq!(
            Expr::objects("URL").backlink_from("references", "User").to_string(),
            "URL.<references[IS User]"
        );
        assert_eq!(Expr::all(vec![]).to_string(), "true");
    }
}
