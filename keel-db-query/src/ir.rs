//! Statement tree handed over by the query compiler front end.
//!
//! Expressions inside statements are plain [`Expr`] trees. The rewriter
//! returns the same statement types with guards and multiplicity metadata
//! filled in; the executor runs rewritten statements only.

use keel_db_core::{AccessGuard, Expr, PolicyAction, TypeName};
use std::sync::Arc;

/// One projected element of a shape
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeElement {
    pub name: String,
    /// Evaluated with the enclosing object as subject
    pub expr: Expr,
    pub shape: Option<Shape>,
    /// Renders as a value or `null` instead of an array. Set by the rewriter.
    pub single: bool,
}

/// Projection over objects: `{ name, owner: { name }, z := .tgt.b }`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    pub elements: Vec<ShapeElement>,
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: impl Into<String>, expr: Expr, shape: Option<Shape>) -> Self {
        self.elements.push(ShapeElement {
            name: name.into(),
            expr,
            shape,
            single: false,
        });
        self
    }

    /// `name` (a pointer of the subject)
    pub fn field(self, name: &str) -> Self {
        self.push(name, Expr::subject().ptr(name), None)
    }

    /// `name := expr`
    pub fn computed(self, name: impl Into<String>, expr: Expr) -> Self {
        self.push(name, expr, None)
    }

    /// `name: { ... }`
    pub fn nested(self, name: &str, shape: Shape) -> Self {
        self.push(name, Expr::subject().ptr(name), Some(shape))
    }

    /// `name := expr { ... }`
    pub fn computed_nested(self, name: impl Into<String>, expr: Expr, shape: Shape) -> Self {
        self.push(name, expr, Some(shape))
    }
}

/// `SELECT expr [FILTER filter] [shape]`
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub expr: Expr,
    pub filter: Option<Expr>,
    pub shape: Option<Shape>,
}

impl Select {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            filter: None,
            shape: None,
        }
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }
}

/// Value assigned to a pointer in an INSERT
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    Expr(Expr),
    /// `tgt := (insert Tgt { ... })`
    Nested(Box<Insert>),
}

/// `INSERT ty { field := value, ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub ty: TypeName,
    pub fields: Vec<(String, InsertValue)>,
    /// INSERT policies of `ty`, checked against the new object. Set by the rewriter.
    pub guard: Option<Arc<AccessGuard>>,
}

impl Insert {
    pub fn new(ty: impl Into<TypeName>) -> Self {
        Self {
            ty: ty.into(),
            fields: Vec::new(),
            guard: None,
        }
    }

    pub fn set(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.fields.push((name.into(), InsertValue::Expr(value)));
        self
    }

    pub fn nested(mut self, name: impl Into<String>, insert: Insert) -> Self {
        self.fields
            .push((name.into(), InsertValue::Nested(Box::new(insert))));
        self
    }
}

/// `UPDATE target [FILTER filter] SET { name := expr, ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Must be a type reference (`Expr::objects`)
    pub target: Expr,
    pub filter: Option<Expr>,
    pub set: Vec<(String, Expr)>,
}

impl Update {
    pub fn new(target: Expr) -> Self {
        Self {
            target,
            filter: None,
            set: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.set.push((name.into(), value));
        self
    }
}

/// `DELETE target [FILTER filter]`
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Must be a type reference (`Expr::objects`)
    pub target: Expr,
    pub filter: Option<Expr>,
}

impl Delete {
    pub fn new(target: Expr) -> Self {
        Self {
            target,
            filter: None,
        }
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(predicate);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    /// Action whose policies govern the statement's primary target
    pub fn action(&self) -> PolicyAction {
        match self {
            Statement::Select(_) => PolicyAction::Read,
            Statement::Insert(_) => PolicyAction::Insert,
            Statement::Update(_) => PolicyAction::Update,
            Statement::Delete(_) => PolicyAction::Delete,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Select(_) => "select",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
        }
    }
}

impl From<Select> for Statement {
    fn from(select: Select) -> Self {
        Statement::Select(select)
    }
}

impl From<Insert> for Statement {
    fn from(insert: Insert) -> Self {
        Statement::Insert(insert)
    }
}

impl From<Update> for Statement {
    fn from(update: Update) -> Self {
        Statement::Update(update)
    }
}

impl From<Delete> for Statement {
    fn from(delete: Delete) -> Self {
        Statement::Delete(delete)
    }
}
