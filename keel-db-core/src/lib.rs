//! # Keel DB Core
//!
//! Shared model for the keel query compiler and its access-policy engine.
//!
//! This crate provides:
//! - Schema snapshots: object types, pointers, inheritance closures, globals
//! - Declared access policies (`AccessPolicy`, `PolicyAction`, `ActionSet`)
//! - The expression tree used by policy predicates and compiled queries
//! - Set-operator semantics shared by compile-time folding and execution
//! - Session globals and the storage traits the executor reads through
//!
//! ## Example
//!
//! ```ignore
//! use keel_db_core::{Schema, ObjectType, Pointer, ScalarType};
//!
//! let schema = Schema::builder()
//!     .object_type(ObjectType::new("User").pointer(Pointer::property("name", ScalarType::Str)))
//!     .build()?;
//! assert_eq!(schema.ancestors_of("User")[0].as_str(), "Object");
//! ```

pub mod access;
pub mod error;
pub mod expr;
pub mod name;
pub mod ops;
pub mod schema;
pub mod session;
pub mod store;
pub mod value;

pub use access::{AccessPolicy, ActionSet, PolicyAction, PolicyEffect};
pub use error::{Error, Result};
pub use expr::{AccessGuard, Expr, PathExpr, PointerMultiplicity, Step};
pub use name::{TypeName, ID_POINTER, ROOT_TYPE};
pub use schema::{
    Cardinality, GlobalDef, ObjectType, Pointer, PointerTarget, Schema, SchemaBuilder,
};
pub use session::SessionContext;
pub use store::{DataSink, DataSource, MemoryStore};
pub use value::{ObjectId, ScalarType, Value};
