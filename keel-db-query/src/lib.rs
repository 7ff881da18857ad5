//! Policy-aware query rewriting and execution for Keel
//!
//! This crate sits between the query compiler front end and storage:
//!
//! - [`PolicyRewriter`]: types a statement and splices access guards into
//!   every place objects of a protected type become observable
//! - [`enforce`]: validates post-filter link hops against declared
//!   multiplicity (the cardinality enforcer)
//! - [`Evaluator`]: evaluates rewritten expressions over a `DataSource`
//! - [`QueryEngine`]: compile + execute, with JSON rendering
//!
//! # Example
//!
//! ```ignore
//! use keel_db_query::{QueryEngine, Select, Shape};
//!
//! let engine = QueryEngine::new(policy_engine);
//! let ctx = engine.context(session, PolicyOptions::default());
//! let rows = engine.query(&store, &ctx, Select::new(Expr::objects("Ptr")).shape(Shape::new().field("tgt")))?;
//! ```

mod enforce;
mod error;
mod eval;
mod execute;
mod infer;
mod ir;
mod rewrite;

pub use enforce::{enforce, HopResult};
pub use error::{QueryError, Result};
pub use eval::Evaluator;
pub use execute::QueryEngine;
pub use infer::{step_type, Inferred, StaticType, StepType};
pub use ir::{Delete, Insert, InsertValue, Select, Shape, ShapeElement, Statement, Update};
pub use rewrite::PolicyRewriter;
