//! Error types for query compilation and execution

use keel_db_policy::PolicyError;
use thiserror::Error;

/// Query errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// A declared multiplicity was broken at run time, typically because a
    /// policy redacted the only target of a required link
    #[error("{0}")]
    CardinalityViolation(String),

    /// An inserted object does not satisfy its type's INSERT policies
    #[error("{message}")]
    AccessPolicyViolation { ty: String, message: String },

    /// Unknown type, pointer or global, or a malformed statement
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Error from keel-db-policy
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Error from keel-db-core
    #[error("Core error: {0}")]
    Core(#[from] keel_db_core::Error),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn cardinality_violation(message: impl Into<String>) -> Self {
        Self::CardinalityViolation(message.into())
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// INSERT policy rejected a new object of `ty`
    pub fn insert_violation(ty: impl Into<String>) -> Self {
        let ty = ty.into();
        Self::AccessPolicyViolation {
            message: format!("access policy violation on insert of {}", ty),
            ty,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for errors raised at run time rather than during compilation
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Self::CardinalityViolation(_) | Self::AccessPolicyViolation { .. }
        )
    }
}

/// Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;
