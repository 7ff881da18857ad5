//! Error types for keel-db-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Reference to an object type the schema does not declare
    #[error("Unknown object type: {0}")]
    UnknownType(String),

    /// Schema definition rejected at build time
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Operator applied to a value of the wrong kind
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Object not present in the store
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Create an unknown type error
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Error::UnknownType(name.into())
    }

    /// Create an invalid schema error
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Error::InvalidSchema(msg.into())
    }

    /// Create a type mismatch error
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Error::TypeMismatch(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}
