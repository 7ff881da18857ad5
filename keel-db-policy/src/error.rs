//! Policy error types

use thiserror::Error;

/// Policy-related errors
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Type referenced by a lookup is not in the schema snapshot
    #[error("Unknown object type: {name}")]
    UnknownType { name: String },

    /// Declared policy violates a catalog invariant
    #[error("Invalid access policy '{policy}' on '{ty}': {message}")]
    InvalidPolicy {
        ty: String,
        policy: String,
        message: String,
    },

    /// Installing a schema older than the current snapshot
    #[error("Stale schema: version {offered} is older than installed version {installed}")]
    StaleSchema { installed: u64, offered: u64 },

    /// Error folding a predicate
    #[error(transparent)]
    Core(#[from] keel_db_core::Error),

    /// Internal policy error
    #[error("Policy error: {message}")]
    Internal { message: String },
}

impl PolicyError {
    /// Create an unknown type error
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Create an invalid policy error
    pub fn invalid_policy(
        ty: impl Into<String>,
        policy: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidPolicy {
            ty: ty.into(),
            policy: policy.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type alias for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;
