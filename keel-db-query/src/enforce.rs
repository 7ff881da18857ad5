//! Cardinality enforcer
//!
//! Reconciles the objects a link hop produced after policy filtering with
//! the link's declared multiplicity. A required single link whose stored
//! target was redacted is a contract violation, not an absent value: the
//! caller gets a `CardinalityViolation` instead of a silently empty field.
//!
//! No stored targets at all (including a source that no longer exists) is
//! never an error here, and neither is a multi link filtered to nothing.

use crate::error::{QueryError, Result};
use keel_db_core::PointerMultiplicity;

/// Outcome of one hop for one source object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopResult<T> {
    /// Number of targets stored, before any filtering
    pub structural: usize,
    /// Targets that passed the hop's access guard
    pub visible: Vec<T>,
}

impl<T> HopResult<T> {
    pub fn new(structural: usize, visible: Vec<T>) -> Self {
        Self {
            structural,
            visible,
        }
    }

    /// True if filtering removed at least one stored target
    pub fn is_redacted(&self) -> bool {
        self.visible.len() < self.structural
    }
}

/// Validate a hop against its declared multiplicity, returning the visible
/// targets on success.
pub fn enforce<T>(hop: HopResult<T>, multiplicity: &PointerMultiplicity) -> Result<Vec<T>> {
    if multiplicity.required && multiplicity.single && hop.is_redacted() && hop.visible.is_empty() {
        tracing::warn!(
            owner = %multiplicity.owner,
            pointer = %multiplicity.pointer,
            redacted = hop.structural,
            "required link redacted by access policy"
        );
        return Err(QueryError::cardinality_violation(format!(
            "required link '{}' of object type '{}' returned an empty set",
            multiplicity.pointer, multiplicity.owner
        )));
    }

    if multiplicity.single && hop.visible.len() > 1 {
        return Err(QueryError::cardinality_violation(format!(
            "single link '{}' of object type '{}' returned more than one element",
            multiplicity.pointer, multiplicity.owner
        )));
    }

    Ok(hop.visible)
}
