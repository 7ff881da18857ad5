//! Session context: per-session global variable bindings.

use crate::schema::Schema;
use crate::value::Value;
use std::collections::HashMap;

/// Global bindings for one session.
///
/// Unset globals fall back to the schema default, then to the empty set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    globals: HashMap<String, Value>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: bind a global
    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_global(name, value);
        self
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    /// Remove an explicit binding, restoring the default
    pub fn reset_global(&mut self, name: &str) -> Option<Value> {
        self.globals.remove(name)
    }

    /// Explicitly bound value, if any
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Effective value of a global as a set: the explicit binding, else the
    /// schema default, else empty.
    pub fn lookup(&self, schema: &Schema, name: &str) -> Vec<Value> {
        if let Some(value) = self.get(name) {
            return vec![value.clone()];
        }
        schema
            .global(name)
            .and_then(|def| def.default.clone())
            .into_iter()
            .collect()
    }
}
