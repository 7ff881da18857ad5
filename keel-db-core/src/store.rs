//! Object storage seams
//!
//! The query executor reads objects through [`DataSource`] and applies
//! mutations through [`DataSink`]. [`MemoryStore`] is an insertion-ordered
//! in-memory implementation used by tests and embedded callers.
//!
//! Stores know nothing about access policies: every read here is a raw,
//! unfiltered read. Visibility is applied by the evaluator from the guards
//! the rewriter attached to the query.

use crate::error::{Error, Result};
use crate::name::TypeName;
use crate::value::{ObjectId, Value};
use std::collections::HashMap;
use std::fmt::Debug;

/// Read access to stored objects
pub trait DataSource: Debug + Send + Sync {
    /// Objects whose type is exactly `ty` (no subtypes), in storage order
    fn instances_of(&self, ty: &TypeName) -> Vec<ObjectId>;

    /// Concrete type of an object
    fn type_of(&self, id: ObjectId) -> Option<TypeName>;

    /// Stored values of a link or property. Empty when unset.
    fn pointer_values(&self, id: ObjectId, pointer: &str) -> Vec<Value>;

    /// Objects whose `link` contains `target`, in storage order
    fn referrers(&self, target: ObjectId, link: &str) -> Vec<ObjectId>;
}

/// Write access to stored objects
pub trait DataSink: DataSource {
    /// Create an object of type `ty` with the given pointer values
    fn insert(&mut self, ty: &TypeName, fields: Vec<(String, Vec<Value>)>) -> ObjectId;

    /// Replace the values of one pointer
    fn set_pointer(&mut self, id: ObjectId, pointer: &str, values: Vec<Value>) -> Result<()>;

    /// Remove an object and every link pointing at it.
    ///
    /// Returns `false` if the object did not exist.
    fn delete(&mut self, id: ObjectId) -> bool;
}

#[derive(Debug, Clone)]
struct StoredObject {
    ty: TypeName,
    pointers: HashMap<String, Vec<Value>>,
}

/// In-memory object store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    order: Vec<ObjectId>,
    objects: HashMap<ObjectId, StoredObject>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }
}

impl DataSource for MemoryStore {
    fn instances_of(&self, ty: &TypeName) -> Vec<ObjectId> {
        self.order
            .iter()
            .filter(|id| self.objects.get(id).is_some_and(|obj| &obj.ty == ty))
            .copied()
            .collect()
    }

    fn type_of(&self, id: ObjectId) -> Option<TypeName> {
        self.objects.get(&id).map(|obj| obj.ty.clone())
    }

    fn pointer_values(&self, id: ObjectId, pointer: &str) -> Vec<Value> {
        self.objects
            .get(&id)
            .and_then(|obj| obj.pointers.get(pointer))
            .cloned()
            .unwrap_or_default()
    }

    fn referrers(&self, target: ObjectId, link: &str) -> Vec<ObjectId> {
        let needle = Value::Object(target);
        self.order
            .iter()
            .filter(|id| {
                self.objects
                    .get(id)
                    .and_then(|obj| obj.pointers.get(link))
                    .is_some_and(|values| values.contains(&needle))
            })
            .copied()
            .collect()
    }
}

impl DataSink for MemoryStore {
    fn insert(&mut self, ty: &TypeName, fields: Vec<(String, Vec<Value>)>) -> ObjectId {
        let id = ObjectId::new();
        let pointers = fields
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .collect();
        self.objects.insert(
            id,
            StoredObject {
                ty: ty.clone(),
                pointers,
            },
        );
        self.order.push(id);
        id
    }

    fn set_pointer(&mut self, id: ObjectId, pointer: &str, values: Vec<Value>) -> Result<()> {
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("object {}", id)))?;
        if values.is_empty() {
            obj.pointers.remove(pointer);
        } else {
            obj.pointers.insert(pointer.to_string(), values);
        }
        Ok(())
    }

    fn delete(&mut self, id: ObjectId) -> bool {
        if self.objects.remove(&id).is_none() {
            return false;
        }
        self.order.retain(|o| *o != id);

        let dangling = Value::Object(id);
        for obj in self.objects.values_mut() {
            obj.pointers.retain(|_, values| {
                values.retain(|v| *v != dangling);
                !values.is_empty()
            });
        }
        true
    }
}
