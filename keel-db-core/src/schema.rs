//! Schema snapshot
//!
//! A [`Schema`] is an immutable snapshot of object types, their pointers
//! (links and properties, with multiplicity metadata), declared access
//! policies and session globals. It is produced by DDL (outside this
//! workspace) through [`SchemaBuilder`] and shared read-only by every
//! compilation running against the same version.
//!
//! # Inheritance
//!
//! Every type implicitly extends the abstract root type `Object`, which
//! carries the implicit `id` property. Ancestor and descendant closures are
//! computed once when the snapshot is built:
//! - `ancestors_of(Issue)` returns `[Named, Owned, Text, Object]` (nearest first)
//! - `descendants_of(Owned)` returns `[Comment, Issue, LogEntry]`
//!
//! Cycles in the `extending` graph are rejected at build time.

use crate::access::AccessPolicy;
use crate::error::{Error, Result};
use crate::name::{TypeName, ID_POINTER};
use crate::value::{ScalarType, Value};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Static empty slice for missing entries
static EMPTY_TYPES: &[TypeName] = &[];

/// Declared multiplicity of a pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    Single,
    Multi,
}

/// What a pointer points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerTarget {
    /// A property holding scalar values
    Scalar(ScalarType),
    /// A link to objects of one of these types (a union when more than one)
    Objects(Vec<TypeName>),
}

/// A link or property declared on an object type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    pub name: String,
    pub target: PointerTarget,
    pub required: bool,
    pub cardinality: Cardinality,
}

impl Pointer {
    /// Optional single property
    pub fn property(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            target: PointerTarget::Scalar(ty),
            required: false,
            cardinality: Cardinality::Single,
        }
    }

    /// Optional single link to one type
    pub fn link(name: impl Into<String>, target: impl Into<TypeName>) -> Self {
        Self::union_link(name, [target.into()])
    }

    /// Optional single link to a union of types (`Tgt | BadTgt`)
    pub fn union_link<T: Into<TypeName>>(
        name: impl Into<String>,
        targets: impl IntoIterator<Item = T>,
    ) -> Self {
        Self {
            name: name.into(),
            target: PointerTarget::Objects(targets.into_iter().map(Into::into).collect()),
            required: false,
            cardinality: Cardinality::Single,
        }
    }

    /// Builder: mark as `required`
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: mark as `multi`
    pub fn multi(mut self) -> Self {
        self.cardinality = Cardinality::Multi;
        self
    }

    pub fn is_link(&self) -> bool {
        matches!(self.target, PointerTarget::Objects(_))
    }

    pub fn is_single(&self) -> bool {
        self.cardinality == Cardinality::Single
    }

    /// Target types of a link; empty for properties
    pub fn target_types(&self) -> &[TypeName] {
        match &self.target {
            PointerTarget::Objects(types) => types,
            PointerTarget::Scalar(_) => EMPTY_TYPES,
        }
    }

    /// `"link"` or `"property"`, for messages
    pub fn kind_str(&self) -> &'static str {
        if self.is_link() {
            "link"
        } else {
            "property"
        }
    }
}

/// A named object type
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    pub name: TypeName,
    pub is_abstract: bool,
    /// Direct bases; empty means "extends Object"
    pub bases: Vec<TypeName>,
    pub pointers: Vec<Pointer>,
    pub policies: Vec<AccessPolicy>,
}

impl ObjectType {
    /// Concrete type
    pub fn new(name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            is_abstract: false,
            bases: Vec::new(),
            pointers: Vec::new(),
            policies: Vec::new(),
        }
    }

    /// Abstract type (never has direct instances)
    pub fn abstract_type(name: impl Into<TypeName>) -> Self {
        Self {
            is_abstract: true,
            ..Self::new(name)
        }
    }

    /// Builder: add a direct base
    pub fn extending(mut self, base: impl Into<TypeName>) -> Self {
        self.bases.push(base.into());
        self
    }

    /// Builder: declare a pointer
    pub fn pointer(mut self, pointer: Pointer) -> Self {
        self.pointers.push(pointer);
        self
    }

    /// Builder: declare an access policy
    pub fn policy(mut self, policy: AccessPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Pointer declared directly on this type
    pub fn own_pointer(&self, name: &str) -> Option<&Pointer> {
        self.pointers.iter().find(|p| p.name == name)
    }
}

/// A session/global variable declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDef {
    pub name: String,
    pub ty: ScalarType,
    pub required: bool,
    pub default: Option<Value>,
}

impl GlobalDef {
    pub fn new(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            default: None,
        }
    }

    /// Builder: mark as `required` (must also carry a default)
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: set the default value
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Immutable schema snapshot
#[derive(Debug, Clone)]
pub struct Schema {
    version: u64,
    types: BTreeMap<TypeName, ObjectType>,
    globals: BTreeMap<String, GlobalDef>,
    /// Transitive closure: type -> all ancestors, nearest first (NOT including itself)
    ancestors: HashMap<TypeName, Arc<[TypeName]>>,
    /// Transitive closure: type -> all descendants (NOT including itself)
    descendants: HashMap<TypeName, Arc<[TypeName]>>,
}

impl Schema {
    /// Start building a schema snapshot
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Schema version (epoch). Used to invalidate derived caches.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up an object type
    pub fn get(&self, name: &str) -> Option<&ObjectType> {
        self.types.get(name)
    }

    /// Look up an object type, failing on unknown names
    pub fn object_type(&self, name: &str) -> Result<&ObjectType> {
        self.get(name).ok_or_else(|| Error::unknown_type(name))
    }

    /// All object types, ordered by name
    pub fn types(&self) -> impl Iterator<Item = &ObjectType> {
        self.types.values()
    }

    /// All ancestors of `name` (bases, transitively), nearest first.
    ///
    /// Does NOT include `name` itself. Returns an empty slice for unknown types.
    pub fn ancestors_of(&self, name: &str) -> &[TypeName] {
        self.ancestors
            .get(name)
            .map(|arc| arc.as_ref())
            .unwrap_or(EMPTY_TYPES)
    }

    /// All descendants of `name` (subtypes, transitively).
    ///
    /// Does NOT include `name` itself.
    pub fn descendants_of(&self, name: &str) -> &[TypeName] {
        self.descendants
            .get(name)
            .map(|arc| arc.as_ref())
            .unwrap_or(EMPTY_TYPES)
    }

    /// True if `sub` is `sup` or one of its descendants
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        sub == sup || self.ancestors_of(sub).iter().any(|a| a.as_str() == sup)
    }

    /// `name` plus its descendants, restricted to non-abstract types.
    ///
    /// These are the types whose instances a reference to `name` denotes.
    pub fn concrete_types(&self, name: &str) -> Result<Vec<TypeName>> {
        let ty = self.object_type(name)?;
        let mut out = Vec::new();
        if !ty.is_abstract {
            out.push(ty.name.clone());
        }
        for desc in self.descendants_of(name) {
            if self.get(desc).is_some_and(|t| !t.is_abstract) {
                out.push(desc.clone());
            }
        }
        Ok(out)
    }

    /// Resolve a pointer on `ty`, searching the type itself, then its
    /// ancestors nearest first. Returns the declaring type with the pointer.
    pub fn resolve_pointer(&self, ty: &str, name: &str) -> Option<(&ObjectType, &Pointer)> {
        let own = self.get(ty)?;
        std::iter::once(own)
            .chain(self.ancestors_of(ty).iter().filter_map(|a| self.get(a)))
            .find_map(|t| t.own_pointer(name).map(|p| (t, p)))
    }

    /// Pointer visible on `ty` (own or inherited)
    pub fn pointer(&self, ty: &str, name: &str) -> Option<&Pointer> {
        self.resolve_pointer(ty, name).map(|(_, p)| p)
    }

    /// Access policies declared directly on `ty` (not inherited)
    pub fn policies_for(&self, ty: &str) -> Result<&[AccessPolicy]> {
        Ok(&self.object_type(ty)?.policies)
    }

    /// Types that declare a pointer named `name` themselves
    pub fn types_with_pointer(&self, name: &str) -> Vec<TypeName> {
        self.types
            .values()
            .filter(|t| t.own_pointer(name).is_some())
            .map(|t| t.name.clone())
            .collect()
    }

    /// Look up a global declaration
    pub fn global(&self, name: &str) -> Option<&GlobalDef> {
        self.globals.get(name)
    }
}

/// Builder for [`Schema`] snapshots
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    version: u64,
    types: Vec<ObjectType>,
    globals: Vec<GlobalDef>,
}

impl SchemaBuilder {
    /// Builder: set the schema version
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Builder: declare an object type
    pub fn object_type(mut self, ty: ObjectType) -> Self {
        self.types.push(ty);
        self
    }

    /// Builder: declare a global
    pub fn global(mut self, global: GlobalDef) -> Self {
        self.globals.push(global);
        self
    }

    /// Validate the declarations and compute the inheritance closures.
    pub fn build(self) -> Result<Schema> {
        let mut types: BTreeMap<TypeName, ObjectType> = BTreeMap::new();

        let root = ObjectType::abstract_type(TypeName::root())
            .pointer(Pointer::property(ID_POINTER, ScalarType::Uuid).required());
        types.insert(root.name.clone(), root);

        for mut ty in self.types {
            if ty.name.is_root() {
                return Err(Error::invalid_schema(format!(
                    "type '{}' is implicit and cannot be redeclared",
                    ty.name
                )));
            }
            if types.contains_key(&ty.name) {
                return Err(Error::invalid_schema(format!(
                    "duplicate object type '{}'",
                    ty.name
                )));
            }
            if ty.bases.is_empty() {
                ty.bases.push(TypeName::root());
            }

            let mut pointer_names = HashSet::new();
            for pointer in &ty.pointers {
                if pointer.name == ID_POINTER {
                    return Err(Error::invalid_schema(format!(
                        "pointer '{}' on '{}' is reserved",
                        ID_POINTER, ty.name
                    )));
                }
                if !pointer_names.insert(pointer.name.as_str()) {
                    return Err(Error::invalid_schema(format!(
                        "duplicate pointer '{}' on '{}'",
                        pointer.name, ty.name
                    )));
                }
            }

            let mut policy_names = HashSet::new();
            for policy in &ty.policies {
                if !policy_names.insert(policy.name.as_str()) {
                    return Err(Error::invalid_schema(format!(
                        "duplicate access policy '{}' on '{}'",
                        policy.name, ty.name
                    )));
                }
            }

            types.insert(ty.name.clone(), ty);
        }

        for ty in types.values() {
            for base in &ty.bases {
                if !types.contains_key(base) {
                    return Err(Error::invalid_schema(format!(
                        "'{}' extends unknown type '{}'",
                        ty.name, base
                    )));
                }
            }
            for pointer in &ty.pointers {
                if let PointerTarget::Objects(targets) = &pointer.target {
                    if targets.is_empty() {
                        return Err(Error::invalid_schema(format!(
                            "link '{}' on '{}' has no target type",
                            pointer.name, ty.name
                        )));
                    }
                    if let Some(missing) = targets.iter().find(|t| !types.contains_key(*t)) {
                        return Err(Error::invalid_schema(format!(
                            "link '{}' on '{}' targets unknown type '{}'",
                            pointer.name, ty.name, missing
                        )));
                    }
                }
            }
        }

        let mut globals = BTreeMap::new();
        for global in self.globals {
            if global.required && global.default.is_none() {
                return Err(Error::invalid_schema(format!(
                    "required global '{}' must have a default",
                    global.name
                )));
            }
            if let Some(default) = &global.default {
                if default.scalar_type() != Some(global.ty) {
                    return Err(Error::invalid_schema(format!(
                        "default for global '{}' is not of type {}",
                        global.name,
                        global.ty.as_str()
                    )));
                }
            }
            let name = global.name.clone();
            if globals.insert(name.clone(), global).is_some() {
                return Err(Error::invalid_schema(format!("duplicate global '{}'", name)));
            }
        }

        let ancestors = compute_ancestor_closure(&types)?;
        let descendants = invert_closure(&ancestors);

        tracing::debug!(
            version = self.version,
            types = types.len(),
            globals = globals.len(),
            "schema built"
        );
        Ok(Schema {
            version: self.version,
            types,
            globals,
            ancestors,
            descendants,
        })
    }
}

/// Compute every type's ancestors using BFS over direct bases.
///
/// Nearest ancestors come first. A type reachable from itself is a cycle
/// and is rejected.
fn compute_ancestor_closure(
    types: &BTreeMap<TypeName, ObjectType>,
) -> Result<HashMap<TypeName, Arc<[TypeName]>>> {
    let mut closure = HashMap::with_capacity(types.len());

    for start in types.keys() {
        let mut visited: HashSet<&TypeName> = HashSet::new();
        let mut queue: VecDeque<&TypeName> = VecDeque::new();
        let mut result: Vec<TypeName> = Vec::new();

        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            let Some(ty) = types.get(current) else {
                continue;
            };
            for base in &ty.bases {
                if base == start {
                    return Err(Error::invalid_schema(format!(
                        "inheritance cycle through '{}'",
                        start
                    )));
                }
                if visited.insert(base) {
                    queue.push_back(base);
                    result.push(base.clone());
                }
            }
        }

        closure.insert(start.clone(), result.into());
    }

    Ok(closure)
}

/// Invert an ancestor closure into a descendant closure.
fn invert_closure(
    ancestors: &HashMap<TypeName, Arc<[TypeName]>>,
) -> HashMap<TypeName, Arc<[TypeName]>> {
    let mut inverted: BTreeMap<TypeName, SmallVec<[TypeName; 4]>> = BTreeMap::new();

    let mut sorted: Vec<&TypeName> = ancestors.keys().collect();
    sorted.sort();
    for ty in sorted {
        for ancestor in ancestors[ty].iter() {
            inverted.entry(ancestor.clone()).or_default().push(ty.clone());
        }
    }

    inverted
        .into_iter()
        .map(|(ty, descendants)| (ty, descendants.into_vec().into()))
        .collect()
}
