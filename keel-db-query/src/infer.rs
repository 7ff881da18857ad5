//! Static typing of path steps
//!
//! Resolves what a navigation step produces (object types or scalars), its
//! static singleness, and the declared multiplicity of the traversed link.
//! Unknown types and pointers are reported here, before anything runs.

use crate::error::{QueryError, Result};
use keel_db_core::{PointerMultiplicity, Schema, Step, TypeName};

/// What an expression produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticType {
    /// Objects of any of these types (or their subtypes)
    Objects(Vec<TypeName>),
    Scalar,
}

impl StaticType {
    pub fn object_types(&self) -> Option<&[TypeName]> {
        match self {
            StaticType::Objects(types) => Some(types),
            StaticType::Scalar => None,
        }
    }
}

/// Static type plus whether at most one element is produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inferred {
    pub ty: StaticType,
    pub single: bool,
}

impl Inferred {
    pub fn objects(types: Vec<TypeName>, single: bool) -> Self {
        Self {
            ty: StaticType::Objects(types),
            single,
        }
    }

    pub fn scalar(single: bool) -> Self {
        Self {
            ty: StaticType::Scalar,
            single,
        }
    }
}

/// Typing of one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepType {
    pub output: Inferred,
    /// Declared multiplicity of a traversed link that is required or single
    pub multiplicity: Option<PointerMultiplicity>,
}

/// Type the step `step` applied to a source of type `source`
pub fn step_type(schema: &Schema, source: &Inferred, step: &Step) -> Result<StepType> {
    let Some(source_types) = source.ty.object_types() else {
        return Err(QueryError::invalid_query(format!(
            "cannot apply '{}' to a scalar",
            step
        )));
    };

    match step {
        Step::Pointer(name) => pointer_step(schema, source, source_types, name),
        Step::Backlink { link, source: only } => {
            let declaring: Vec<TypeName> = schema
                .types_with_pointer(link)
                .into_iter()
                .filter(|ty| schema.pointer(ty, link).is_some_and(|p| p.is_link()))
                .collect();
            if declaring.is_empty() {
                return Err(QueryError::invalid_query(format!(
                    "no link named '{}' to traverse backwards",
                    link
                )));
            }
            let types = match only {
                Some(ty) => vec![known_type(schema, ty)?],
                None => declaring,
            };
            Ok(StepType {
                output: Inferred::objects(types, false),
                multiplicity: None,
            })
        }
        Step::Is(ty) => Ok(StepType {
            output: Inferred::objects(vec![known_type(schema, ty)?], source.single),
            multiplicity: None,
        }),
    }
}

/// Canonical name of a type, or `InvalidQuery` if the schema lacks it
pub fn known_type(schema: &Schema, ty: &str) -> Result<TypeName> {
    schema
        .get(ty)
        .map(|t| t.name.clone())
        .ok_or_else(|| QueryError::invalid_query(format!("unknown object type '{}'", ty)))
}

fn pointer_step(
    schema: &Schema,
    source: &Inferred,
    source_types: &[TypeName],
    name: &str,
) -> Result<StepType> {
    let mut resolved = Vec::with_capacity(source_types.len());
    for ty in source_types {
        let found = schema.resolve_pointer(ty, name).ok_or_else(|| {
            QueryError::invalid_query(format!(
                "object type '{}' has no link or property '{}'",
                ty, name
            ))
        })?;
        resolved.push(found);
    }

    let links = resolved.iter().filter(|(_, p)| p.is_link()).count();
    if links != 0 && links != resolved.len() {
        return Err(QueryError::invalid_query(format!(
            "'{}' is a link on some source types and a property on others",
            name
        )));
    }

    let all_single = resolved.iter().all(|(_, p)| p.is_single());
    let single = source.single && all_single;

    if links == 0 {
        return Ok(StepType {
            output: Inferred::scalar(single),
            multiplicity: None,
        });
    }

    let mut targets: Vec<TypeName> = Vec::new();
    for (_, pointer) in &resolved {
        for target in pointer.target_types() {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
    }

    let all_required = resolved.iter().all(|(_, p)| p.required);
    let multiplicity = match resolved.first() {
        Some((declaring, _)) if all_required || all_single => Some(PointerMultiplicity {
            owner: match source_types {
                [only] => only.clone(),
                _ => declaring.name.clone(),
            },
            pointer: name.to_string(),
            required: all_required,
            single: all_single,
        }),
        _ => None,
    };

    Ok(StepType {
        output: Inferred::objects(targets, single),
        multiplicity,
    })
}
