//! The compiled validator form: a tagged tree of sub-validators
//! executable against arbitrary JSON.
//!
//! `Schema` is a closed sum, not a trait hierarchy: evaluation is a
//! single dispatch on the tag (see [`eval`]). Refinements are a closed
//! catalog with one executor; adding a refinement kind is a single-file
//! change. Schemas are immutable and shared behind `Arc` in the
//! compiler's by-URL map.

pub mod eval;
pub mod slicing;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

pub use eval::{CancelFlag, SchemaEngine};
pub use slicing::{SliceCheck, SliceCondition, SliceSet};

/// String refinements: regex plus length bounds.
#[derive(Debug, Clone, Default)]
pub struct StringSchema {
    pub regex: Option<Regex>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct NumberSchema {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct IntegerSchema {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ArraySchema {
    pub item: Arc<Schema>,
    pub min: u32,
    /// `None` is unbounded.
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    pub fields: BTreeMap<String, Arc<Schema>>,
}

#[derive(Debug, Clone)]
pub struct RefinedSchema {
    pub inner: Arc<Schema>,
    pub refinements: Vec<Refinement>,
}

/// The compiled validator sum type.
#[derive(Debug, Clone)]
pub enum Schema {
    /// Accepts everything. Substituted for unresolved dependencies and
    /// cycle participants.
    Any,
    /// Accepts nothing. Compiled for malformed value set composes.
    Never,
    /// JSON boolean, or the strings "true"/"false"; both representations
    /// are valid in the wire format.
    Boolean,
    Str(StringSchema),
    Number(NumberSchema),
    Integer(IntegerSchema),
    Literal(Value),
    Enumeration(BTreeSet<String>),
    Array(ArraySchema),
    Optional(Arc<Schema>),
    Object(ObjectSchema),
    Union(Vec<Arc<Schema>>),
    Intersection(Vec<Arc<Schema>>),
    Refined(RefinedSchema),
}

impl Schema {
    pub fn any() -> Arc<Schema> {
        Arc::new(Schema::Any)
    }

    pub fn never() -> Arc<Schema> {
        Arc::new(Schema::Never)
    }

    pub fn boolean() -> Arc<Schema> {
        Arc::new(Schema::Boolean)
    }

    pub fn string() -> Arc<Schema> {
        Arc::new(Schema::Str(StringSchema::default()))
    }

    /// The permissive stand-in for unresolved code systems: any string of
    /// at least one character.
    pub fn nonempty_string() -> Arc<Schema> {
        Arc::new(Schema::Str(StringSchema {
            min_length: Some(1),
            ..Default::default()
        }))
    }

    pub fn number() -> Arc<Schema> {
        Arc::new(Schema::Number(NumberSchema::default()))
    }

    pub fn integer() -> Arc<Schema> {
        Arc::new(Schema::Integer(IntegerSchema::default()))
    }

    pub fn literal(value: Value) -> Arc<Schema> {
        Arc::new(Schema::Literal(value))
    }

    pub fn enumeration<I, S>(codes: I) -> Arc<Schema>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Schema::Enumeration(
            codes.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn optional(inner: Arc<Schema>) -> Arc<Schema> {
        Arc::new(Schema::Optional(inner))
    }

    pub fn array(item: Arc<Schema>, min: u32, max: Option<u32>) -> Arc<Schema> {
        Arc::new(Schema::Array(ArraySchema { item, min, max }))
    }

    pub fn object(fields: BTreeMap<String, Arc<Schema>>) -> Arc<Schema> {
        Arc::new(Schema::Object(ObjectSchema { fields }))
    }

    /// Intersection, flattening the no-op cases.
    pub fn all_of(branches: Vec<Arc<Schema>>) -> Arc<Schema> {
        let mut branches: Vec<_> = branches
            .into_iter()
            .filter(|b| !matches!(**b, Schema::Any))
            .collect();
        match branches.len() {
            0 => Schema::any(),
            1 => branches.remove(0),
            _ => Arc::new(Schema::Intersection(branches)),
        }
    }

    /// Union, flattening the single-branch case.
    pub fn one_of(mut branches: Vec<Arc<Schema>>) -> Arc<Schema> {
        match branches.len() {
            0 => Schema::never(),
            1 => branches.remove(0),
            _ => Arc::new(Schema::Union(branches)),
        }
    }

    pub fn refined(inner: Arc<Schema>, refinements: Vec<Refinement>) -> Arc<Schema> {
        if refinements.is_empty() {
            inner
        } else {
            Arc::new(Schema::Refined(RefinedSchema { inner, refinements }))
        }
    }

    /// Whether absence of a field carrying this schema is acceptable.
    pub fn accepts_absence(&self) -> bool {
        match self {
            Schema::Any | Schema::Optional(_) => true,
            Schema::Refined(r) => r.inner.accepts_absence(),
            Schema::Union(branches) => branches.iter().any(|b| b.accepts_absence()),
            _ => false,
        }
    }

    /// Short noun for type-mismatch messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Schema::Any => "any",
            Schema::Never => "nothing",
            Schema::Boolean => "boolean",
            Schema::Str(_) => "string",
            Schema::Number(_) => "number",
            Schema::Integer(_) => "integer",
            Schema::Literal(_) => "literal",
            Schema::Enumeration(_) => "code",
            Schema::Array(_) => "array",
            Schema::Optional(_) => "optional",
            Schema::Object(_) => "object",
            Schema::Union(_) => "union",
            Schema::Intersection(_) => "intersection",
            Schema::Refined(_) => "refined",
        }
    }
}

/// Named predicates from the closed refinement catalog. Every refinement
/// is awaitable at evaluation time, even the pure ones, so the engine has
/// a single code path.
#[derive(Debug, Clone)]
pub enum Refinement {
    /// Embedded invariant. Fails iff the expression yields a non-empty
    /// list containing a falsy element; evaluation errors pass.
    FhirPath {
        key: String,
        expression: String,
        human: String,
    },
    /// On an object: at most one own field name may start with `prefix`.
    AtMostOneOfPrefix { prefix: String },
    /// Rejects `{}` except directly inside an array position.
    NonEmptyObject,
    /// The named field, when present, must equal `value` exactly.
    ExactValue { field: String, value: Value },
    /// Discriminator-driven validation of a sliced array field.
    Slicing(SliceSet),
    /// ValueSet compose filter over a code, resolved against a concept
    /// hierarchy by URL at evaluation time.
    Filter(CodeFilter),
    /// Passes iff the inner schema rejects the value. Used for value set
    /// excludes.
    Not(Arc<Schema>),
}

/// Supported ValueSet filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    Regex,
    In,
    NotIn,
    IsA,
    IsNotA,
    DescendentOf,
    Generalizes,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Self::Equal),
            "regex" => Some(Self::Regex),
            "in" => Some(Self::In),
            "not-in" => Some(Self::NotIn),
            "is-a" => Some(Self::IsA),
            "is-not-a" => Some(Self::IsNotA),
            "descendent-of" => Some(Self::DescendentOf),
            "generalizes" => Some(Self::Generalizes),
            _ => None,
        }
    }
}

/// One compiled compose filter.
#[derive(Debug, Clone)]
pub struct CodeFilter {
    pub op: FilterOp,
    pub value: String,
    pub property: String,
    /// Code system whose hierarchy resolves hierarchical operators.
    pub system: Option<String>,
}

impl CodeFilter {
    /// Whether the filter targets the concept code itself rather than a
    /// named property.
    pub fn targets_code(&self) -> bool {
        matches!(self.property.as_str(), "code" | "concept")
    }
}
