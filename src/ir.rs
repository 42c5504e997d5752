//! Intermediate form: a StructureDefinition's flat, path-addressed
//! snapshot lowered into a tree of elements with slicing structure and
//! normalized constraints.
//!
//! The tree is per-resource scratch. The schema compiler walks it once and
//! throws it away.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::definitions::{ConstraintDefinition, ElementDefinition, StructureDefinition};
use crate::deps::ELEMENT_BASE;
use crate::error::CompileError;

/// Upper cardinality bound. `*` in the wire format maps to `Unbounded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Bounded(u32),
    Unbounded,
}

impl Cardinality {
    /// Whether this bound admits more than one occurrence.
    pub fn is_multiple(&self) -> bool {
        match self {
            Cardinality::Bounded(n) => *n > 1,
            Cardinality::Unbounded => true,
        }
    }

    pub fn bound(&self) -> Option<u32> {
        match self {
            Cardinality::Bounded(n) => Some(*n),
            Cardinality::Unbounded => None,
        }
    }
}

/// Element type after normalization: one concrete code, or the
/// choice-of-type marker when the snapshot lists zero or several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Single(String),
    ChoiceOfType,
}

/// An invariant attached to an element, already filtered to
/// error severity.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementConstraint {
    pub key: String,
    pub severity: String,
    pub expression: Option<String>,
    pub human: Option<String>,
    pub xpath: Option<String>,
    pub source: Option<String>,
}

impl ElementConstraint {
    fn from_definition(def: &ConstraintDefinition) -> Self {
        Self {
            key: def.key.clone(),
            severity: def.severity.clone(),
            expression: def.expression.clone(),
            human: def.human.clone(),
            xpath: def.xpath.clone(),
            source: def.source.clone(),
        }
    }

    /// Identity used for deduplication: expression, else human, else
    /// xpath, else key.
    pub fn dedupe_key(&self) -> &str {
        self.expression
            .as_deref()
            .or(self.human.as_deref())
            .or(self.xpath.as_deref())
            .unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscriminatorKind {
    Value,
    Exists,
    Type,
    Profile,
    Pattern,
}

impl DiscriminatorKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "value" => Some(Self::Value),
            "exists" => Some(Self::Exists),
            "type" => Some(Self::Type),
            "profile" => Some(Self::Profile),
            "pattern" => Some(Self::Pattern),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discriminator {
    pub kind: DiscriminatorKind,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlicingRules {
    Closed,
    #[default]
    Open,
    OpenAtEnd,
}

impl SlicingRules {
    pub fn parse(s: &str) -> Self {
        match s {
            "closed" => Self::Closed,
            "openAtEnd" => Self::OpenAtEnd,
            _ => Self::Open,
        }
    }
}

/// Slicing declared on an element: how candidates are discriminated and
/// the slice roots themselves.
#[derive(Debug, Clone, Default)]
pub struct ElementSlicing {
    pub discriminators: Vec<Discriminator>,
    pub ordered: bool,
    pub rules: SlicingRules,
    pub slices: Vec<IntermediateElement>,
}

/// One node of the intermediate tree, one per snapshot path segment.
///
/// Invariants: every non-root node's parent is resolvable by stripping a
/// trailing `:sliceName` or `.field` from its id; slice roots carry
/// `slice_name` and live in the parent's `slicing.slices`, never in
/// `children`.
#[derive(Debug, Clone, Default)]
pub struct IntermediateElement {
    pub id: String,
    pub path: String,
    pub field_name: String,
    pub slice_name: Option<String>,
    pub min: u32,
    pub max: Cardinality,
    pub element_type: ElementType,
    pub types: Vec<String>,
    /// Regex carried by the first type's `regex` extension on primitive
    /// value elements.
    pub type_regex: Option<String>,
    pub max_length: Option<u32>,
    pub pattern: Option<Value>,
    pub fixed: Option<Value>,
    pub min_value: Option<Value>,
    pub max_value: Option<Value>,
    pub default_value: Option<Value>,
    /// Required-strength binding target, unversioned canonical URL.
    pub binding: Option<String>,
    pub constraints: Vec<ElementConstraint>,
    pub slicing: Option<ElementSlicing>,
    pub children: Vec<IntermediateElement>,
}

impl Default for Cardinality {
    fn default() -> Self {
        Cardinality::Bounded(1)
    }
}

impl Default for ElementType {
    fn default() -> Self {
        ElementType::ChoiceOfType
    }
}

impl IntermediateElement {
    /// Whether this element's field is a `[x]` choice group.
    pub fn is_choice(&self) -> bool {
        self.field_name.ends_with("[x]")
    }

    /// The choice prefix, e.g. `value` for `value[x]`.
    pub fn choice_prefix(&self) -> &str {
        self.field_name.trim_end_matches("[x]")
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut IntermediateElement> {
        if self.id == id {
            return Some(self);
        }
        for child in &mut self.children {
            if let Some(found) = child.find_mut(id) {
                return Some(found);
            }
        }
        if let Some(slicing) = &mut self.slicing {
            for slice in &mut slicing.slices {
                if let Some(found) = slice.find_mut(id) {
                    return Some(found);
                }
            }
        }
        None
    }
}

const REGEX_EXTENSION: &str = "http://hl7.org/fhir/StructureDefinition/regex";

/// Lower a StructureDefinition's snapshot into the intermediate tree.
pub fn build_tree(sd: &StructureDefinition) -> Result<IntermediateElement, CompileError> {
    let elements = sd
        .snapshot
        .as_ref()
        .map(|s| s.element.as_slice())
        .unwrap_or_default();

    let root_index = elements
        .iter()
        .position(|e| e.id_or_path() == sd.type_name)
        .ok_or_else(|| CompileError::MalformedDefinition {
            url: sd.url.clone(),
            message: format!("no snapshot root element with id '{}'", sd.type_name),
        })?;

    let pool = constraint_pool(elements);
    let mut root = normalize(&elements[root_index], &pool)
        .ok_or_else(|| CompileError::MalformedDefinition {
            url: sd.url.clone(),
            message: "root element is not normalizable".to_string(),
        })?;

    for (index, element) in elements.iter().enumerate() {
        if index == root_index {
            continue;
        }
        let id = element.id_or_path().to_string();

        let Some(node) = normalize(element, &pool) else {
            warn!(url = %sd.url, element = %id, "skipping malformed snapshot element");
            continue;
        };

        let (parent_id, is_slice_root) = parent_of(element);
        let Some(parent_id) = parent_id else {
            warn!(url = %sd.url, element = %id, "snapshot element has no derivable parent; skipped");
            continue;
        };

        let Some(parent) = root.find_mut(&parent_id) else {
            return Err(CompileError::OrphanElement {
                url: sd.url.clone(),
                element_id: id,
            });
        };

        if is_slice_root {
            parent
                .slicing
                .get_or_insert_with(ElementSlicing::default)
                .slices
                .push(node);
        } else {
            parent.children.push(node);
        }
    }

    Ok(root)
}

/// Parent id of a snapshot element, plus whether the element introduces a
/// slice. Slice roots strip their trailing `:name`; everything else strips
/// the last `.segment`.
fn parent_of(element: &ElementDefinition) -> (Option<String>, bool) {
    let id = element.id_or_path();
    if let Some(slice_name) = &element.slice_name {
        let suffix = format!(":{slice_name}");
        if let Some(stripped) = id.strip_suffix(&suffix) {
            return (Some(stripped.to_string()), true);
        }
    }
    (id.rsplit_once('.').map(|(p, _)| p.to_string()), false)
}

/// All constraints declared anywhere in the snapshot, by key. Used to
/// resolve `condition` references.
fn constraint_pool(elements: &[ElementDefinition]) -> HashMap<String, ConstraintDefinition> {
    let mut pool = HashMap::new();
    for element in elements {
        for constraint in &element.constraint {
            pool.entry(constraint.key.clone())
                .or_insert_with(|| constraint.clone());
        }
    }
    pool
}

/// Normalize one snapshot element. Returns `None` on structural
/// anomalies (unparsable max) which callers report and skip.
fn normalize(
    element: &ElementDefinition,
    pool: &HashMap<String, ConstraintDefinition>,
) -> Option<IntermediateElement> {
    let id = element.id_or_path().to_string();
    let path = element.path.clone();
    let field_name = path.rsplit('.').next().unwrap_or(&path).to_string();

    let max = match element.max.as_deref() {
        None => Cardinality::Bounded(1),
        Some("*") => Cardinality::Unbounded,
        Some(n) => Cardinality::Bounded(n.parse().ok()?),
    };

    let types: Vec<String> = element.types.iter().map(|t| t.code.clone()).collect();
    let element_type = if types.len() == 1 {
        ElementType::Single(types[0].clone())
    } else {
        ElementType::ChoiceOfType
    };

    let type_regex = element.types.first().and_then(|t| {
        t.extension
            .iter()
            .find(|e| e.url == REGEX_EXTENSION)
            .and_then(|e| e.value_string.clone())
    });

    let binding = element.binding.as_ref().and_then(|b| {
        if b.strength == "required" {
            b.value_set
                .as_deref()
                .map(|vs| crate::deps::strip_version(vs).to_string())
        } else {
            None
        }
    });

    let mut constraints = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut keep = |c: ElementConstraint, constraints: &mut Vec<ElementConstraint>| {
        if c.severity != "error" {
            return;
        }
        if c.source.as_deref() == Some(ELEMENT_BASE) {
            return;
        }
        if seen.insert(c.dedupe_key().to_string()) {
            constraints.push(c);
        }
    };
    for def in &element.constraint {
        keep(ElementConstraint::from_definition(def), &mut constraints);
    }
    for key in &element.condition {
        match pool.get(key) {
            Some(def) => keep(ElementConstraint::from_definition(def), &mut constraints),
            None => debug!(element = %id, key = %key, "condition references unknown constraint; dropped"),
        }
    }

    let slicing = element.slicing.as_ref().map(|s| ElementSlicing {
        discriminators: s
            .discriminator
            .iter()
            .filter_map(|d| {
                DiscriminatorKind::parse(&d.kind).map(|kind| Discriminator {
                    kind,
                    path: d.path.clone(),
                })
            })
            .collect(),
        ordered: s.ordered.unwrap_or(false),
        rules: s.rules.as_deref().map(SlicingRules::parse).unwrap_or_default(),
        slices: Vec::new(),
    });

    Some(IntermediateElement {
        id,
        path,
        field_name,
        slice_name: element.slice_name.clone(),
        min: element.min.unwrap_or(0),
        max,
        element_type,
        types,
        type_regex,
        max_length: element.max_length,
        pattern: element.choice_value("pattern").cloned(),
        fixed: element.choice_value("fixed").cloned(),
        min_value: element.choice_value("minValue").cloned(),
        max_value: element.choice_value("maxValue").cloned(),
        default_value: element.choice_value("defaultValue").cloned(),
        binding,
        constraints,
        slicing,
        children: Vec::new(),
    })
}
