//! Lowering of StructureDefinition trees into executable schemas.
//!
//! Primitive kinds reduce to a refined leaf derived from the `.value`
//! element. Complex types, resources, and logical models lower
//! recursively into objects whose fields compose resolved type schemas
//! with locally declared structure via `Intersection`.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::definitions::StructureDefinition;
use crate::ir::{DiscriminatorKind, ElementType, IntermediateElement};
use crate::runtime::slicing::{SliceCheck, SliceCondition, SliceSet};
use crate::runtime::{Refinement, Schema, StringSchema};

use super::Ctx;

pub(crate) fn compile_structure(
    sd: &StructureDefinition,
    tree: &IntermediateElement,
    ctx: &Ctx<'_>,
) -> Arc<Schema> {
    match sd.kind.as_str() {
        "primitive-type" => compile_primitive(sd, tree),
        _ => compile_complex(sd, tree, ctx),
    }
}

/// Primitive lowering: the `<Type>.value` element decides the leaf. A
/// `regex` type extension wins; otherwise the value type's code maps to
/// the closest JSON leaf.
fn compile_primitive(sd: &StructureDefinition, tree: &IntermediateElement) -> Arc<Schema> {
    // Booleans are special-cased: both the JSON boolean and the strings
    // "true"/"false" are valid wire representations.
    if sd.type_name == "boolean" {
        return Schema::boolean();
    }

    let value_path = format!("{}.value", sd.type_name);
    let value_element = tree.children.iter().find(|c| c.path == value_path);

    if let Some(element) = value_element {
        if let Some(pattern) = &element.type_regex {
            match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(regex) => {
                    return Arc::new(Schema::Str(StringSchema {
                        regex: Some(regex),
                        min_length: None,
                        max_length: element.max_length.map(|n| n as usize),
                    }));
                }
                Err(error) => {
                    warn!(url = %sd.url, %error, "primitive regex does not compile; ignoring");
                }
            }
        }
        if let ElementType::Single(code) = &element.element_type {
            return value_type_schema(code);
        }
    }

    warn!(url = %sd.url, "primitive without usable value element; falling back on type name");
    fallback_primitive(&sd.type_name)
}

/// Map a value element's type code (usually a FHIRPath system type) to a
/// leaf schema.
fn value_type_schema(code: &str) -> Arc<Schema> {
    let short = code.rsplit(['.', '/']).next().unwrap_or(code);
    match short {
        "Boolean" | "boolean" => Schema::boolean(),
        "Integer" | "integer" | "positiveInt" | "unsignedInt" => Schema::integer(),
        "Decimal" | "decimal" => Schema::number(),
        _ => Schema::string(),
    }
}

fn fallback_primitive(type_name: &str) -> Arc<Schema> {
    match type_name {
        "boolean" => Schema::boolean(),
        "integer" | "positiveInt" | "unsignedInt" | "integer64" => Schema::integer(),
        "decimal" => Schema::number(),
        _ => Schema::string(),
    }
}

/// Complex-type / resource / logical lowering.
fn compile_complex(
    sd: &StructureDefinition,
    tree: &IntermediateElement,
    ctx: &Ctx<'_>,
) -> Arc<Schema> {
    let mut object = lower_element_group(tree, ctx);

    // Root-level invariants (e.g. dom-*) ride on the object itself.
    let root_constraints = fhirpath_refinements(tree);
    if !root_constraints.is_empty() {
        object = Schema::refined(object, root_constraints);
    }

    if sd.kind == "resource" {
        // The same validator serves the resource standalone and nested
        // inside a Reference, so resourceType stays optional.
        let mut fields = BTreeMap::new();
        fields.insert(
            "resourceType".to_string(),
            Schema::optional(Schema::string()),
        );
        return Schema::all_of(vec![object, Schema::object(fields)]);
    }

    object
}

/// Build the object schema for one element's children, including choice
/// fan-out, slicing, exact-value pins, and the universal non-empty-object
/// refinement.
fn lower_element_group(parent: &IntermediateElement, ctx: &Ctx<'_>) -> Arc<Schema> {
    let mut fields: BTreeMap<String, Arc<Schema>> = BTreeMap::new();
    let mut refinements: Vec<Refinement> = Vec::new();

    for child in &parent.children {
        if child.is_choice() {
            lower_choice_field(child, ctx, &mut fields, &mut refinements);
            continue;
        }

        let value_schema = lower_value_schema(child, ctx);
        let field_schema = wrap_cardinality(child, value_schema);
        fields.insert(child.field_name.clone(), field_schema);

        // Fixed/pattern directly on a field, without slicing, pins the
        // value from the parent.
        if child.slicing.is_none() {
            if let Some(required) = child.fixed.clone().or_else(|| child.pattern.clone()) {
                refinements.push(Refinement::ExactValue {
                    field: child.field_name.clone(),
                    value: required,
                });
            }
        }

        if let Some(slice_set) = build_slice_set(child, ctx) {
            refinements.push(Refinement::Slicing(slice_set));
        }
    }

    refinements.push(Refinement::NonEmptyObject);
    Schema::refined(Schema::object(fields), refinements)
}

/// Choice-of-type fan-out: one optional field per candidate type, plus
/// the mutual-exclusion refinement on the parent.
fn lower_choice_field(
    child: &IntermediateElement,
    ctx: &Ctx<'_>,
    fields: &mut BTreeMap<String, Arc<Schema>>,
    refinements: &mut Vec<Refinement>,
) {
    let prefix = child.choice_prefix().to_string();
    let constraints = fhirpath_refinements(child);

    for type_code in &child.types {
        let field_name = format!("{prefix}{}", capitalize(type_code));
        let mut variant = ctx.resolve_or_any(type_code);
        variant = Schema::refined(variant, constraints.clone());
        if child.max.is_multiple() {
            variant = Schema::array(variant, 0, child.max.bound());
        }
        fields.insert(field_name, Schema::optional(variant));
    }

    refinements.push(Refinement::AtMostOneOfPrefix { prefix });
}

/// The schema of one element occurrence, before cardinality wrapping:
/// resolved type, intersected with locally declared children, value
/// bounds, required binding, and FHIRPath constraints.
fn lower_value_schema(child: &IntermediateElement, ctx: &Ctx<'_>) -> Arc<Schema> {
    let mut parts: Vec<Arc<Schema>> = Vec::new();

    match &child.element_type {
        ElementType::Single(code) => parts.push(ctx.resolve_or_any(code)),
        ElementType::ChoiceOfType => parts.push(Schema::any()),
    }

    if !child.children.is_empty() {
        parts.push(lower_element_group(child, ctx));
    }

    if let Some(max_length) = child.max_length {
        parts.push(Arc::new(Schema::Str(StringSchema {
            regex: None,
            min_length: None,
            max_length: Some(max_length as usize),
        })));
    }

    if let Some(bounds) = numeric_bounds(child) {
        parts.push(bounds);
    }

    if let Some(binding) = &child.binding {
        if let Some(value_set) = ctx.resolve(binding) {
            if let Some(bound) = binding_schema(child, value_set) {
                parts.push(bound);
            }
        }
    }

    let schema = Schema::all_of(parts);
    Schema::refined(schema, fhirpath_refinements(child))
}

/// minValue/maxValue lower into a numeric leaf intersected with the
/// resolved type.
fn numeric_bounds(child: &IntermediateElement) -> Option<Arc<Schema>> {
    let min = child.min_value.as_ref().and_then(Value::as_f64);
    let max = child.max_value.as_ref().and_then(Value::as_f64);
    if min.is_none() && max.is_none() {
        return None;
    }
    Some(Arc::new(Schema::Number(crate::runtime::NumberSchema {
        min,
        max,
    })))
}

/// Apply a resolved value set validator to a bound field, shaped by the
/// field's type. Coded primitives bind directly; Coding and
/// CodeableConcept bind through their `code` leaves. Other types are out
/// of reach without a terminology server and stay unchecked.
fn binding_schema(child: &IntermediateElement, value_set: Arc<Schema>) -> Option<Arc<Schema>> {
    let type_code = match &child.element_type {
        ElementType::Single(code) => code.as_str(),
        ElementType::ChoiceOfType => return None,
    };

    match type_code {
        "code" | "string" | "uri" => Some(value_set),
        "Coding" => Some(coding_binding(value_set)),
        "CodeableConcept" => {
            let mut fields = BTreeMap::new();
            fields.insert(
                "coding".to_string(),
                Schema::optional(Schema::array(coding_binding(value_set), 0, None)),
            );
            Some(Schema::object(fields))
        }
        _ => None,
    }
}

fn coding_binding(value_set: Arc<Schema>) -> Arc<Schema> {
    let mut fields = BTreeMap::new();
    fields.insert("code".to_string(), Schema::optional(value_set));
    Schema::object(fields)
}

/// Cardinality wrapping: arrays first, optionality second.
fn wrap_cardinality(child: &IntermediateElement, schema: Arc<Schema>) -> Arc<Schema> {
    let mut schema = schema;
    if child.max.is_multiple() {
        schema = Schema::array(schema, child.min, child.max.bound());
    }
    if child.min == 0 {
        schema = Schema::optional(schema);
    }
    schema
}

fn fhirpath_refinements(element: &IntermediateElement) -> Vec<Refinement> {
    element
        .constraints
        .iter()
        .filter_map(|constraint| {
            let expression = constraint.expression.clone()?;
            Some(Refinement::FhirPath {
                key: constraint.key.clone(),
                expression,
                human: constraint
                    .human
                    .clone()
                    .unwrap_or_else(|| "constraint failed".to_string()),
            })
        })
        .collect()
}

/// Compile the slicing declared on a child into a slice set, or `None`
/// when nothing checkable remains.
fn build_slice_set(child: &IntermediateElement, ctx: &Ctx<'_>) -> Option<SliceSet> {
    let slicing = child.slicing.as_ref()?;
    if slicing.slices.is_empty() {
        return None;
    }

    let mut checks = Vec::new();
    'slices: for slice in &slicing.slices {
        let mut conditions = Vec::new();
        for discriminator in &slicing.discriminators {
            let path = discriminator_path(&discriminator.path);
            match discriminator.kind {
                DiscriminatorKind::Value | DiscriminatorKind::Pattern => {
                    match slice_value_at(slice, &path) {
                        Some(expected) => conditions.push(SliceCondition::Equals {
                            path,
                            value: expected,
                        }),
                        None => {
                            warn!(
                                slice = %slice.id,
                                discriminator = %discriminator.path,
                                "slice declares no pattern or fixed value at discriminator path; skipped"
                            );
                            continue 'slices;
                        }
                    }
                }
                DiscriminatorKind::Exists => conditions.push(SliceCondition::Exists { path }),
                DiscriminatorKind::Type | DiscriminatorKind::Profile => {
                    warn!(
                        slice = %slice.id,
                        kind = ?discriminator.kind,
                        "unsupported discriminator type; slice skipped"
                    );
                    continue 'slices;
                }
            }
        }

        if conditions.is_empty() {
            warn!(slice = %slice.id, "slice has no checkable discriminator conditions; skipped");
            continue;
        }

        checks.push(SliceCheck {
            name: slice.slice_name.clone().unwrap_or_default(),
            id: slice.id.clone(),
            path: slice.path.clone(),
            min: slice.min,
            max: slice.max.bound(),
            conditions,
            schema: lower_value_schema(slice, ctx),
        });
    }

    if checks.is_empty() {
        return None;
    }

    Some(SliceSet {
        field: child.field_name.clone(),
        rules: slicing.rules,
        ordered: slicing.ordered,
        slices: checks,
    })
}

fn discriminator_path(path: &str) -> Vec<String> {
    let path = path.trim();
    if path.is_empty() || path == "$this" {
        return Vec::new();
    }
    path.split('.').map(str::to_string).collect()
}

/// The slice's declared pattern or fixed value at a discriminator path,
/// found by walking the slice's own subtree.
fn slice_value_at(slice: &IntermediateElement, path: &[String]) -> Option<Value> {
    let mut current = slice;
    for segment in path {
        current = current
            .children
            .iter()
            .find(|c| c.field_name == *segment)?;
    }
    current.pattern.clone().or_else(|| current.fixed.clone())
}

fn capitalize(code: &str) -> String {
    let mut chars = code.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{CompiledSet, Ctx};
    use crate::ir::build_tree;
    use serde_json::json;

    fn compile(sd_json: serde_json::Value) -> Arc<Schema> {
        let sd: StructureDefinition = serde_json::from_value(sd_json).unwrap();
        let tree = build_tree(&sd).unwrap();
        let set = CompiledSet::new_for_tests();
        let ctx = Ctx::new_for_tests(&set, "http://example.org/sd/test");
        compile_structure(&sd, &tree, &ctx)
    }

    #[test]
    fn primitive_regex_wins() {
        let schema = compile(json!({
            "url": "http://hl7.org/fhir/StructureDefinition/code",
            "name": "code", "type": "code", "kind": "primitive-type",
            "snapshot": {"element": [
                {"id": "code", "path": "code"},
                {"id": "code.value", "path": "code.value", "max": "1",
                 "type": [{
                    "code": "http://hl7.org/fhirpath/System.String",
                    "extension": [{
                        "url": "http://hl7.org/fhir/StructureDefinition/regex",
                        "valueString": "[^\\s]+"
                    }]
                 }]}
            ]}
        }));
        match &*schema {
            Schema::Str(s) => assert!(s.regex.is_some()),
            other => panic!("expected string schema, got {}", other.type_name()),
        }
    }

    #[test]
    fn boolean_primitive_is_special_cased() {
        let schema = compile(json!({
            "url": "http://hl7.org/fhir/StructureDefinition/boolean",
            "name": "boolean", "type": "boolean", "kind": "primitive-type",
            "snapshot": {"element": [
                {"id": "boolean", "path": "boolean"},
                {"id": "boolean.value", "path": "boolean.value", "max": "1",
                 "type": [{"code": "http://hl7.org/fhirpath/System.Boolean"}]}
            ]}
        }));
        assert!(matches!(*schema, Schema::Boolean));
    }

    #[test]
    fn resource_intersects_resource_type_field() {
        let schema = compile(json!({
            "url": "http://example.org/sd/Thing",
            "name": "Thing", "type": "Thing", "kind": "resource",
            "snapshot": {"element": [
                {"id": "Thing", "path": "Thing"},
                {"id": "Thing.note", "path": "Thing.note", "max": "1", "type": [{"code": "string"}]}
            ]}
        }));
        assert!(matches!(*schema, Schema::Intersection(_)));
    }

    #[test]
    fn choice_fields_fan_out_with_exclusion() {
        let schema = compile(json!({
            "url": "http://example.org/sd/Obs",
            "name": "Obs", "type": "Obs", "kind": "complex-type",
            "snapshot": {"element": [
                {"id": "Obs", "path": "Obs"},
                {"id": "Obs.value[x]", "path": "Obs.value[x]", "max": "1",
                 "type": [{"code": "string"}, {"code": "boolean"}]}
            ]}
        }));
        let Schema::Refined(refined) = &*schema else {
            panic!("expected refined object");
        };
        let Schema::Object(object) = &*refined.inner else {
            panic!("expected object");
        };
        assert!(object.fields.contains_key("valueString"));
        assert!(object.fields.contains_key("valueBoolean"));
        assert!(
            refined
                .refinements
                .iter()
                .any(|r| matches!(r, Refinement::AtMostOneOfPrefix { prefix } if prefix == "value"))
        );
    }

    #[test]
    fn capitalize_handles_camel_case_codes() {
        assert_eq!(capitalize("dateTime"), "DateTime");
        assert_eq!(capitalize("boolean"), "Boolean");
    }
}
