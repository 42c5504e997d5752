//! Dependency extraction: the set of canonical URLs a parsed conformance
//! resource refers to, by resource kind.
//!
//! The output feeds the topological sorter, so it is deduplicated and
//! sorted (`BTreeSet`) to keep compile order deterministic.

use std::collections::BTreeSet;

use serde_json::Value;
use url::Url;

use crate::registry::ResourceType;

/// Canonical namespace for bare FHIR type codes.
pub const FHIR_BASE: &str = "http://hl7.org/fhir/StructureDefinition";

/// Ambient base Element type; constraints sourced from it are noise.
pub const ELEMENT_BASE: &str = "http://hl7.org/fhir/StructureDefinition/Element";

/// Rewrite a bare type code (no URL scheme) into the canonical base
/// namespace; pass real canonical URLs through untouched.
pub fn canonicalize_type_code(code: &str) -> String {
    if Url::parse(code).is_ok() {
        code.to_string()
    } else {
        format!("{FHIR_BASE}/{code}")
    }
}

/// Strip a `|version` suffix from a canonical reference. Bindings and
/// compose entries frequently pin versions; the registry is keyed by the
/// unversioned canonical.
pub fn strip_version(canonical: &str) -> &str {
    canonical.split('|').next().unwrap_or(canonical)
}

/// Extract the deduplicated, sorted set of canonical URLs `resource`
/// depends on. Unknown resource types contribute nothing.
pub fn extract_dependencies(resource_type: ResourceType, resource: &Value) -> BTreeSet<String> {
    let mut deps = BTreeSet::new();
    let self_url = resource.get("url").and_then(Value::as_str).unwrap_or("");

    match resource_type {
        ResourceType::StructureDefinition => {
            structure_definition_deps(resource, self_url, &mut deps);
        }
        ResourceType::ValueSet => value_set_deps(resource, &mut deps),
        ResourceType::CodeSystem => {
            if let Some(supplements) = resource.get("supplements").and_then(Value::as_str) {
                deps.insert(strip_version(supplements).to_string());
            }
        }
        ResourceType::ConceptMap => concept_map_deps(resource, &mut deps),
        ResourceType::StructureMap => structure_map_deps(resource, &mut deps),
        ResourceType::ImplementationGuide => implementation_guide_deps(resource, &mut deps),
    }

    deps.remove(self_url);
    deps
}

fn structure_definition_deps(resource: &Value, self_url: &str, deps: &mut BTreeSet<String>) {
    if let Some(base) = resource.get("baseDefinition").and_then(Value::as_str) {
        deps.insert(strip_version(base).to_string());
    }

    let elements = resource
        .get("snapshot")
        .and_then(|s| s.get("element"))
        .and_then(Value::as_array);
    let Some(elements) = elements else { return };

    for element in elements {
        for ty in element
            .get("type")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(code) = ty.get("code").and_then(Value::as_str) {
                deps.insert(canonicalize_type_code(code));
            }
            for key in ["profile", "targetProfile"] {
                for profile in ty.get(key).and_then(Value::as_array).into_iter().flatten() {
                    if let Some(p) = profile.as_str() {
                        let p = strip_version(p);
                        if p != self_url {
                            deps.insert(p.to_string());
                        }
                    }
                }
            }
        }

        for constraint in element
            .get("constraint")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(source) = constraint.get("source").and_then(Value::as_str) {
                if source != self_url {
                    deps.insert(source.to_string());
                }
            }
        }

        if let Some(binding) = element.get("binding") {
            let strength = binding.get("strength").and_then(Value::as_str);
            if strength == Some("required") {
                if let Some(value_set) = binding.get("valueSet").and_then(Value::as_str) {
                    deps.insert(strip_version(value_set).to_string());
                }
            }
        }
    }
}

fn value_set_deps(resource: &Value, deps: &mut BTreeSet<String>) {
    let compose = resource.get("compose");
    for key in ["include", "exclude"] {
        for entry in compose
            .and_then(|c| c.get(key))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            for vs in entry
                .get("valueSet")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(v) = vs.as_str() {
                    deps.insert(strip_version(v).to_string());
                }
            }
            if let Some(system) = entry.get("system").and_then(Value::as_str) {
                deps.insert(strip_version(system).to_string());
            }
        }
    }
}

fn concept_map_deps(resource: &Value, deps: &mut BTreeSet<String>) {
    for key in ["sourceString", "targetString"] {
        if let Some(v) = resource.get(key).and_then(Value::as_str) {
            deps.insert(strip_version(v).to_string());
        }
    }
    for group in resource
        .get("group")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        for key in ["source", "target"] {
            if let Some(v) = group.get(key).and_then(Value::as_str) {
                deps.insert(strip_version(v).to_string());
            }
        }
        for element in group
            .get("element")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            for target in element
                .get("target")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                for depends_on in target
                    .get("dependsOn")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    if let Some(system) = depends_on.get("system").and_then(Value::as_str) {
                        deps.insert(strip_version(system).to_string());
                    }
                }
            }
        }
    }
}

fn structure_map_deps(resource: &Value, deps: &mut BTreeSet<String>) {
    for structure in resource
        .get("structure")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(u) = structure.get("url").and_then(Value::as_str) {
            deps.insert(strip_version(u).to_string());
        }
    }
    for import in resource
        .get("import")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(u) = import.as_str() {
            deps.insert(strip_version(u).to_string());
        }
    }
}

fn implementation_guide_deps(resource: &Value, deps: &mut BTreeSet<String>) {
    for depends_on in resource
        .get("dependsOn")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(uri) = depends_on.get("uri").and_then(Value::as_str) {
            deps.insert(strip_version(uri).to_string());
        }
    }
    for global in resource
        .get("global")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(profile) = global.get("profile").and_then(Value::as_str) {
            deps.insert(strip_version(profile).to_string());
        }
    }
}
