//! Typed serde models for the definition resources the compiler lowers:
//! StructureDefinition, ValueSet, and CodeSystem.
//!
//! Only the fields the compiler consumes are modeled. Open-ended keys
//! (`pattern[x]`, `fixed[x]`, `minValue[x]`, ...) are captured through a
//! flattened map and scanned by prefix, since their concrete suffix is not
//! knowable ahead of time.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

// StructureDefinition

#[derive(Debug, Clone, Deserialize)]
pub struct StructureDefinition {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub kind: String,
    #[serde(rename = "baseDefinition", default)]
    pub base_definition: Option<String>,
    #[serde(default)]
    pub derivation: Option<String>,
    #[serde(default)]
    pub snapshot: Option<Snapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub element: Vec<ElementDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub path: String,
    #[serde(rename = "sliceName", default)]
    pub slice_name: Option<String>,
    #[serde(default)]
    pub slicing: Option<SlicingDefinition>,
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<String>,
    #[serde(rename = "maxLength", default)]
    pub max_length: Option<u32>,
    #[serde(rename = "type", default)]
    pub types: Vec<ElementType>,
    #[serde(default)]
    pub constraint: Vec<ConstraintDefinition>,
    #[serde(default)]
    pub condition: Vec<String>,
    #[serde(default)]
    pub binding: Option<BindingDefinition>,
    /// Catches `pattern[x]`, `fixed[x]`, `defaultValue[x]`, `minValue[x]`,
    /// `maxValue[x]` and anything else not modeled above.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ElementDefinition {
    /// The element's id, falling back to its path. Snapshot elements in
    /// the wild occasionally omit `id`.
    pub fn id_or_path(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.path)
    }

    /// First value among the element's open keys starting with `prefix`,
    /// e.g. `fixed` matching `fixedCode` or `fixedCoding`.
    pub fn choice_value(&self, prefix: &str) -> Option<&Value> {
        self.extra
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .min_by_key(|(key, _)| key.as_str())
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElementType {
    pub code: String,
    #[serde(default)]
    pub profile: Vec<String>,
    #[serde(rename = "targetProfile", default)]
    pub target_profile: Vec<String>,
    #[serde(default)]
    pub extension: Vec<TypeExtension>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeExtension {
    pub url: String,
    #[serde(rename = "valueString", default)]
    pub value_string: Option<String>,
    #[serde(rename = "valueUrl", default)]
    pub value_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintDefinition {
    pub key: String,
    pub severity: String,
    #[serde(default)]
    pub human: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub xpath: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindingDefinition {
    pub strength: String,
    #[serde(rename = "valueSet", default)]
    pub value_set: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlicingDefinition {
    #[serde(default)]
    pub discriminator: Vec<DiscriminatorDefinition>,
    #[serde(default)]
    pub ordered: Option<bool>,
    #[serde(default)]
    pub rules: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscriminatorDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

// ValueSet

#[derive(Debug, Clone, Deserialize)]
pub struct ValueSet {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub compose: Option<Compose>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Compose {
    #[serde(default)]
    pub include: Vec<ComposeEntry>,
    #[serde(default)]
    pub exclude: Vec<ComposeEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposeEntry {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub concept: Vec<ComposeConcept>,
    #[serde(default)]
    pub filter: Vec<ComposeFilter>,
    #[serde(rename = "valueSet", default)]
    pub value_set: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeConcept {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeFilter {
    pub property: String,
    pub op: String,
    pub value: String,
}

// CodeSystem

#[derive(Debug, Clone, Deserialize)]
pub struct CodeSystem {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub supplements: Option<String>,
    #[serde(default)]
    pub concept: Vec<ConceptDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConceptDefinition {
    pub code: String,
    #[serde(default)]
    pub property: Vec<ConceptProperty>,
    #[serde(default)]
    pub concept: Vec<ConceptDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConceptProperty {
    pub code: String,
    #[serde(rename = "valueCode", default)]
    pub value_code: Option<String>,
    #[serde(rename = "valueString", default)]
    pub value_string: Option<String>,
    #[serde(rename = "valueBoolean", default)]
    pub value_boolean: Option<bool>,
    #[serde(rename = "valueInteger", default)]
    pub value_integer: Option<i64>,
    #[serde(rename = "valueDecimal", default)]
    pub value_decimal: Option<f64>,
    #[serde(rename = "valueCoding", default)]
    pub value_coding: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn element_open_keys_land_in_extra() {
        let element: ElementDefinition = serde_json::from_value(json!({
            "id": "Patient.gender",
            "path": "Patient.gender",
            "min": 0,
            "max": "1",
            "fixedCode": "female",
            "patternString": "x"
        }))
        .unwrap();

        assert_eq!(element.choice_value("fixed"), Some(&json!("female")));
        assert_eq!(element.choice_value("pattern"), Some(&json!("x")));
        assert_eq!(element.choice_value("minValue"), None);
    }

    #[test]
    fn structure_definition_parses_snapshot() {
        let sd: StructureDefinition = serde_json::from_value(json!({
            "resourceType": "StructureDefinition",
            "url": "http://example.org/sd/X",
            "name": "X",
            "type": "X",
            "kind": "resource",
            "status": "active",
            "snapshot": {"element": [
                {"id": "X", "path": "X"},
                {"id": "X.a", "path": "X.a", "type": [{"code": "string"}]}
            ]}
        }))
        .unwrap();
        assert_eq!(sd.snapshot.unwrap().element.len(), 2);
    }

    #[test]
    fn code_system_nested_concepts_parse() {
        let cs: CodeSystem = serde_json::from_value(json!({
            "resourceType": "CodeSystem",
            "url": "http://example.org/cs/x",
            "content": "complete",
            "concept": [
                {"code": "human", "concept": [
                    {"code": "child", "property": [{"code": "order", "valueInteger": 1}]}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(cs.concept[0].concept[0].code, "child");
        assert_eq!(cs.concept[0].concept[0].property[0].value_integer, Some(1));
    }
}
