//! Shared fixtures: a miniature R4-flavored definition set, small enough
//! to read, rich enough to exercise primitives, complex types, choice
//! groups, slicing, bindings, and terminology composes.

// Each test binary uses its own slice of the fixture set.
#![allow(dead_code)]

use serde_json::{Value, json};

pub const PATIENT_URL: &str = "http://hl7.org/fhir/StructureDefinition/Patient";
pub const IPA_PATIENT_URL: &str = "http://hl7.org/fhir/uv/ipa/StructureDefinition/ipa-patient";
pub const GREEK_CS_URL: &str = "http://example.org/CodeSystem/greek-letters";
pub const GREEK_VS_URL: &str = "http://example.org/ValueSet/greek-letters-minus-lambda";
pub const PEOPLE_CS_URL: &str = "http://example.org/CodeSystem/people";
pub const CHILDREN_VS_URL: &str = "http://example.org/ValueSet/children";
pub const GENDER_VS_URL: &str = "http://example.org/ValueSet/genders";

fn primitive_sd(name: &str, value_type: &str, regex: Option<&str>) -> Value {
    let mut type_entry = json!({"code": value_type});
    if let Some(pattern) = regex {
        type_entry["extension"] = json!([{
            "url": "http://hl7.org/fhir/StructureDefinition/regex",
            "valueString": pattern
        }]);
    }
    json!({
        "resourceType": "StructureDefinition",
        "url": format!("http://hl7.org/fhir/StructureDefinition/{name}"),
        "name": name,
        "status": "active",
        "kind": "primitive-type",
        "type": name,
        "snapshot": {"element": [
            {"id": name, "path": name},
            {"id": format!("{name}.value"), "path": format!("{name}.value"),
             "min": 0, "max": "1", "type": [type_entry]}
        ]}
    })
}

pub fn boolean_sd() -> Value {
    primitive_sd("boolean", "http://hl7.org/fhirpath/System.Boolean", None)
}

pub fn string_sd() -> Value {
    primitive_sd(
        "string",
        "http://hl7.org/fhirpath/System.String",
        Some("[ \\r\\n\\t\\S]+"),
    )
}

pub fn code_sd() -> Value {
    primitive_sd(
        "code",
        "http://hl7.org/fhirpath/System.String",
        Some("[^\\s]+(\\s[^\\s]+)*"),
    )
}

pub fn uri_sd() -> Value {
    primitive_sd("uri", "http://hl7.org/fhirpath/System.String", Some("\\S*"))
}

pub fn date_time_sd() -> Value {
    primitive_sd(
        "dateTime",
        "http://hl7.org/fhirpath/System.DateTime",
        Some("[0-9]{4}(-[0-9]{2}(-[0-9]{2}(T[0-9]{2}:[0-9]{2}:[0-9]{2}(\\.[0-9]+)?(Z|[+-][0-9]{2}:[0-9]{2}))?)?)?"),
    )
}

pub fn human_name_sd() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": "http://hl7.org/fhir/StructureDefinition/HumanName",
        "name": "HumanName",
        "status": "active",
        "kind": "complex-type",
        "type": "HumanName",
        "snapshot": {"element": [
            {"id": "HumanName", "path": "HumanName"},
            {"id": "HumanName.use", "path": "HumanName.use", "min": 0, "max": "1",
             "type": [{"code": "code"}]},
            {"id": "HumanName.family", "path": "HumanName.family", "min": 0, "max": "1",
             "type": [{"code": "string"}]},
            {"id": "HumanName.given", "path": "HumanName.given", "min": 0, "max": "*",
             "type": [{"code": "string"}]}
        ]}
    })
}

pub fn identifier_sd() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": "http://hl7.org/fhir/StructureDefinition/Identifier",
        "name": "Identifier",
        "status": "active",
        "kind": "complex-type",
        "type": "Identifier",
        "snapshot": {"element": [
            {"id": "Identifier", "path": "Identifier"},
            {"id": "Identifier.system", "path": "Identifier.system", "min": 0, "max": "1",
             "type": [{"code": "uri"}]},
            {"id": "Identifier.value", "path": "Identifier.value", "min": 0, "max": "1",
             "type": [{"code": "string"}]}
        ]}
    })
}

pub fn patient_sd() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": PATIENT_URL,
        "name": "Patient",
        "status": "active",
        "kind": "resource",
        "type": "Patient",
        "baseDefinition": "http://hl7.org/fhir/StructureDefinition/DomainResource",
        "snapshot": {"element": [
            {"id": "Patient", "path": "Patient"},
            {"id": "Patient.identifier", "path": "Patient.identifier", "min": 0, "max": "*",
             "type": [{"code": "Identifier"}]},
            {"id": "Patient.active", "path": "Patient.active", "min": 0, "max": "1",
             "type": [{"code": "boolean"}]},
            {"id": "Patient.name", "path": "Patient.name", "min": 0, "max": "*",
             "type": [{"code": "HumanName"}]},
            {"id": "Patient.gender", "path": "Patient.gender", "min": 0, "max": "1",
             "type": [{"code": "code"}],
             "binding": {"strength": "required", "valueSet": GENDER_VS_URL}},
            {"id": "Patient.deceased[x]", "path": "Patient.deceased[x]", "min": 0, "max": "1",
             "type": [{"code": "boolean"}, {"code": "dateTime"}]}
        ]}
    })
}

pub fn ipa_patient_sd() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": IPA_PATIENT_URL,
        "name": "IpaPatient",
        "status": "active",
        "kind": "resource",
        "type": "Patient",
        "baseDefinition": PATIENT_URL,
        "derivation": "constraint",
        "snapshot": {"element": [
            {"id": "Patient", "path": "Patient"},
            {"id": "Patient.identifier", "path": "Patient.identifier", "min": 1, "max": "*",
             "type": [{"code": "Identifier"}]},
            {"id": "Patient.name", "path": "Patient.name", "min": 0, "max": "*",
             "type": [{"code": "HumanName"}]}
        ]}
    })
}

pub fn gender_value_set() -> Value {
    json!({
        "resourceType": "ValueSet",
        "url": GENDER_VS_URL,
        "name": "Genders",
        "status": "active",
        "compose": {"include": [{
            "system": "http://example.org/CodeSystem/genders",
            "concept": [
                {"code": "male"}, {"code": "female"}, {"code": "other"}, {"code": "unknown"}
            ]
        }]}
    })
}

pub fn greek_code_system() -> Value {
    let letters = [
        "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
        "lambda", "mu", "nu", "xi", "omicron", "pi", "rho", "sigma", "tau", "upsilon", "phi",
        "chi", "psi", "omega",
    ];
    json!({
        "resourceType": "CodeSystem",
        "url": GREEK_CS_URL,
        "name": "GreekLetters",
        "status": "active",
        "content": "complete",
        "concept": letters.iter().map(|l| json!({"code": l})).collect::<Vec<_>>()
    })
}

pub fn greek_value_set() -> Value {
    json!({
        "resourceType": "ValueSet",
        "url": GREEK_VS_URL,
        "name": "GreekLettersMinusLambda",
        "status": "active",
        "compose": {
            "include": [{"system": GREEK_CS_URL}],
            "exclude": [{"system": GREEK_CS_URL, "concept": [{"code": "lambda"}]}]
        }
    })
}

pub fn people_code_system() -> Value {
    json!({
        "resourceType": "CodeSystem",
        "url": PEOPLE_CS_URL,
        "name": "People",
        "status": "active",
        "content": "complete",
        "concept": [{
            "code": "human",
            "concept": [
                {"code": "child", "concept": [{"code": "boy"}, {"code": "girl"}]},
                {"code": "adult", "concept": [{"code": "man"}, {"code": "woman"}]}
            ]
        }]
    })
}

pub fn children_value_set() -> Value {
    json!({
        "resourceType": "ValueSet",
        "url": CHILDREN_VS_URL,
        "name": "Children",
        "status": "active",
        "compose": {"include": [{
            "system": PEOPLE_CS_URL,
            "filter": [{"property": "concept", "op": "is-a", "value": "child"}]
        }]}
    })
}

/// The full core fixture set: primitives, complex types, Patient, and the
/// gender terminology its binding needs.
pub fn core_definitions() -> Vec<Value> {
    vec![
        boolean_sd(),
        string_sd(),
        code_sd(),
        uri_sd(),
        date_time_sd(),
        human_name_sd(),
        identifier_sd(),
        gender_value_set(),
        patient_sd(),
    ]
}
