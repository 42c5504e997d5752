//! Built-in catalog: opaque validators for well-known external
//! vocabularies, injected ahead of compilation.
//!
//! These systems are far too large to ship as CodeSystem resources
//! (LOINC alone has ~100k concepts), so profiles referencing them get a
//! permissive catch-all instead of an unresolved-dependency warning.
//! Callers can override any entry, or add their own, through
//! [`crate::compile::SchemaCompiler::register_schema`].

use std::sync::Arc;

use crate::runtime::Schema;

/// The preloaded catalog, one `(canonical URL, validator)` pair per
/// external system.
pub fn catalog() -> Vec<(String, Arc<Schema>)> {
    let permissive = [
        "http://loinc.org",
        "http://snomed.info/sct",
        "http://unitsofmeasure.org",
        "http://hl7.org/fhir/sid/icd-10",
        "http://hl7.org/fhir/sid/icd-10-cm",
        "http://hl7.org/fhir/sid/ndc",
        "http://www.nlm.nih.gov/research/umls/rxnorm",
        "urn:ietf:bcp:47",
        "urn:ietf:bcp:13",
        "urn:iso:std:iso:3166",
        "https://www.iana.org/time-zones",
    ];

    permissive
        .iter()
        .map(|url| (url.to_string(), Schema::nonempty_string()))
        .collect()
}
