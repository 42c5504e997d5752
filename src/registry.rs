//! Resource registry: one descriptor per on-disk conformance resource,
//! deduplicated by canonical URL.
//!
//! Registration only sniffs the handful of header fields needed for
//! deduplication and ordering; the full JSON body is parsed later by the
//! compiler, once per surviving file.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

/// Resource kinds the registry accepts. Anything else on disk is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    StructureDefinition,
    ValueSet,
    CodeSystem,
    ConceptMap,
    StructureMap,
    ImplementationGuide,
}

impl ResourceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "StructureDefinition" => Some(Self::StructureDefinition),
            "ValueSet" => Some(Self::ValueSet),
            "CodeSystem" => Some(Self::CodeSystem),
            "ConceptMap" => Some(Self::ConceptMap),
            "StructureMap" => Some(Self::StructureMap),
            "ImplementationGuide" => Some(Self::ImplementationGuide),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructureDefinition => "StructureDefinition",
            Self::ValueSet => "ValueSet",
            Self::CodeSystem => "CodeSystem",
            Self::ConceptMap => "ConceptMap",
            Self::StructureMap => "StructureMap",
            Self::ImplementationGuide => "ImplementationGuide",
        }
    }

    /// Rank used by the by-kind stabilizer comparator.
    fn rank(&self) -> u8 {
        match self {
            Self::ImplementationGuide => 0,
            Self::StructureDefinition => 1,
            Self::ValueSet => 2,
            Self::CodeSystem => 3,
            Self::ConceptMap => 4,
            Self::StructureMap => 5,
        }
    }
}

/// `StructureDefinition.kind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    PrimitiveType,
    ComplexType,
    Resource,
    Logical,
}

impl DefinitionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primitive-type" => Some(Self::PrimitiveType),
            "complex-type" => Some(Self::ComplexType),
            "resource" => Some(Self::Resource),
            "logical" => Some(Self::Logical),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Resource => 0,
            Self::ComplexType => 1,
            Self::PrimitiveType => 2,
            Self::Logical => 3,
        }
    }
}

/// Publication status of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceStatus {
    Active,
    Draft,
    Retired,
    #[default]
    Unknown,
}

impl ResourceStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "draft" => Self::Draft,
            "retired" => Self::Retired,
            _ => Self::Unknown,
        }
    }
}

/// Descriptor of one conformance resource on disk. Identity is `url`.
#[derive(Debug, Clone)]
pub struct ResourceFile {
    pub file_path: PathBuf,
    pub resource_type: ResourceType,
    pub url: String,
    pub name: String,
    pub kind: Option<DefinitionKind>,
    pub base_definition: Option<String>,
    pub date: Option<String>,
    pub status: ResourceStatus,
    pub experimental: bool,
}

impl ResourceFile {
    /// Build a descriptor from a parsed JSON header. Returns `None` when
    /// the document is not a registrable conformance resource.
    pub fn from_json(path: &Path, json: &Value) -> Option<Self> {
        let resource_type = json
            .get("resourceType")
            .and_then(Value::as_str)
            .and_then(ResourceType::parse)?;
        let url = json.get("url").and_then(Value::as_str)?.to_string();
        let name = json
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(Self {
            file_path: path.to_path_buf(),
            resource_type,
            url,
            name,
            kind: json
                .get("kind")
                .and_then(Value::as_str)
                .and_then(DefinitionKind::parse),
            base_definition: json
                .get("baseDefinition")
                .and_then(Value::as_str)
                .map(str::to_string),
            date: json.get("date").and_then(Value::as_str).map(str::to_string),
            status: json
                .get("status")
                .and_then(Value::as_str)
                .map(ResourceStatus::parse)
                .unwrap_or_default(),
            experimental: json
                .get("experimental")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Comparator placing resources in the by-kind stabilizer order:
/// guides before definitions before terminology, resources before complex
/// types before primitives, then by name, then by url.
pub fn kind_order(a: &ResourceFile, b: &ResourceFile) -> Ordering {
    a.resource_type
        .rank()
        .cmp(&b.resource_type.rank())
        .then_with(|| match (a.kind, b.kind) {
            (Some(ka), Some(kb)) => ka.rank().cmp(&kb.rank()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.url.cmp(&b.url))
}

/// Accepts descriptors in registration order and resolves overlapping
/// canonical URLs down to one file each.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    files: Vec<ResourceFile>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, file: ResourceFile) {
        debug!(url = %file.url, path = %file.file_path.display(), "registered resource");
        self.files.push(file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// All registered files, registration order, overlaps included.
    pub fn files(&self) -> &[ResourceFile] {
        &self.files
    }

    /// Resolve overlapping URLs to a unique set, one file per canonical
    /// URL, in first-registration order of the surviving URL.
    pub fn deduplicate(&self) -> Vec<ResourceFile> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<&ResourceFile>> = HashMap::new();
        for file in &self.files {
            let group = groups.entry(file.url.as_str()).or_default();
            if group.is_empty() {
                order.push(file.url.as_str());
            }
            group.push(file);
        }

        order
            .into_iter()
            .map(|url| {
                let group = &groups[url];
                let chosen = select_preferred(group);
                if group.len() > 1 {
                    for dropped in group.iter().filter(|f| f.file_path != chosen.file_path) {
                        warn!(
                            url = %url,
                            kept = %chosen.file_path.display(),
                            dropped = %dropped.file_path.display(),
                            "overlapping definition dropped"
                        );
                    }
                }
                chosen.clone()
            })
            .collect()
    }
}

/// Dedupe cascade. Each step narrows the candidate set only when the
/// narrowed set is non-empty and strictly smaller; the final tie-break is
/// stable by file path so selection is independent of input order.
fn select_preferred<'a>(candidates: &[&'a ResourceFile]) -> &'a ResourceFile {
    let mut remaining: Vec<&ResourceFile> = candidates.to_vec();

    narrow(&mut remaining, |f| f.status == ResourceStatus::Active);
    narrow(&mut remaining, |f| f.status != ResourceStatus::Retired);
    narrow(&mut remaining, |f| !f.experimental);

    if remaining.len() > 1 {
        if let Some(greatest) = remaining.iter().filter_map(|f| f.date.as_deref()).max() {
            let greatest = greatest.to_string();
            narrow(&mut remaining, |f| f.date.as_deref() == Some(&greatest));
        }
    }

    remaining
        .into_iter()
        .min_by(|a, b| a.file_path.cmp(&b.file_path))
        .expect("candidate group is never empty")
}

fn narrow(remaining: &mut Vec<&ResourceFile>, keep: impl Fn(&ResourceFile) -> bool) {
    let narrowed: Vec<_> = remaining.iter().copied().filter(|f| keep(f)).collect();
    if !narrowed.is_empty() && narrowed.len() < remaining.len() {
        *remaining = narrowed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(path: &str, url: &str, status: &str, experimental: bool, date: Option<&str>) -> ResourceFile {
        let mut json = json!({
            "resourceType": "ValueSet",
            "url": url,
            "name": "Test",
            "status": status,
            "experimental": experimental,
        });
        if let Some(d) = date {
            json["date"] = Value::String(d.to_string());
        }
        ResourceFile::from_json(Path::new(path), &json).unwrap()
    }

    #[test]
    fn sniffs_header_fields() {
        let json = json!({
            "resourceType": "StructureDefinition",
            "url": "http://example.org/sd/A",
            "name": "A",
            "kind": "resource",
            "baseDefinition": "http://example.org/sd/Base",
            "status": "active",
            "date": "2021-03-04",
        });
        let f = ResourceFile::from_json(Path::new("a.json"), &json).unwrap();
        assert_eq!(f.resource_type, ResourceType::StructureDefinition);
        assert_eq!(f.kind, Some(DefinitionKind::Resource));
        assert_eq!(f.base_definition.as_deref(), Some("http://example.org/sd/Base"));
        assert_eq!(f.status, ResourceStatus::Active);
    }

    #[test]
    fn rejects_non_conformance_resources() {
        let json = json!({"resourceType": "Patient", "url": "x"});
        assert!(ResourceFile::from_json(Path::new("p.json"), &json).is_none());
    }

    #[test]
    fn dedupe_prefers_active_over_draft() {
        let mut registry = ResourceRegistry::new();
        registry.register(file("a.json", "u", "draft", false, None));
        registry.register(file("b.json", "u", "active", false, None));
        let unique = registry.deduplicate();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].file_path, PathBuf::from("b.json"));
    }

    #[test]
    fn dedupe_tolerates_non_retired_when_no_active() {
        let mut registry = ResourceRegistry::new();
        registry.register(file("a.json", "u", "retired", false, None));
        registry.register(file("b.json", "u", "draft", false, None));
        assert_eq!(registry.deduplicate()[0].file_path, PathBuf::from("b.json"));
    }

    #[test]
    fn dedupe_prefers_non_experimental_then_greatest_date() {
        let mut registry = ResourceRegistry::new();
        registry.register(file("a.json", "u", "active", true, Some("2024-01-01")));
        registry.register(file("b.json", "u", "active", false, Some("2020-01-01")));
        registry.register(file("c.json", "u", "active", false, Some("2022-06-30")));
        assert_eq!(registry.deduplicate()[0].file_path, PathBuf::from("c.json"));
    }

    #[test]
    fn dedupe_is_input_order_independent() {
        let a = file("a.json", "u", "active", false, None);
        let b = file("b.json", "u", "active", false, None);

        let mut forward = ResourceRegistry::new();
        forward.register(a.clone());
        forward.register(b.clone());

        let mut reverse = ResourceRegistry::new();
        reverse.register(b);
        reverse.register(a);

        assert_eq!(
            forward.deduplicate()[0].file_path,
            reverse.deduplicate()[0].file_path
        );
    }

    #[test]
    fn kind_order_sorts_resources_before_primitives() {
        let sd = |kind: &str, name: &str| {
            let json = json!({
                "resourceType": "StructureDefinition",
                "url": format!("http://example.org/{name}"),
                "name": name,
                "kind": kind,
            });
            ResourceFile::from_json(Path::new(name), &json).unwrap()
        };
        let mut files = vec![sd("primitive-type", "boolean"), sd("resource", "Patient"), sd("complex-type", "HumanName")];
        files.sort_by(kind_order);
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Patient", "HumanName", "boolean"]);
    }
}
