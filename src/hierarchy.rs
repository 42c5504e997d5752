//! Materialized CodeSystem concept trees and the ancestor/descendant/
//! property queries ValueSet filters are compiled against.
//!
//! A hierarchy is a forest: multiple roots, unbounded depth, no code
//! appears twice. Hierarchies are immutable after construction and shared
//! behind `Arc` by the compiler's store.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::definitions::{CodeSystem, ConceptDefinition};

/// Typed property value attached to a concept.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Code(String),
    String(String),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Coding(Value),
}

impl PropertyValue {
    /// Render the property for comparison against filter values, which
    /// arrive as strings on the wire.
    pub fn as_comparable(&self) -> String {
        match self {
            PropertyValue::Code(s) | PropertyValue::String(s) => s.clone(),
            PropertyValue::Boolean(b) => b.to_string(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Decimal(d) => d.to_string(),
            PropertyValue::Coding(v) => v
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// One node of the concept forest.
#[derive(Debug, Clone)]
pub struct ConceptNode {
    pub code: String,
    pub properties: HashMap<String, PropertyValue>,
    pub descendants: Vec<ConceptNode>,
}

impl ConceptNode {
    fn from_definition(def: &ConceptDefinition) -> Self {
        let mut properties = HashMap::new();
        for prop in &def.property {
            let value = if let Some(c) = &prop.value_code {
                PropertyValue::Code(c.clone())
            } else if let Some(s) = &prop.value_string {
                PropertyValue::String(s.clone())
            } else if let Some(b) = prop.value_boolean {
                PropertyValue::Boolean(b)
            } else if let Some(i) = prop.value_integer {
                PropertyValue::Integer(i)
            } else if let Some(d) = prop.value_decimal {
                PropertyValue::Decimal(d)
            } else if let Some(c) = &prop.value_coding {
                PropertyValue::Coding(c.clone())
            } else {
                continue;
            };
            properties.insert(prop.code.clone(), value);
        }

        Self {
            code: def.code.clone(),
            properties,
            descendants: def.concept.iter().map(Self::from_definition).collect(),
        }
    }
}

/// The materialized forest for one CodeSystem.
#[derive(Debug, Clone)]
pub struct ConceptHierarchy {
    pub url: String,
    pub concepts: Vec<ConceptNode>,
}

impl ConceptHierarchy {
    pub fn from_code_system(cs: &CodeSystem) -> Self {
        Self {
            url: cs.url.clone(),
            concepts: cs.concept.iter().map(ConceptNode::from_definition).collect(),
        }
    }

    /// Every code in the forest, DFS pre-order.
    pub fn all_codes(&self) -> Vec<String> {
        let mut codes = Vec::new();
        fn walk(node: &ConceptNode, out: &mut Vec<String>) {
            out.push(node.code.clone());
            for child in &node.descendants {
                walk(child, out);
            }
        }
        for root in &self.concepts {
            walk(root, &mut codes);
        }
        codes
    }

    /// DFS lookup of one code anywhere in the forest.
    pub fn find(&self, code: &str) -> Option<&ConceptNode> {
        fn walk<'a>(node: &'a ConceptNode, code: &str) -> Option<&'a ConceptNode> {
            if node.code == code {
                return Some(node);
            }
            node.descendants.iter().find_map(|child| walk(child, code))
        }
        self.concepts.iter().find_map(|root| walk(root, code))
    }

    /// All strict descendants of `code`, DFS order. Empty when the code
    /// is absent or a leaf.
    pub fn descendants(&self, code: &str) -> Vec<String> {
        let Some(node) = self.find(code) else {
            return Vec::new();
        };
        let mut codes = Vec::new();
        fn walk(node: &ConceptNode, out: &mut Vec<String>) {
            for child in &node.descendants {
                out.push(child.code.clone());
                walk(child, out);
            }
        }
        walk(node, &mut codes);
        codes
    }

    /// Root-to-parent path to `code`, root-first. Empty when `code` is a
    /// root or absent.
    pub fn ancestors(&self, code: &str) -> Vec<String> {
        fn walk(node: &ConceptNode, code: &str, trail: &mut Vec<String>) -> bool {
            if node.code == code {
                return true;
            }
            trail.push(node.code.clone());
            for child in &node.descendants {
                if walk(child, code, trail) {
                    return true;
                }
            }
            trail.pop();
            false
        }

        for root in &self.concepts {
            let mut trail = Vec::new();
            if walk(root, code, &mut trail) {
                return trail;
            }
        }
        Vec::new()
    }
}

/// By-URL store of hierarchies, owned by the compiler and consulted
/// lazily by filter refinements at validation time.
#[derive(Debug, Default)]
pub struct HierarchyStore {
    hierarchies: HashMap<String, Arc<ConceptHierarchy>>,
}

impl HierarchyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hierarchy: ConceptHierarchy) {
        self.hierarchies
            .insert(hierarchy.url.clone(), Arc::new(hierarchy));
    }

    pub fn get(&self, url: &str) -> Option<Arc<ConceptHierarchy>> {
        self.hierarchies.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.hierarchies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hierarchies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn human_tree() -> ConceptHierarchy {
        let cs: CodeSystem = serde_json::from_value(json!({
            "resourceType": "CodeSystem",
            "url": "http://example.org/cs/people",
            "content": "complete",
            "concept": [
                {"code": "human", "concept": [
                    {"code": "child", "concept": [
                        {"code": "boy"},
                        {"code": "girl"}
                    ]},
                    {"code": "adult", "concept": [
                        {"code": "man"},
                        {"code": "woman"}
                    ]}
                ]},
                {"code": "machine"}
            ]
        }))
        .unwrap();
        ConceptHierarchy::from_code_system(&cs)
    }

    #[test]
    fn find_reaches_any_depth() {
        let h = human_tree();
        assert!(h.find("girl").is_some());
        assert!(h.find("machine").is_some());
        assert!(h.find("alien").is_none());
    }

    #[test]
    fn descendants_exclude_self() {
        let h = human_tree();
        assert_eq!(h.descendants("child"), vec!["boy", "girl"]);
        assert_eq!(
            h.descendants("human"),
            vec!["child", "boy", "girl", "adult", "man", "woman"]
        );
        assert!(h.descendants("boy").is_empty());
        assert!(h.descendants("alien").is_empty());
    }

    #[test]
    fn ancestors_are_root_first() {
        let h = human_tree();
        assert_eq!(h.ancestors("girl"), vec!["human", "child"]);
        assert!(h.ancestors("human").is_empty());
        assert!(h.ancestors("alien").is_empty());
    }

    #[test]
    fn properties_are_typed() {
        let cs: CodeSystem = serde_json::from_value(json!({
            "resourceType": "CodeSystem",
            "url": "http://example.org/cs/props",
            "concept": [{
                "code": "a",
                "property": [
                    {"code": "status", "valueCode": "current"},
                    {"code": "rank", "valueInteger": 3}
                ]
            }]
        }))
        .unwrap();
        let h = ConceptHierarchy::from_code_system(&cs);
        let node = h.find("a").unwrap();
        assert_eq!(node.properties["status"], PropertyValue::Code("current".into()));
        assert_eq!(node.properties["rank"].as_comparable(), "3");
    }

    #[test]
    fn all_codes_is_preorder() {
        let h = human_tree();
        assert_eq!(
            h.all_codes(),
            vec!["human", "child", "boy", "girl", "adult", "man", "woman", "machine"]
        );
    }
}
