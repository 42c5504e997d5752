//! CodeSystem lowering, dispatched on `content`.
//!
//! Complete systems enumerate every code and additionally materialize
//! their concept hierarchy for later ValueSet filters. Partial systems
//! stay permissive so unknown codes never fail spuriously. Supplements
//! contribute no validator of their own.

use std::sync::Arc;

use tracing::warn;

use crate::definitions::CodeSystem;
use crate::hierarchy::{ConceptHierarchy, HierarchyStore};
use crate::runtime::Schema;

pub(crate) fn compile_code_system(
    cs: &CodeSystem,
    hierarchies: &mut HierarchyStore,
) -> Option<Arc<Schema>> {
    match cs.content.as_deref() {
        Some("complete") => {
            let hierarchy = ConceptHierarchy::from_code_system(cs);
            let codes = hierarchy.all_codes();
            hierarchies.insert(hierarchy);
            Some(Schema::enumeration(codes))
        }
        Some("example") | Some("not-present") | Some("fragment") => Some(Schema::nonempty_string()),
        Some("supplement") => None,
        other => {
            warn!(url = %cs.url, content = ?other, "unrecognized code system content; skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cs(content: &str) -> CodeSystem {
        serde_json::from_value(json!({
            "url": "http://example.org/cs/x",
            "content": content,
            "concept": [
                {"code": "a", "concept": [{"code": "b"}]},
                {"code": "c"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn complete_systems_enumerate_recursively() {
        let mut store = HierarchyStore::new();
        let schema = compile_code_system(&cs("complete"), &mut store).unwrap();
        match &*schema {
            Schema::Enumeration(codes) => {
                assert!(codes.contains("a"));
                assert!(codes.contains("b"));
                assert!(codes.contains("c"));
            }
            other => panic!("expected enumeration, got {}", other.type_name()),
        }
        assert!(store.get("http://example.org/cs/x").is_some());
    }

    #[test]
    fn partial_systems_are_permissive() {
        let mut store = HierarchyStore::new();
        for content in ["example", "not-present", "fragment"] {
            let schema = compile_code_system(&cs(content), &mut store).unwrap();
            assert!(matches!(&*schema, Schema::Str(s) if s.min_length == Some(1)));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn supplements_are_skipped() {
        let mut store = HierarchyStore::new();
        assert!(compile_code_system(&cs("supplement"), &mut store).is_none());
    }
}
