//! ValueSet lowering.
//!
//! A compose becomes `Refined(OR(includes), [Not(AND(excludes))])`: a
//! value passes iff it passes some include and none of the excludes. A
//! compose without includes is malformed and compiles to `Never`.

use std::sync::Arc;

use tracing::warn;

use crate::definitions::{ComposeEntry, ValueSet};
use crate::runtime::{CodeFilter, FilterOp, Refinement, Schema};

use super::Ctx;

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Include,
    Exclude,
}

impl Mode {
    /// What an unresolved reference degrades to: permissive for includes
    /// (anything may be in), empty for excludes (nothing provably out).
    fn unresolved_default(self) -> Arc<Schema> {
        match self {
            Mode::Include => Schema::nonempty_string(),
            Mode::Exclude => Schema::never(),
        }
    }
}

pub(crate) fn compile_value_set(vs: &ValueSet, ctx: &Ctx<'_>) -> Arc<Schema> {
    let Some(compose) = &vs.compose else {
        warn!(url = %vs.url, "value set without compose; compiled to Never");
        return Schema::never();
    };

    let includes: Vec<Arc<Schema>> = compose
        .include
        .iter()
        .filter_map(|entry| expand_entry(vs, entry, Mode::Include, ctx))
        .collect();

    if includes.is_empty() {
        warn!(url = %vs.url, "value set compose has no usable include; compiled to Never");
        return Schema::never();
    }

    let excludes: Vec<Arc<Schema>> = compose
        .exclude
        .iter()
        .filter_map(|entry| expand_entry(vs, entry, Mode::Exclude, ctx))
        .collect();

    let included = Schema::one_of(includes);
    if excludes.is_empty() {
        included
    } else {
        Schema::refined(
            included,
            vec![Refinement::Not(Schema::all_of(excludes))],
        )
    }
}

/// Expand one compose entry into a validator, or `None` when the entry
/// carries nothing checkable.
fn expand_entry(
    vs: &ValueSet,
    entry: &ComposeEntry,
    mode: Mode,
    ctx: &Ctx<'_>,
) -> Option<Arc<Schema>> {
    // Referenced value sets take precedence; several in one entry must
    // all admit the value.
    if !entry.value_set.is_empty() {
        let resolved: Vec<Arc<Schema>> = entry
            .value_set
            .iter()
            .map(|reference| {
                ctx.resolve(crate::deps::strip_version(reference))
                    .unwrap_or_else(|| mode.unresolved_default())
            })
            .collect();
        return Some(Schema::all_of(resolved));
    }

    let system = entry.system.as_deref()?;
    let system = crate::deps::strip_version(system);

    // An explicit concept list stands on its own; it does not depend on
    // the system's validator.
    if !entry.concept.is_empty() {
        if entry.concept.len() == 1 {
            return Some(Schema::literal(serde_json::Value::String(
                entry.concept[0].code.clone(),
            )));
        }
        return Some(Schema::enumeration(
            entry.concept.iter().map(|c| c.code.clone()),
        ));
    }

    if !entry.filter.is_empty() {
        let base = ctx.resolve(system).unwrap_or_else(Schema::nonempty_string);
        let refinements: Vec<Refinement> = entry
            .filter
            .iter()
            .filter_map(|filter| match FilterOp::parse(&filter.op) {
                Some(op) => Some(Refinement::Filter(CodeFilter {
                    op,
                    value: filter.value.clone(),
                    property: filter.property.clone(),
                    system: Some(system.to_string()),
                })),
                None => {
                    warn!(
                        url = %vs.url,
                        op = %filter.op,
                        "unsupported value set filter operator; ignored"
                    );
                    None
                }
            })
            .collect();
        return Some(Schema::refined(base, refinements));
    }

    Some(ctx.resolve(system).unwrap_or_else(|| mode.unresolved_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompiledSet;
    use serde_json::json;

    fn vs(compose: serde_json::Value) -> ValueSet {
        serde_json::from_value(json!({
            "url": "http://example.org/vs/test",
            "compose": compose
        }))
        .unwrap()
    }

    #[test]
    fn empty_include_compiles_to_never() {
        let set = CompiledSet::new_for_tests();
        let ctx = Ctx::new_for_tests(&set, "http://example.org/vs/test");
        let schema = compile_value_set(&vs(json!({"include": []})), &ctx);
        assert!(matches!(*schema, Schema::Never));
    }

    #[test]
    fn concept_lists_enumerate_without_system_validator() {
        let set = CompiledSet::new_for_tests();
        let ctx = Ctx::new_for_tests(&set, "http://example.org/vs/test");
        let schema = compile_value_set(
            &vs(json!({"include": [{
                "system": "http://example.org/cs/unseen",
                "concept": [{"code": "a"}, {"code": "b"}]
            }]})),
            &ctx,
        );
        assert!(matches!(&*schema, Schema::Enumeration(codes) if codes.len() == 2));
    }

    #[test]
    fn single_concept_becomes_literal() {
        let set = CompiledSet::new_for_tests();
        let ctx = Ctx::new_for_tests(&set, "http://example.org/vs/test");
        let schema = compile_value_set(
            &vs(json!({"include": [{
                "system": "http://example.org/cs/unseen",
                "concept": [{"code": "only"}]
            }]})),
            &ctx,
        );
        assert!(matches!(&*schema, Schema::Literal(v) if v == &json!("only")));
    }

    #[test]
    fn excludes_become_not_refinement() {
        let set = CompiledSet::new_for_tests();
        let ctx = Ctx::new_for_tests(&set, "http://example.org/vs/test");
        let schema = compile_value_set(
            &vs(json!({
                "include": [{"system": "http://example.org/cs/unresolved"}],
                "exclude": [{
                    "system": "http://example.org/cs/unresolved",
                    "concept": [{"code": "lambda"}]
                }]
            })),
            &ctx,
        );
        let Schema::Refined(refined) = &*schema else {
            panic!("expected refined schema");
        };
        assert!(matches!(refined.refinements[0], Refinement::Not(_)));
    }

    #[test]
    fn unsupported_filter_operator_is_ignored() {
        let set = CompiledSet::new_for_tests();
        let ctx = Ctx::new_for_tests(&set, "http://example.org/vs/test");
        let schema = compile_value_set(
            &vs(json!({"include": [{
                "system": "http://example.org/cs/unresolved",
                "filter": [{"property": "concept", "op": "exists", "value": "true"}]
            }]})),
            &ctx,
        );
        // The filter dropped, only the permissive base remains.
        assert!(matches!(&*schema, Schema::Str(s) if s.min_length == Some(1)));
    }
}
