//! Slice definitions and discriminator matching.
//!
//! A slice set targets an array-valued field of its parent object. Each
//! candidate element is tested against each slice in declared order; the
//! first slice whose conditions all hold claims the element, which is then
//! validated against that slice's sub-schema. Matching itself is pure;
//! the async validation pass lives in [`super::eval`].

use std::sync::Arc;

use serde_json::Value;

use crate::ir::SlicingRules;

use super::Schema;

/// One discriminator condition compiled from a slice definition.
#[derive(Debug, Clone)]
pub enum SliceCondition {
    /// `exists` discriminator: every value at `path` must be defined.
    Exists { path: Vec<String> },
    /// `value`/`pattern` discriminator: some value at `path` must equal
    /// the slice's declared pattern or fixed value.
    Equals { path: Vec<String>, value: Value },
}

impl SliceCondition {
    pub fn matches(&self, element: &Value) -> bool {
        match self {
            SliceCondition::Exists { path } => !values_at(element, path).is_empty(),
            SliceCondition::Equals { path, value } => {
                values_at(element, path).iter().any(|v| *v == value)
            }
        }
    }
}

/// One slice: identification conditions plus the sub-schema and the
/// match-count bounds.
#[derive(Debug, Clone)]
pub struct SliceCheck {
    pub name: String,
    pub id: String,
    pub path: String,
    pub min: u32,
    pub max: Option<u32>,
    pub conditions: Vec<SliceCondition>,
    pub schema: Arc<Schema>,
}

impl SliceCheck {
    pub fn matches(&self, element: &Value) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(element))
    }
}

/// The compiled slicing of one array field, attached to the parent object
/// as a refinement.
#[derive(Debug, Clone)]
pub struct SliceSet {
    pub field: String,
    pub rules: SlicingRules,
    pub ordered: bool,
    pub slices: Vec<SliceCheck>,
}

impl SliceSet {
    /// Index of the first slice claiming `element`, declared order.
    pub fn identify(&self, element: &Value) -> Option<usize> {
        self.slices.iter().position(|s| s.matches(element))
    }
}

/// All values reachable from `value` by walking `path` through objects,
/// flat-mapping arrays along the way. Nulls are not "defined" and are
/// dropped. An empty path yields the value itself.
pub fn values_at<'a>(value: &'a Value, path: &[String]) -> Vec<&'a Value> {
    let mut current = vec![value];
    for segment in path {
        let mut next = Vec::new();
        for v in current {
            match v {
                Value::Object(map) => {
                    if let Some(found) = map.get(segment) {
                        next.push(found);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(found) = item.get(segment) {
                            next.push(found);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current.into_iter().filter(|v| !v.is_null()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_at_walks_objects_and_arrays() {
        let element = json!({
            "coding": [
                {"system": "http://loinc.org", "code": "1234-5"},
                {"system": "http://snomed.info/sct", "code": "271649006"}
            ]
        });
        let systems = values_at(&element, &["coding".into(), "system".into()]);
        assert_eq!(systems.len(), 2);
        assert_eq!(systems[0], &json!("http://loinc.org"));
    }

    #[test]
    fn empty_path_yields_self() {
        let v = json!({"a": 1});
        assert_eq!(values_at(&v, &[]), vec![&v]);
    }

    #[test]
    fn equals_condition_matches_fixed_value() {
        let condition = SliceCondition::Equals {
            path: vec!["system".into()],
            value: json!("http://example.org/mrn"),
        };
        assert!(condition.matches(&json!({"system": "http://example.org/mrn", "value": "123"})));
        assert!(!condition.matches(&json!({"system": "http://other.org"})));
        assert!(!condition.matches(&json!({})));
    }

    #[test]
    fn exists_condition_requires_defined_value() {
        let condition = SliceCondition::Exists {
            path: vec!["value".into()],
        };
        assert!(condition.matches(&json!({"value": "x"})));
        assert!(!condition.matches(&json!({"value": null})));
        assert!(!condition.matches(&json!({})));
    }

    #[test]
    fn first_matching_slice_wins() {
        let slice = |name: &str, system: &str| SliceCheck {
            name: name.into(),
            id: format!("Pat.identifier:{name}"),
            path: "Pat.identifier".into(),
            min: 0,
            max: None,
            conditions: vec![SliceCondition::Equals {
                path: vec!["system".into()],
                value: json!(system),
            }],
            schema: Schema::any(),
        };
        let set = SliceSet {
            field: "identifier".into(),
            rules: SlicingRules::Open,
            ordered: false,
            slices: vec![slice("mrn", "http://example.org/mrn"), slice("ssn", "http://example.org/ssn")],
        };
        assert_eq!(set.identify(&json!({"system": "http://example.org/ssn"})), Some(1));
        assert_eq!(set.identify(&json!({"system": "http://example.org/mrn"})), Some(0));
        assert_eq!(set.identify(&json!({"system": "http://nowhere"})), None);
    }

    #[test]
    fn slice_without_conditions_claims_nothing() {
        let slice = SliceCheck {
            name: "free".into(),
            id: "X.a:free".into(),
            path: "X.a".into(),
            min: 1,
            max: None,
            conditions: Vec::new(),
            schema: Schema::any(),
        };
        assert!(!slice.matches(&json!({"anything": true})));
    }
}
