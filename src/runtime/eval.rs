//! Asynchronous schema evaluation.
//!
//! Evaluation is uniformly awaitable, even for pure refinements, so the
//! engine has one code path and can fan out independent subtree checks.
//! Sibling subtrees are issued concurrently via `join_all` and their
//! findings concatenated in declaration order, which keeps issue ordering
//! stable: pre-order of the JSON tree, then refinement declaration order.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_recursion::async_recursion;
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Issue, IssueCode};
use crate::fhirpath::{FhirPathEvaluator, is_constraint_failure};
use crate::hierarchy::{ConceptHierarchy, HierarchyStore};
use crate::ir::SlicingRules;

use super::slicing::SliceSet;
use super::{CodeFilter, FilterOp, Refinement, Schema};

/// Location within the document under validation.
#[derive(Debug, Clone, Default)]
pub struct JsonPath {
    segments: Vec<PathSegment>,
}

#[derive(Debug, Clone)]
enum PathSegment {
    Key(String),
    Index(usize),
}

impl JsonPath {
    pub fn root(name: Option<&str>) -> Self {
        Self {
            segments: name
                .map(|n| vec![PathSegment::Key(n.to_string())])
                .unwrap_or_default(),
        }
    }

    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self { segments }
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    /// Whether the ambient position is directly inside an array.
    pub fn ends_in_index(&self) -> bool {
        matches!(self.segments.last(), Some(PathSegment::Index(_)))
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Key(k) => f.write_str(k)?,
                PathSegment::Index(n) => write!(f, "{n}")?,
            }
        }
        Ok(())
    }
}

/// Cooperative cancellation signal. In-flight evaluation observes it
/// between steps and returns a partial issue list annotated `cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Arrange for cancellation after `duration`. Drives per-call
    /// validation timeouts.
    pub fn cancel_after(&self, duration: Duration) {
        let flag = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            flag.cancel();
        });
    }
}

/// Executes compiled schemas against JSON documents.
pub struct SchemaEngine {
    hierarchies: Arc<HierarchyStore>,
    fhirpath: Option<Arc<dyn FhirPathEvaluator>>,
}

impl SchemaEngine {
    pub fn new(hierarchies: Arc<HierarchyStore>) -> Self {
        Self {
            hierarchies,
            fhirpath: None,
        }
    }

    pub fn with_fhirpath(mut self, evaluator: Arc<dyn FhirPathEvaluator>) -> Self {
        self.fhirpath = Some(evaluator);
        self
    }

    /// Validate `document` against `schema`, returning every finding.
    pub async fn validate(
        &self,
        schema: &Schema,
        document: &Value,
        cancel: &CancelFlag,
    ) -> Vec<Issue> {
        let root_name = document.get("resourceType").and_then(Value::as_str);
        let path = JsonPath::root(root_name);
        self.eval(schema, document, document, &path, cancel).await
    }

    #[async_recursion]
    pub(crate) async fn eval(
        &self,
        schema: &Schema,
        value: &Value,
        root: &Value,
        path: &JsonPath,
        cancel: &CancelFlag,
    ) -> Vec<Issue> {
        if cancel.is_cancelled() {
            return vec![Issue::new(
                IssueCode::Cancelled,
                path.to_string(),
                "validation cancelled",
            )];
        }

        match schema {
            Schema::Any => Vec::new(),

            Schema::Never => vec![Issue::new(
                IssueCode::TypeMismatch,
                path.to_string(),
                "no value is acceptable here",
            )],

            Schema::Boolean => match value {
                Value::Bool(_) => Vec::new(),
                Value::String(s) if s == "true" || s == "false" => Vec::new(),
                other => type_mismatch(path, "boolean", other),
            },

            Schema::Str(s) => {
                let Some(text) = value.as_str() else {
                    return type_mismatch(path, "string", value);
                };
                let mut issues = Vec::new();
                let length = text.chars().count();
                if let Some(min) = s.min_length {
                    if length < min {
                        issues.push(Issue::new(
                            IssueCode::LengthViolation,
                            path.to_string(),
                            format!("string is shorter than {min} characters"),
                        ));
                    }
                }
                if let Some(max) = s.max_length {
                    if length > max {
                        issues.push(Issue::new(
                            IssueCode::LengthViolation,
                            path.to_string(),
                            format!("string exceeds {max} characters"),
                        ));
                    }
                }
                if let Some(regex) = &s.regex {
                    if !regex.is_match(text) {
                        issues.push(Issue::new(
                            IssueCode::RegexViolation,
                            path.to_string(),
                            format!("value does not match pattern '{}'", regex.as_str()),
                        ));
                    }
                }
                issues
            }

            Schema::Number(n) => {
                let Some(number) = value.as_f64() else {
                    return type_mismatch(path, "number", value);
                };
                let mut issues = Vec::new();
                if let Some(min) = n.min {
                    if number < min {
                        issues.push(boundary(path, format!("value is below minimum {min}")));
                    }
                }
                if let Some(max) = n.max {
                    if number > max {
                        issues.push(boundary(path, format!("value is above maximum {max}")));
                    }
                }
                issues
            }

            Schema::Integer(n) => {
                let Some(number) = value.as_i64() else {
                    return type_mismatch(path, "integer", value);
                };
                let mut issues = Vec::new();
                if let Some(min) = n.min {
                    if number < min {
                        issues.push(boundary(path, format!("value is below minimum {min}")));
                    }
                }
                if let Some(max) = n.max {
                    if number > max {
                        issues.push(boundary(path, format!("value is above maximum {max}")));
                    }
                }
                issues
            }

            Schema::Literal(expected) => {
                if value == expected {
                    Vec::new()
                } else {
                    vec![Issue::new(
                        IssueCode::PatternViolation,
                        path.to_string(),
                        format!("expected fixed value {expected}"),
                    )]
                }
            }

            Schema::Enumeration(codes) => match value.as_str() {
                Some(code) if codes.contains(code) => Vec::new(),
                Some(code) => vec![Issue::new(
                    IssueCode::EnumViolation,
                    path.to_string(),
                    format!("code '{code}' is not in the enumerated set"),
                )],
                None => type_mismatch(path, "code", value),
            },

            Schema::Array(a) => {
                let Some(items) = value.as_array() else {
                    return type_mismatch(path, "array", value);
                };
                let mut issues = Vec::new();
                if (items.len() as u32) < a.min {
                    issues.push(Issue::new(
                        IssueCode::CardinalityViolation,
                        path.to_string(),
                        format!("expected at least {} items, found {}", a.min, items.len()),
                    ));
                }
                if let Some(max) = a.max {
                    if items.len() as u32 > max {
                        issues.push(Issue::new(
                            IssueCode::CardinalityViolation,
                            path.to_string(),
                            format!("expected at most {max} items, found {}", items.len()),
                        ));
                    }
                }
                let futures = items.iter().enumerate().map(|(i, item)| {
                    let item_path = path.index(i);
                    async move { self.eval(&a.item, item, root, &item_path, cancel).await }
                });
                for item_issues in join_all(futures).await {
                    issues.extend(item_issues);
                }
                issues
            }

            Schema::Optional(inner) => match value {
                Value::Null => Vec::new(),
                present => self.eval(inner, present, root, path, cancel).await,
            },

            Schema::Object(o) => {
                let Some(map) = value.as_object() else {
                    return type_mismatch(path, "object", value);
                };
                // Unknown fields are permitted: FHIR is open-world.
                let futures = o.fields.iter().map(|(field, field_schema)| {
                    let field_path = path.child(field);
                    async move {
                        match map.get(field) {
                            Some(field_value) => {
                                self.eval(field_schema, field_value, root, &field_path, cancel)
                                    .await
                            }
                            None if field_schema.accepts_absence() => Vec::new(),
                            None => vec![Issue::new(
                                IssueCode::MissingRequiredField,
                                field_path.to_string(),
                                format!("missing required field '{field}'"),
                            )],
                        }
                    }
                });
                join_all(futures).await.into_iter().flatten().collect()
            }

            Schema::Union(branches) => {
                let futures = branches
                    .iter()
                    .map(|branch| self.eval(branch, value, root, path, cancel));
                let results = join_all(futures).await;
                if results.iter().any(|issues| issues.is_empty()) {
                    Vec::new()
                } else {
                    // All branches failed; report the closest match.
                    results
                        .into_iter()
                        .min_by_key(|issues| issues.len())
                        .unwrap_or_default()
                }
            }

            Schema::Intersection(branches) => {
                let futures = branches
                    .iter()
                    .map(|branch| self.eval(branch, value, root, path, cancel));
                join_all(futures).await.into_iter().flatten().collect()
            }

            Schema::Refined(refined) => {
                let mut issues = self.eval(&refined.inner, value, root, path, cancel).await;
                for refinement in &refined.refinements {
                    issues.extend(
                        self.apply_refinement(refinement, value, root, path, cancel)
                            .await,
                    );
                }
                issues
            }
        }
    }

    #[async_recursion]
    async fn apply_refinement(
        &self,
        refinement: &Refinement,
        value: &Value,
        root: &Value,
        path: &JsonPath,
        cancel: &CancelFlag,
    ) -> Vec<Issue> {
        if cancel.is_cancelled() {
            return vec![Issue::new(
                IssueCode::Cancelled,
                path.to_string(),
                "validation cancelled",
            )];
        }

        match refinement {
            Refinement::FhirPath {
                key,
                expression,
                human,
            } => {
                let Some(evaluator) = &self.fhirpath else {
                    return Vec::new();
                };
                match evaluator.evaluate(expression, value, root).await {
                    Ok(result) if is_constraint_failure(&result) => {
                        vec![Issue::new(
                            IssueCode::FhirPathConstraint,
                            path.to_string(),
                            format!("{key}: {human}"),
                        )]
                    }
                    Ok(_) => Vec::new(),
                    Err(error) => {
                        // Constraints that cannot be checked must not
                        // produce false positives.
                        debug!(key = %key, %error, "fhirpath evaluation failed; constraint passes");
                        Vec::new()
                    }
                }
            }

            Refinement::AtMostOneOfPrefix { prefix } => {
                let Some(map) = value.as_object() else {
                    return Vec::new();
                };
                let hits = map.keys().filter(|k| k.starts_with(prefix.as_str())).count();
                if hits > 1 {
                    vec![Issue::new(
                        IssueCode::ChoiceOfTypeAmbiguity,
                        path.to_string(),
                        format!("more than one value for choice '{prefix}[x]'"),
                    )]
                } else {
                    Vec::new()
                }
            }

            Refinement::NonEmptyObject => match value.as_object() {
                Some(map) if map.is_empty() && !path.ends_in_index() => {
                    vec![Issue::new(
                        IssueCode::TypeMismatch,
                        path.to_string(),
                        "empty object",
                    )]
                }
                _ => Vec::new(),
            },

            Refinement::ExactValue { field, value: expected } => {
                let Some(map) = value.as_object() else {
                    return Vec::new();
                };
                match map.get(field) {
                    Some(actual) if actual != expected => vec![Issue::new(
                        IssueCode::PatternViolation,
                        path.child(field).to_string(),
                        format!("expected fixed value {expected}"),
                    )],
                    _ => Vec::new(),
                }
            }

            Refinement::Slicing(set) => self.eval_slicing(set, value, root, path, cancel).await,

            Refinement::Filter(filter) => {
                let Some(code) = value.as_str() else {
                    // The base schema reports non-code values.
                    return Vec::new();
                };
                if self.filter_accepts(filter, code) {
                    Vec::new()
                } else {
                    vec![Issue::new(
                        IssueCode::EnumViolation,
                        path.to_string(),
                        format!("code '{code}' is excluded by a value set filter"),
                    )]
                }
            }

            Refinement::Not(excluded) => {
                let issues = self.eval(excluded, value, root, path, cancel).await;
                if issues.is_empty() {
                    vec![Issue::new(
                        IssueCode::EnumViolation,
                        path.to_string(),
                        "value is excluded by the value set",
                    )]
                } else {
                    Vec::new()
                }
            }
        }
    }

    async fn eval_slicing(
        &self,
        set: &SliceSet,
        value: &Value,
        root: &Value,
        path: &JsonPath,
        cancel: &CancelFlag,
    ) -> Vec<Issue> {
        let Some(map) = value.as_object() else {
            return Vec::new();
        };
        let items: Vec<&Value> = match map.get(&set.field) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
        };

        let field_path = path.child(&set.field);
        let mut issues = Vec::new();
        let mut match_counts = vec![0u32; set.slices.len()];

        for (i, item) in items.iter().enumerate() {
            let item_path = field_path.index(i);
            match set.identify(item) {
                Some(slice_index) => {
                    match_counts[slice_index] += 1;
                    let slice = &set.slices[slice_index];
                    issues.extend(self.eval(&slice.schema, item, root, &item_path, cancel).await);
                }
                None if set.rules == SlicingRules::Closed => {
                    issues.push(Issue::new(
                        IssueCode::SliceUnmatched,
                        item_path.to_string(),
                        format!("element matches no slice of closed slicing on '{}'", set.field),
                    ));
                }
                None => {}
            }
        }

        for (slice, count) in set.slices.iter().zip(&match_counts) {
            if *count < slice.min {
                issues.push(Issue::new(
                    IssueCode::CardinalityViolation,
                    field_path.to_string(),
                    format!("{} requires {}", slice.id, slice.path),
                ));
            }
            if let Some(max) = slice.max {
                if *count > max {
                    issues.push(Issue::new(
                        IssueCode::CardinalityViolation,
                        field_path.to_string(),
                        format!("{} matched {count} elements, at most {max} allowed", slice.id),
                    ));
                }
            }
        }

        issues
    }

    fn filter_accepts(&self, filter: &CodeFilter, code: &str) -> bool {
        let hierarchy = filter
            .system
            .as_deref()
            .and_then(|system| self.hierarchies.get(system));

        if filter.targets_code() {
            return code_filter_accepts(filter.op, &filter.value, code, hierarchy.as_deref());
        }

        // Property filter: resolve the concept's property, then apply the
        // same operator over its rendered value. Missing hierarchy or
        // concept data cannot be checked and passes.
        let Some(node) = hierarchy.as_deref().and_then(|h| h.find(code)) else {
            return true;
        };
        match node.properties.get(&filter.property) {
            Some(property) => code_filter_accepts(
                filter.op,
                &filter.value,
                &property.as_comparable(),
                hierarchy.as_deref(),
            ),
            // A concept without the property satisfies only the negated
            // operators.
            None => matches!(filter.op, FilterOp::NotIn | FilterOp::IsNotA),
        }
    }
}

/// One filter operator over a candidate, with conservative degradation
/// when no hierarchy is available.
fn code_filter_accepts(
    op: FilterOp,
    filter_value: &str,
    candidate: &str,
    hierarchy: Option<&ConceptHierarchy>,
) -> bool {
    match op {
        FilterOp::Equal => candidate == filter_value,
        FilterOp::Regex => match Regex::new(&format!("^(?:{filter_value})$")) {
            Ok(regex) => regex.is_match(candidate),
            Err(error) => {
                warn!(pattern = %filter_value, %error, "invalid filter regex; accepting");
                true
            }
        },
        FilterOp::In => csv_contains(filter_value, candidate),
        FilterOp::NotIn => !csv_contains(filter_value, candidate),
        FilterOp::IsA => {
            candidate == filter_value
                || hierarchy
                    .map(|h| h.descendants(filter_value).iter().any(|d| d == candidate))
                    .unwrap_or(false)
        }
        FilterOp::IsNotA => {
            !code_filter_accepts(FilterOp::IsA, filter_value, candidate, hierarchy)
        }
        FilterOp::DescendentOf => match hierarchy {
            Some(h) => h.descendants(filter_value).iter().any(|d| d == candidate),
            None => candidate != filter_value,
        },
        FilterOp::Generalizes => {
            candidate == filter_value
                || hierarchy
                    .map(|h| h.ancestors(filter_value).iter().any(|a| a == candidate))
                    .unwrap_or(false)
        }
    }
}

fn csv_contains(csv: &str, candidate: &str) -> bool {
    csv.split(',').map(str::trim).any(|entry| entry == candidate)
}

fn type_mismatch(path: &JsonPath, expected: &str, actual: &Value) -> Vec<Issue> {
    vec![Issue::new(
        IssueCode::TypeMismatch,
        path.to_string(),
        format!("expected {expected}, got {}", json_kind(actual)),
    )]
}

fn boundary(path: &JsonPath, message: String) -> Issue {
    Issue::new(IssueCode::BoundaryViolation, path.to_string(), message)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
