//! Pluggable FHIRPath evaluation seam.
//!
//! Full FHIRPath semantics need a terminology server and a real engine;
//! both live outside this crate. Validators accept an optional evaluator:
//! absent, every embedded constraint passes (constraints that cannot be
//! checked must not produce false positives). Errors from a present
//! evaluator are logged and also treated as pass.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FhirPathError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

/// Async FHIRPath evaluation over a JSON focus node.
///
/// `root` is the outermost resource of the document under validation,
/// made available to expressions as `%rootResource`.
#[async_trait]
pub trait FhirPathEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        expression: &str,
        focus: &Value,
        root: &Value,
    ) -> Result<Vec<Value>, FhirPathError>;
}

/// Whether an evaluation result is a constraint failure: a non-empty list
/// containing a falsy element.
pub fn is_constraint_failure(result: &[Value]) -> bool {
    !result.is_empty()
        && result
            .iter()
            .any(|v| matches!(v, Value::Bool(false) | Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_result_is_not_a_failure() {
        assert!(!is_constraint_failure(&[]));
    }

    #[test]
    fn false_element_fails() {
        assert!(is_constraint_failure(&[json!(false)]));
        assert!(is_constraint_failure(&[json!(true), json!(false)]));
        assert!(!is_constraint_failure(&[json!(true)]));
    }
}
