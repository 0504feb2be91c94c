//! Invoice matcher evaluation: exact-match and decision accuracy.

use std::sync::Arc;

use agentloom::error::PlatformError;
use agentloom::graph::Graph;
use al_agents::graphs::MatchReport;
use al_agents::state::InvoiceMatchState;
use async_trait::async_trait;
use serde_json::Value;

use crate::harness::{Grade, Grader, Subject};

/// Drives the invoice matcher graph directly, one case per run.
pub struct InvoiceMatcherSubject {
    graph: Arc<Graph<InvoiceMatchState>>,
}

impl InvoiceMatcherSubject {
    #[must_use]
    pub fn new(graph: Arc<Graph<InvoiceMatchState>>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Subject for InvoiceMatcherSubject {
    async fn run_case(&self, input: &Value) -> Result<Value, PlatformError> {
        let state: InvoiceMatchState = serde_json::from_value(input.clone())
            .map_err(|e| PlatformError::schema_violation(format!("bad case input: {e}")))?;
        let (sender, _receiver) = flume::unbounded();
        let final_state = self
            .graph
            .run(state, sender)
            .await
            .map_err(|e| PlatformError::internal(e.to_string()))?;
        serde_json::to_value(MatchReport::from(&final_state))
            .map_err(|e| PlatformError::internal(e.to_string()))
    }
}

/// Correct iff `expected.matched == actual.matched` and, when matched, the
/// invoice ids agree. Decision accuracy, confidence error and FP/FN
/// indicators ride along as metrics.
pub struct InvoiceGrader;

impl Grader for InvoiceGrader {
    fn grade(&self, expected: &Value, actual: &Value) -> Grade {
        let expected_matched = expected
            .get("matched")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let actual_matched = actual
            .get("matched")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let expected_id = expected.get("invoice_id").and_then(Value::as_i64);
        let actual_id = actual.get("invoice_id").and_then(Value::as_i64);

        let correct = expected_matched == actual_matched
            && (!expected_matched || expected_id == actual_id);

        let mut metrics = std::collections::BTreeMap::new();
        if let (Some(expected_decision), Some(actual_decision)) = (
            expected.get("decision_type").and_then(Value::as_str),
            actual.get("decision_type").and_then(Value::as_str),
        ) {
            metrics.insert(
                "decision_accuracy".to_string(),
                f64::from(u8::from(expected_decision == actual_decision)),
            );
        }
        if let (Some(expected_confidence), Some(actual_confidence)) = (
            expected.get("confidence").and_then(Value::as_f64),
            actual.get("confidence").and_then(Value::as_f64),
        ) {
            metrics.insert(
                "confidence_error".to_string(),
                (expected_confidence - actual_confidence).abs(),
            );
        }
        metrics.insert(
            "false_positive".to_string(),
            f64::from(u8::from(!expected_matched && actual_matched)),
        );
        metrics.insert(
            "false_negative".to_string(),
            f64::from(u8::from(expected_matched && !actual_matched)),
        );

        Grade { correct, metrics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matched_cases_require_the_same_invoice_id() {
        let grader = InvoiceGrader;
        let expected = json!({"matched": true, "invoice_id": 7, "decision_type": "auto_match"});

        let right = grader.grade(
            &expected,
            &json!({"matched": true, "invoice_id": 7, "decision_type": "auto_match"}),
        );
        assert!(right.correct);
        assert_eq!(right.metrics["decision_accuracy"], 1.0);

        let wrong_id = grader.grade(
            &expected,
            &json!({"matched": true, "invoice_id": 9, "decision_type": "auto_match"}),
        );
        assert!(!wrong_id.correct);
    }

    #[test]
    fn unmatched_cases_ignore_invoice_id() {
        let grader = InvoiceGrader;
        let grade = grader.grade(
            &json!({"matched": false, "invoice_id": null}),
            &json!({"matched": false, "invoice_id": null}),
        );
        assert!(grade.correct);
        assert_eq!(grade.metrics["false_positive"], 0.0);
    }

    #[test]
    fn false_positive_and_negative_indicators() {
        let grader = InvoiceGrader;
        let fp = grader.grade(
            &json!({"matched": false}),
            &json!({"matched": true, "invoice_id": 1}),
        );
        assert_eq!(fp.metrics["false_positive"], 1.0);
        assert!(!fp.correct);

        let fn_ = grader.grade(
            &json!({"matched": true, "invoice_id": 1}),
            &json!({"matched": false}),
        );
        assert_eq!(fn_.metrics["false_negative"], 1.0);
        assert!(!fn_.correct);
    }
}
