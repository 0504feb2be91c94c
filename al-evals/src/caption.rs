//! Caption quality evaluation: scores within tolerance, duplicate
//! detection accuracy.

use std::sync::Arc;

use agentloom::error::PlatformError;
use agentloom::graph::Graph;
use al_agents::graphs::PublishReport;
use al_agents::state::FeedPublishState;
use async_trait::async_trait;
use serde_json::Value;

use crate::harness::{Grade, Grader, Subject};

/// Tolerance on the quality score.
pub const QUALITY_TOLERANCE: f64 = 0.15;

/// Drives the feed publisher graph directly, one case per run.
pub struct CaptionQualitySubject {
    graph: Arc<Graph<FeedPublishState>>,
}

impl CaptionQualitySubject {
    #[must_use]
    pub fn new(graph: Arc<Graph<FeedPublishState>>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Subject for CaptionQualitySubject {
    async fn run_case(&self, input: &Value) -> Result<Value, PlatformError> {
        let state: FeedPublishState = serde_json::from_value(input.clone())
            .map_err(|e| PlatformError::schema_violation(format!("bad case input: {e}")))?;
        let (sender, _receiver) = flume::unbounded();
        let final_state = self
            .graph
            .run(state, sender)
            .await
            .map_err(|e| PlatformError::internal(e.to_string()))?;
        serde_json::to_value(PublishReport::from(&final_state))
            .map_err(|e| PlatformError::internal(e.to_string()))
    }
}

/// Correct iff the quality score lands within ±0.15 of the expected score.
/// When the expected record declares `duplicate_detected`, agreement on it
/// is also required and reported as a metric.
pub struct CaptionGrader;

impl Grader for CaptionGrader {
    fn grade(&self, expected: &Value, actual: &Value) -> Grade {
        let expected_quality = expected.get("quality").and_then(Value::as_f64);
        let actual_quality = actual.get("quality_score").and_then(Value::as_f64);

        let mut metrics = std::collections::BTreeMap::new();
        let mut correct = match (expected_quality, actual_quality) {
            (Some(e), Some(a)) => {
                metrics.insert("quality_error".to_string(), (e - a).abs());
                (e - a).abs() <= QUALITY_TOLERANCE
            }
            _ => false,
        };

        if let Some(expected_duplicate) =
            expected.get("duplicate_detected").and_then(Value::as_bool)
        {
            let actual_duplicate = actual
                .get("duplicate_detected")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let agrees = expected_duplicate == actual_duplicate;
            metrics.insert("duplicate_accuracy".to_string(), f64::from(u8::from(agrees)));
            correct = correct && agrees;
        }

        Grade { correct, metrics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quality_within_tolerance_is_correct() {
        let grader = CaptionGrader;
        assert!(
            grader
                .grade(&json!({"quality": 0.90}), &json!({"quality_score": 0.80}))
                .correct
        );
        assert!(
            !grader
                .grade(&json!({"quality": 0.90}), &json!({"quality_score": 0.60}))
                .correct
        );
    }

    #[test]
    fn duplicate_expectation_must_agree() {
        let grader = CaptionGrader;
        let grade = grader.grade(
            &json!({"quality": 0.90, "duplicate_detected": true}),
            &json!({"quality_score": 0.90, "duplicate_detected": false}),
        );
        assert!(!grade.correct);
        assert_eq!(grade.metrics["duplicate_accuracy"], 0.0);
    }

    #[test]
    fn missing_quality_is_incorrect() {
        let grader = CaptionGrader;
        assert!(!grader.grade(&json!({}), &json!({})).correct);
    }
}
