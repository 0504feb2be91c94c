//! Evaluator contract: run cases, grade outcomes, aggregate metrics.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use agentloom::error::PlatformError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::dataset::{Dataset, Difficulty};

/// Something that can execute one golden case.
#[async_trait]
pub trait Subject: Send + Sync {
    async fn run_case(&self, input: &Value) -> Result<Value, PlatformError>;
}

/// Verdict on a single case.
#[derive(Clone, Debug)]
pub struct Grade {
    pub correct: bool,
    /// Domain metrics, averaged by [`aggregate`] across cases (so 0/1
    /// indicator metrics aggregate into rates).
    pub metrics: BTreeMap<String, f64>,
}

/// Domain-specific correctness rules.
pub trait Grader: Send + Sync {
    fn grade(&self, expected: &Value, actual: &Value) -> Grade;
}

/// Result of one evaluated case.
#[derive(Clone, Debug)]
pub struct CaseResult {
    pub case_id: String,
    pub difficulty: Difficulty,
    pub correct: bool,
    pub actual: Value,
    pub expected: Value,
    pub latency: Duration,
    pub error: Option<String>,
    pub metrics: BTreeMap<String, f64>,
}

/// Run every case of `dataset` through `subject` and grade the outcomes.
///
/// A failing case (subject error) is incorrect with the error recorded;
/// evaluation continues with the remaining cases.
#[instrument(skip(subject, dataset, grader), fields(dataset = %dataset.dataset_name))]
pub async fn evaluate(
    subject: &dyn Subject,
    dataset: &Dataset,
    grader: &dyn Grader,
) -> Vec<CaseResult> {
    let mut results = Vec::with_capacity(dataset.test_cases.len());
    for case in &dataset.test_cases {
        let started = Instant::now();
        let outcome = subject.run_case(&case.input).await;
        let latency = started.elapsed();

        let result = match outcome {
            Ok(actual) => {
                let grade = grader.grade(&case.expected, &actual);
                CaseResult {
                    case_id: case.id.clone(),
                    difficulty: case.difficulty,
                    correct: grade.correct,
                    actual,
                    expected: case.expected.clone(),
                    latency,
                    error: None,
                    metrics: grade.metrics,
                }
            }
            Err(e) => CaseResult {
                case_id: case.id.clone(),
                difficulty: case.difficulty,
                correct: false,
                actual: Value::Null,
                expected: case.expected.clone(),
                latency,
                error: Some(e.to_string()),
                metrics: BTreeMap::new(),
            },
        };
        tracing::debug!(
            case = %result.case_id,
            correct = result.correct,
            latency_ms = latency.as_millis() as u64,
            "case evaluated"
        );
        results.push(result);
    }
    results
}

fn percentile(sorted_ms: &[f64], p: f64) -> f64 {
    if sorted_ms.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted_ms.len() - 1) as f64).round() as usize;
    sorted_ms[rank.min(sorted_ms.len() - 1)]
}

/// Reduce case results to aggregate metrics.
///
/// Always present: `overall_accuracy`, `total_cases`, `error_rate`,
/// `latency_p50_ms`, `latency_p95_ms`, and `accuracy_<difficulty>` for
/// every difficulty observed. Per-case metric maps are averaged under
/// their own names, so indicator metrics become rates.
#[must_use]
pub fn aggregate(results: &[CaseResult]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let total = results.len();
    out.insert("total_cases".to_string(), total as f64);
    if total == 0 {
        out.insert("overall_accuracy".to_string(), 0.0);
        return out;
    }

    let correct = results.iter().filter(|r| r.correct).count();
    out.insert(
        "overall_accuracy".to_string(),
        correct as f64 / total as f64,
    );
    out.insert(
        "error_rate".to_string(),
        results.iter().filter(|r| r.error.is_some()).count() as f64 / total as f64,
    );

    for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
        let cases: Vec<&CaseResult> = results
            .iter()
            .filter(|r| r.difficulty == difficulty)
            .collect();
        if cases.is_empty() {
            continue;
        }
        let correct = cases.iter().filter(|r| r.correct).count();
        out.insert(
            format!("accuracy_{}", difficulty.as_str()),
            correct as f64 / cases.len() as f64,
        );
    }

    let mut latencies_ms: Vec<f64> = results
        .iter()
        .map(|r| r.latency.as_secs_f64() * 1000.0)
        .collect();
    latencies_ms.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    out.insert("latency_p50_ms".to_string(), percentile(&latencies_ms, 0.50));
    out.insert("latency_p95_ms".to_string(), percentile(&latencies_ms, 0.95));

    // Average every domain metric across the cases that reported it.
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for result in results {
        for (name, value) in &result.metrics {
            let entry = sums.entry(name.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    for (name, (sum, count)) in sums {
        out.insert(name, sum / count as f64);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, difficulty: Difficulty, correct: bool) -> CaseResult {
        CaseResult {
            case_id: id.into(),
            difficulty,
            correct,
            actual: Value::Null,
            expected: Value::Null,
            latency: Duration::from_millis(10),
            error: None,
            metrics: BTreeMap::new(),
        }
    }

    #[test]
    fn aggregate_computes_overall_and_per_difficulty_accuracy() {
        let results = vec![
            result("a", Difficulty::Easy, true),
            result("b", Difficulty::Easy, true),
            result("c", Difficulty::Medium, false),
            result("d", Difficulty::Hard, true),
        ];
        let metrics = aggregate(&results);
        assert_eq!(metrics["overall_accuracy"], 0.75);
        assert_eq!(metrics["accuracy_easy"], 1.0);
        assert_eq!(metrics["accuracy_medium"], 0.0);
        assert_eq!(metrics["accuracy_hard"], 1.0);
        assert!(metrics["latency_p50_ms"] > 0.0);
    }

    #[test]
    fn adding_a_failing_case_cannot_raise_accuracy() {
        let mut results = vec![
            result("a", Difficulty::Easy, true),
            result("b", Difficulty::Medium, false),
        ];
        let before = aggregate(&results)["overall_accuracy"];
        results.push(result("c", Difficulty::Hard, false));
        let after = aggregate(&results)["overall_accuracy"];
        assert!(after <= before);
    }

    #[test]
    fn indicator_metrics_become_rates() {
        let mut a = result("a", Difficulty::Easy, true);
        a.metrics.insert("false_positive".into(), 1.0);
        let mut b = result("b", Difficulty::Easy, true);
        b.metrics.insert("false_positive".into(), 0.0);
        let metrics = aggregate(&[a, b]);
        assert_eq!(metrics["false_positive"], 0.5);
    }

    #[test]
    fn empty_results_aggregate_to_zero() {
        let metrics = aggregate(&[]);
        assert_eq!(metrics["overall_accuracy"], 0.0);
        assert_eq!(metrics["total_cases"], 0.0);
    }
}
