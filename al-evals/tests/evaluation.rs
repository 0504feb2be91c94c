//! Full harness runs against the real graphs with golden cases.

use std::sync::Arc;

use al_agents::external::{InMemoryObjectStorage, InMemorySocialPublisher};
use al_agents::graphs::{build_feed_publisher_graph, build_invoice_matcher_graph};
use al_agents::llm::TemplateLlm;
use al_evals::{
    aggregate, evaluate, CaptionGrader, CaptionQualitySubject, Dataset, Difficulty,
    ExecutionTracker, InvoiceGrader, InvoiceMatcherSubject, PriceTable, TestCase, TrackingLlm,
};
use al_memory::{HashEmbedder, LruCache, MemoryVectorStore, SemanticMemory};
use serde_json::json;

fn fresh_memory() -> Arc<SemanticMemory> {
    Arc::new(
        SemanticMemory::builder()
            .with_embedder(Arc::new(HashEmbedder::default()))
            .with_store(Arc::new(MemoryVectorStore::new()))
            .with_cache(Arc::new(LruCache::default()))
            .build()
            .unwrap(),
    )
}

fn invoice_dataset() -> Dataset {
    Dataset {
        dataset_name: "invoice_matches".into(),
        version: "1.0".into(),
        test_cases: vec![
            TestCase {
                id: "easy_exact_match".into(),
                difficulty: Difficulty::Easy,
                input: json!({
                    "transaction": {
                        "id": "tx-1", "vendor_name": "SNCB",
                        "amount": 22.70, "date": "2025-01-03"
                    },
                    "invoices": [
                        {"id": 1, "vendor_name": "SNCB", "amount": 22.70, "date": "2025-01-03"}
                    ]
                }),
                expected: json!({
                    "matched": true, "invoice_id": 1, "decision_type": "auto_match"
                }),
            },
            TestCase {
                id: "medium_fuzzy_vendor".into(),
                difficulty: Difficulty::Medium,
                input: json!({
                    "transaction": {
                        "id": "tx-2", "vendor_name": "NMBS",
                        "amount": 22.50, "date": "2025-01-03"
                    },
                    "invoices": [
                        {"id": 2, "vendor_name": "SNCB/NMBS", "amount": 22.70, "date": "2025-01-03"}
                    ]
                }),
                expected: json!({
                    "matched": true, "invoice_id": 2, "decision_type": "human_review"
                }),
            },
            TestCase {
                id: "hard_no_match".into(),
                difficulty: Difficulty::Hard,
                input: json!({
                    "transaction": {
                        "id": "tx-3", "vendor_name": "Unknown",
                        "amount": 100.00, "date": "2025-01-03"
                    },
                    "invoices": [
                        {"id": 3, "vendor_name": "SNCB", "amount": 22.70, "date": "2025-01-03"}
                    ]
                }),
                expected: json!({
                    "matched": false, "invoice_id": null, "decision_type": "no_match"
                }),
            },
        ],
    }
}

#[tokio::test]
async fn invoice_matcher_passes_its_golden_dataset() {
    let graph = Arc::new(build_invoice_matcher_graph(fresh_memory()));
    let subject = InvoiceMatcherSubject::new(graph);
    let dataset = invoice_dataset();

    let results = evaluate(&subject, &dataset, &InvoiceGrader).await;
    assert_eq!(results.len(), 3);
    for result in &results {
        assert!(result.correct, "case {} failed: {:?}", result.case_id, result.actual);
    }

    let metrics = aggregate(&results);
    assert_eq!(metrics["overall_accuracy"], 1.0);
    assert_eq!(metrics["accuracy_easy"], 1.0);
    assert_eq!(metrics["accuracy_medium"], 1.0);
    assert_eq!(metrics["accuracy_hard"], 1.0);
    assert_eq!(metrics["decision_accuracy"], 1.0);
    assert_eq!(metrics["false_positive"], 0.0);
    assert_eq!(metrics["false_negative"], 0.0);
}

#[tokio::test]
async fn adding_an_unsatisfiable_case_lowers_accuracy() {
    let graph = Arc::new(build_invoice_matcher_graph(fresh_memory()));
    let subject = InvoiceMatcherSubject::new(graph);
    let mut dataset = invoice_dataset();

    let before = aggregate(&evaluate(&subject, &dataset, &InvoiceGrader).await)
        ["overall_accuracy"];

    // Expectation no implementation can meet: same input as the no-match
    // case but expecting a match.
    dataset.test_cases.push(TestCase {
        id: "impossible".into(),
        difficulty: Difficulty::Hard,
        input: dataset.test_cases[2].input.clone(),
        expected: json!({"matched": true, "invoice_id": 999}),
    });
    let after = aggregate(&evaluate(&subject, &dataset, &InvoiceGrader).await)
        ["overall_accuracy"];
    assert!(after < before);
}

#[tokio::test]
async fn caption_quality_evaluates_with_cost_tracking() {
    let memory = fresh_memory();
    let storage = Arc::new(InMemoryObjectStorage::new());
    storage.insert("products/pomandi/blazer.jpg", vec![0u8; 512], "image/jpeg");
    let tracker = Arc::new(ExecutionTracker::new());
    let llm = Arc::new(TrackingLlm::new(Arc::new(TemplateLlm), tracker.clone()));
    let graph = Arc::new(build_feed_publisher_graph(
        memory,
        storage,
        llm,
        Arc::new(InMemorySocialPublisher::new()),
    ));
    let subject = CaptionQualitySubject::new(graph);

    let dataset = Dataset {
        dataset_name: "caption_quality".into(),
        version: "1.0".into(),
        test_cases: vec![TestCase {
            id: "pomandi_template".into(),
            difficulty: Difficulty::Easy,
            input: json!({
                "brand": "pomandi",
                "platform": "instagram",
                "photo_key": "products/pomandi/blazer.jpg"
            }),
            expected: json!({"quality": 0.94, "duplicate_detected": false}),
        }],
    };

    let results = evaluate(&subject, &dataset, &CaptionGrader).await;
    assert!(results[0].correct, "actual: {:?}", results[0].actual);
    let metrics = aggregate(&results);
    assert!(metrics["quality_error"] <= 0.15);
    assert_eq!(metrics["duplicate_accuracy"], 1.0);

    // The run consumed tracked completion tokens with a nonzero cost.
    let cost = tracker.cost(&PriceTable::default());
    assert!(cost.completion_tokens > 0);
    assert!(cost.total_usd > 0.0);
}

#[tokio::test]
async fn subject_errors_are_recorded_not_fatal() {
    let graph = Arc::new(build_invoice_matcher_graph(fresh_memory()));
    let subject = InvoiceMatcherSubject::new(graph);
    let dataset = Dataset {
        dataset_name: "broken".into(),
        version: "1.0".into(),
        test_cases: vec![TestCase {
            id: "malformed_input".into(),
            difficulty: Difficulty::Easy,
            input: json!({"not": "a transaction"}),
            expected: json!({"matched": false}),
        }],
    };
    let results = evaluate(&subject, &dataset, &InvoiceGrader).await;
    assert!(!results[0].correct);
    assert!(results[0].error.is_some());
    let metrics = aggregate(&results);
    assert_eq!(metrics["error_rate"], 1.0);
}
