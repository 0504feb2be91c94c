//! End-to-end graph scenarios: invoice matching bands and duplicate
//! caption detection.

use std::sync::Arc;

use al_agents::external::{InMemoryObjectStorage, InMemorySocialPublisher};
use al_agents::graphs::{
    build_feed_publisher_graph, build_invoice_matcher_graph, MatchReport, PublishReport,
};
use al_agents::llm::TemplateLlm;
use al_agents::state::{
    Brand, DecisionType, FeedPublishState, InvoiceMatchState, InvoiceRecord, Platform, Transaction,
};
use al_memory::{
    CollectionName, HashEmbedder, LruCache, MemoryVectorStore, Scalar, SemanticMemory,
};
use chrono::NaiveDate;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

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

fn transaction(vendor: &str, amount: f64, day: &str) -> Transaction {
    Transaction {
        id: "tx-1".into(),
        vendor_name: vendor.into(),
        amount,
        date: date(day),
        communication: None,
    }
}

fn invoice(id: i64, vendor: &str, amount: f64, day: &str) -> InvoiceRecord {
    InvoiceRecord {
        id,
        vendor_name: vendor.into(),
        amount,
        date: date(day),
    }
}

async fn run_matcher(
    memory: Arc<SemanticMemory>,
    transaction: Transaction,
    invoices: Vec<InvoiceRecord>,
) -> MatchReport {
    let graph = build_invoice_matcher_graph(memory);
    let (tx, _rx) = flume::unbounded();
    let final_state = graph
        .run(InvoiceMatchState::new(transaction, invoices), tx)
        .await
        .unwrap();
    MatchReport::from(&final_state)
}

#[tokio::test]
async fn exact_invoice_auto_matches() {
    let report = run_matcher(
        fresh_memory(),
        transaction("SNCB", 22.70, "2025-01-03"),
        vec![invoice(1, "SNCB", 22.70, "2025-01-03")],
    )
    .await;

    assert!(report.matched);
    assert_eq!(report.invoice_id, Some(1));
    assert!(report.confidence >= 0.95);
    assert_eq!(report.decision_type, DecisionType::AutoMatch);
    assert_eq!(
        report.steps_completed,
        vec![
            "build_query",
            "search_memory",
            "compare_invoices",
            "save_context"
        ]
    );
}

#[tokio::test]
async fn fuzzy_vendor_requires_human_review() {
    let report = run_matcher(
        fresh_memory(),
        transaction("NMBS", 22.50, "2025-01-03"),
        vec![invoice(2, "SNCB/NMBS", 22.70, "2025-01-03")],
    )
    .await;

    assert!(report.matched);
    assert_eq!(report.invoice_id, Some(2));
    assert!((0.70..0.90).contains(&report.confidence), "{}", report.confidence);
    assert_eq!(report.decision_type, DecisionType::HumanReview);
}

#[tokio::test]
async fn unrelated_vendor_is_no_match_and_skips_save_context() {
    let report = run_matcher(
        fresh_memory(),
        transaction("Unknown", 100.00, "2025-01-03"),
        vec![invoice(3, "SNCB", 22.70, "2025-01-03")],
    )
    .await;

    assert!(!report.matched);
    assert!(report.confidence < 0.70);
    assert_eq!(report.decision_type, DecisionType::NoMatch);
    assert!(!report
        .steps_completed
        .iter()
        .any(|s| s == "save_context"));
}

#[tokio::test]
async fn auto_match_persists_decision_context() {
    let memory = fresh_memory();
    run_matcher(
        memory.clone(),
        transaction("SNCB", 22.70, "2025-01-03"),
        vec![invoice(1, "SNCB", 22.70, "2025-01-03")],
    )
    .await;

    let stats = memory.stats().await;
    assert_eq!(stats.collections["agent_context"], 1);
    let hits = memory
        .search(CollectionName::AgentContext, "Invoice matching decision", 5, None)
        .await
        .unwrap();
    assert_eq!(
        hits[0].payload["agent_name"],
        Scalar::from("invoice_matcher")
    );
    assert_eq!(hits[0].payload["context_type"], Scalar::from("auto_match"));
    assert_eq!(hits[0].payload["transaction_id"], Scalar::from("tx-1"));
}

#[tokio::test]
async fn memory_candidates_supplement_the_input_list() {
    let memory = fresh_memory();
    // Pre-seed an unmatched invoice that is absent from the input list.
    let mut metadata = std::collections::BTreeMap::new();
    metadata.insert("invoice_id".to_string(), Scalar::Integer(42));
    metadata.insert("vendor_name".to_string(), Scalar::from("SNCB"));
    metadata.insert("amount".to_string(), Scalar::Float(22.70));
    metadata.insert("date".to_string(), Scalar::from("2025-01-03"));
    metadata.insert("matched".to_string(), Scalar::Bool(false));
    memory
        .save(
            CollectionName::Invoices,
            "Invoice from SNCB for train ticket €22.70 date:2025-01-03",
            metadata,
        )
        .await
        .unwrap();

    let report = run_matcher(
        memory,
        transaction("SNCB", 22.70, "2025-01-03"),
        vec![],
    )
    .await;
    assert!(report.matched);
    assert_eq!(report.invoice_id, Some(42));
    assert!(report.reasoning.contains("from memory"));
}

fn publisher_fixtures() -> (
    Arc<SemanticMemory>,
    Arc<InMemoryObjectStorage>,
    Arc<InMemorySocialPublisher>,
) {
    let storage = Arc::new(InMemoryObjectStorage::new());
    storage.insert(
        "products/pomandi/blazer-navy-001.jpg",
        vec![0u8; 2048],
        "image/jpeg",
    );
    (fresh_memory(), storage, Arc::new(InMemorySocialPublisher::new()))
}

async fn run_publisher(
    memory: Arc<SemanticMemory>,
    storage: Arc<InMemoryObjectStorage>,
    publisher: Arc<InMemorySocialPublisher>,
) -> PublishReport {
    let graph = build_feed_publisher_graph(memory, storage, Arc::new(TemplateLlm), publisher);
    let (tx, _rx) = flume::unbounded();
    let state = FeedPublishState::new(
        Brand::Pomandi,
        Platform::Instagram,
        "products/pomandi/blazer-navy-001.jpg",
    );
    let final_state = graph.run(state, tx).await.unwrap();
    PublishReport::from(&final_state)
}

#[tokio::test]
async fn quality_caption_publishes_and_saves_history() {
    let (memory, storage, publisher) = publisher_fixtures();
    let report = run_publisher(memory.clone(), storage, publisher.clone()).await;

    assert!(report.published);
    assert!(report.instagram_post_id.is_some());
    assert!(report.quality_score >= 0.85);
    assert!(!report.requires_approval);
    assert_eq!(
        report.steps_completed,
        vec![
            "check_history",
            "describe_image",
            "generate_caption",
            "quality_check",
            "publish",
            "save_memory"
        ]
    );
    assert_eq!(publisher.published_count(), 1);

    let stats = memory.stats().await;
    assert_eq!(stats.collections["social_posts"], 1);
}

#[tokio::test]
async fn duplicate_caption_skips_publish_but_still_saves() {
    let (memory, storage, publisher) = publisher_fixtures();

    // First run publishes and saves the caption to history.
    let first = run_publisher(memory.clone(), storage.clone(), publisher.clone()).await;
    assert!(first.published);

    // The template produces a nearly identical caption; history now flags
    // it as a duplicate.
    let second = run_publisher(memory.clone(), storage, publisher.clone()).await;
    assert!(second.duplicate_detected);
    assert!(!second.published, "duplicate must not publish");
    assert!(second
        .warnings
        .iter()
        .any(|w| w.contains("similar caption")), "warnings: {:?}", second.warnings);
    assert!(second
        .steps_completed
        .iter()
        .any(|s| s == "save_memory"), "save_memory still runs");
    assert!(!second.steps_completed.iter().any(|s| s == "publish"));
    assert_eq!(publisher.published_count(), 1);

    let stats = memory.stats().await;
    assert_eq!(stats.collections["social_posts"], 2);
}
