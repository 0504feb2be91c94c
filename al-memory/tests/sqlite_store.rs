//! sqlite-vec store behaves like the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use al_memory::{
    CollectionName, Filter, HashEmbedder, Scalar, SemanticMemory, SqliteVectorStore, VectorStore,
};

fn metadata(pairs: &[(&str, Scalar)]) -> BTreeMap<String, Scalar> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn sqlite_round_trip_with_filters() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteVectorStore::open(dir.path().join("memory.db"))
            .await
            .unwrap(),
    );
    let memory = SemanticMemory::builder()
        .with_embedder(Arc::new(HashEmbedder::default()))
        .with_store(store.clone())
        .build()
        .unwrap();
    memory.initialize().await.unwrap();

    let matched_id = memory
        .save(
            CollectionName::Invoices,
            "Invoice from SNCB for train ticket 22.70",
            metadata(&[
                ("vendor_name", Scalar::from("SNCB")),
                ("amount", Scalar::Float(22.70)),
                ("matched", Scalar::Bool(true)),
            ]),
        )
        .await
        .unwrap();
    let open_id = memory
        .save(
            CollectionName::Invoices,
            "Invoice from SNCB for monthly pass 109.00",
            metadata(&[
                ("vendor_name", Scalar::from("SNCB")),
                ("amount", Scalar::Float(109.00)),
                ("matched", Scalar::Bool(false)),
            ]),
        )
        .await
        .unwrap();
    assert_ne!(matched_id, open_id);

    let unmatched_only = Filter::new().eq("matched", false);
    let hits = memory
        .search(
            CollectionName::Invoices,
            "SNCB invoice",
            10,
            Some(&unmatched_only),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, open_id);
    assert_eq!(hits[0].payload["amount"].as_f64(), Some(109.00));

    // Exact-content search puts the exact document on top with a high score.
    let exact = memory
        .search(
            CollectionName::Invoices,
            "Invoice from SNCB for train ticket 22.70",
            2,
            None,
        )
        .await
        .unwrap();
    assert_eq!(exact[0].id, matched_id);
    assert!(exact[0].score >= 0.95);

    // Tombstoned documents disappear from search and count, and their id
    // is not reassigned.
    assert!(memory.delete(CollectionName::Invoices, open_id).await.unwrap());
    assert_eq!(store.count(CollectionName::Invoices).await.unwrap(), 1);
    let next_id = memory
        .save(CollectionName::Invoices, "another", BTreeMap::new())
        .await
        .unwrap();
    assert!(next_id > open_id);

    // Metadata updates merge without re-embedding.
    assert!(memory
        .update_metadata(
            CollectionName::Invoices,
            matched_id,
            metadata(&[("matched", Scalar::Bool(false))]),
        )
        .await
        .unwrap());
    let hits = memory
        .search(
            CollectionName::Invoices,
            "SNCB invoice",
            10,
            Some(&unmatched_only),
        )
        .await
        .unwrap();
    assert!(hits.iter().any(|h| h.id == matched_id));

    assert!(store.healthy().await);
}

#[tokio::test]
async fn range_and_in_filters_compile_to_sql() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteVectorStore::open(dir.path().join("filters.db"))
            .await
            .unwrap(),
    );
    let memory = SemanticMemory::builder()
        .with_embedder(Arc::new(HashEmbedder::default()))
        .with_store(store)
        .build()
        .unwrap();

    for (vendor, amount) in [("SNCB", 22.7), ("Delhaize", 45.3), ("Proximus", 31.0)] {
        memory
            .save(
                CollectionName::Invoices,
                &format!("Invoice from {vendor}"),
                metadata(&[
                    ("vendor_name", Scalar::from(vendor)),
                    ("amount", Scalar::Float(amount)),
                ]),
            )
            .await
            .unwrap();
    }

    let filter = Filter::new()
        .is_in(
            "vendor_name",
            vec![Scalar::from("SNCB"), Scalar::from("Proximus")],
        )
        .range("amount", None, None, Some(25.0), None);
    let hits = memory
        .search(CollectionName::Invoices, "Invoice", 10, Some(&filter))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload["vendor_name"], Scalar::from("Proximus"));
}
