//! Brute-force in-memory vector store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::collections::CollectionName;
use crate::error::MemoryError;
use crate::types::{cosine_similarity, Document, Filter, Scalar, SearchHit};

use super::{NewDocument, VectorStore};

#[derive(Default)]
struct CollectionData {
    docs: BTreeMap<u64, Document>,
    /// Monotonic id source; never rewinds on delete, so ids are not reused.
    next_id: u64,
}

/// Exact cosine search over in-memory documents. Used by tests and the
/// evaluation harness; behaviorally identical to the SQLite store.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<FxHashMap<CollectionName, CollectionData>>,
}

impl MemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct document access for test assertions.
    pub async fn get(&self, collection: CollectionName, id: u64) -> Option<Document> {
        let collections = self.collections.read().await;
        collections
            .get(&collection)
            .and_then(|c| c.docs.get(&id))
            .cloned()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, collection: CollectionName) -> Result<(), MemoryError> {
        let mut collections = self.collections.write().await;
        collections.entry(collection).or_default();
        Ok(())
    }

    async fn upsert(
        &self,
        collection: CollectionName,
        docs: Vec<NewDocument>,
    ) -> Result<Vec<u64>, MemoryError> {
        let expected_dim = collection.dimension();
        for doc in &docs {
            if doc.vector.len() != expected_dim {
                return Err(MemoryError::SchemaViolation {
                    detail: format!(
                        "vector dimension {} does not match collection {collection} ({expected_dim})",
                        doc.vector.len()
                    ),
                });
            }
        }
        let mut collections = self.collections.write().await;
        let data = collections.entry(collection).or_default();
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            data.next_id += 1;
            let id = data.next_id;
            data.docs.insert(
                id,
                Document {
                    id,
                    vector: doc.vector,
                    payload: doc.payload,
                    content_hash: doc.content_hash,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn search(
        &self,
        collection: CollectionName,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        if top_k == 0 {
            return Ok(vec![]);
        }
        let collections = self.collections.read().await;
        let Some(data) = collections.get(&collection) else {
            return Ok(vec![]);
        };
        let mut hits: Vec<SearchHit> = data
            .docs
            .values()
            .filter(|doc| filter.map_or(true, |f| f.matches(&doc.payload)))
            .map(|doc| SearchHit {
                id: doc.id,
                score: cosine_similarity(vector, &doc.vector),
                payload: doc.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn update_payload(
        &self,
        collection: CollectionName,
        id: u64,
        updates: BTreeMap<String, Scalar>,
    ) -> Result<bool, MemoryError> {
        let mut collections = self.collections.write().await;
        let Some(doc) = collections
            .get_mut(&collection)
            .and_then(|c| c.docs.get_mut(&id))
        else {
            return Ok(false);
        };
        for (field, value) in updates {
            doc.payload.insert(field, value);
        }
        Ok(true)
    }

    async fn delete(&self, collection: CollectionName, id: u64) -> Result<bool, MemoryError> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(&collection)
            .map(|c| c.docs.remove(&id).is_some())
            .unwrap_or(false))
    }

    async fn count(&self, collection: CollectionName) -> Result<u64, MemoryError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|c| c.docs.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(vector: Vec<f32>, pairs: &[(&str, Scalar)]) -> NewDocument {
        NewDocument {
            vector,
            payload: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            content_hash: [0u8; 32],
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    // Tests run against a 1536-dim store because collections declare it.
    const DIM: usize = 1536;

    #[tokio::test]
    async fn ids_are_assigned_and_never_reused() {
        let store = MemoryVectorStore::new();
        let ids = store
            .upsert(
                CollectionName::Invoices,
                vec![doc(unit(DIM, 0), &[]), doc(unit(DIM, 1), &[])],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);

        assert!(store.delete(CollectionName::Invoices, 2).await.unwrap());
        let ids = store
            .upsert(CollectionName::Invoices, vec![doc(unit(DIM, 2), &[])])
            .await
            .unwrap();
        assert_eq!(ids, vec![3], "deleted id must not be reassigned");
    }

    #[tokio::test]
    async fn search_ranks_by_score_then_id() {
        let store = MemoryVectorStore::new();
        // Two identical vectors tie; the lower id must come first.
        store
            .upsert(
                CollectionName::Invoices,
                vec![
                    doc(unit(DIM, 0), &[]),
                    doc(unit(DIM, 0), &[]),
                    doc(unit(DIM, 5), &[]),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search(CollectionName::Invoices, &unit(DIM, 0), 10, None)
            .await
            .unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(hits[0].score > hits[2].score);
    }

    #[tokio::test]
    async fn filters_apply_before_truncation() {
        let store = MemoryVectorStore::new();
        // The best-scoring doc does not match the filter; top_k=1 must
        // return the best *matching* doc, not an empty set.
        store
            .upsert(
                CollectionName::Invoices,
                vec![
                    doc(unit(DIM, 0), &[("matched", Scalar::Bool(true))]),
                    doc(unit(DIM, 1), &[("matched", Scalar::Bool(false))]),
                ],
            )
            .await
            .unwrap();
        let filter = Filter::new().eq("matched", false);
        let hits = store
            .search(CollectionName::Invoices, &unit(DIM, 0), 1, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = MemoryVectorStore::new();
        let err = store
            .upsert(CollectionName::Invoices, vec![doc(vec![1.0, 2.0], &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn update_payload_merges_fields() {
        let store = MemoryVectorStore::new();
        let ids = store
            .upsert(
                CollectionName::Invoices,
                vec![doc(unit(DIM, 0), &[("matched", Scalar::Bool(false))])],
            )
            .await
            .unwrap();
        let updated = store
            .update_payload(
                CollectionName::Invoices,
                ids[0],
                [("matched".to_string(), Scalar::Bool(true))].into(),
            )
            .await
            .unwrap();
        assert!(updated);
        let doc = store.get(CollectionName::Invoices, ids[0]).await.unwrap();
        assert_eq!(doc.payload["matched"], Scalar::Bool(true));

        assert!(!store
            .update_payload(CollectionName::Invoices, 999, BTreeMap::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn top_k_zero_returns_empty() {
        let store = MemoryVectorStore::new();
        store
            .upsert(CollectionName::Invoices, vec![doc(unit(DIM, 0), &[])])
            .await
            .unwrap();
        let hits = store
            .search(CollectionName::Invoices, &unit(DIM, 0), 0, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
