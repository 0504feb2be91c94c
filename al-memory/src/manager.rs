//! `SemanticMemory`: the unified save/search facade over embedder, cache
//! and vector store.
//!
//! Invalidation is explicit: `save`, `batch_save` and `update_metadata`
//! clear the collection's query-cache namespace; `delete` relies on the
//! one-hour query TTL. The cache is allowed to be stale within TTL.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::cache::{CacheKey, CacheStats, CacheStore, QUERY_TTL};
use crate::collections::{validate_payload, CollectionName};
use crate::embedder::{CachingEmbedder, EmbedderStats, EmbeddingProvider};
use crate::error::MemoryError;
use crate::store::{NewDocument, VectorStore};
use crate::types::{Filter, Scalar, SearchHit};

/// One item of a batch save.
#[derive(Clone, Debug)]
pub struct MemoryItem {
    pub content: String,
    pub metadata: BTreeMap<String, Scalar>,
}

/// Aggregate statistics for the status surface and the stats tool.
#[derive(Clone, Debug, Serialize)]
pub struct MemoryStats {
    pub cache: Option<CacheStats>,
    pub collections: BTreeMap<String, u64>,
    pub embeddings: EmbedderStats,
}

pub struct SemanticMemoryBuilder {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn VectorStore>>,
    cache: Option<Arc<dyn CacheStore>>,
    deadline: Option<Duration>,
}

impl SemanticMemoryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            embedder: None,
            store: None,
            cache: None,
            deadline: None,
        }
    }

    /// Raw provider; it is wrapped in a [`CachingEmbedder`] over the same
    /// cache handed to [`with_cache`](Self::with_cache).
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Deadline applied to every operation; expiry surfaces as a
    /// retryable timeout.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Result<SemanticMemory, MemoryError> {
        let embedder = self.embedder.ok_or_else(|| MemoryError::Internal {
            detail: "SemanticMemory requires an embedding provider".into(),
        })?;
        let store = self.store.ok_or_else(|| MemoryError::Internal {
            detail: "SemanticMemory requires a vector store".into(),
        })?;
        let embedder = Arc::new(CachingEmbedder::new(embedder, self.cache.clone()));
        Ok(SemanticMemory {
            embedder,
            store,
            cache: self.cache,
            deadline: self.deadline,
        })
    }
}

impl Default for SemanticMemoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SemanticMemory {
    embedder: Arc<CachingEmbedder>,
    store: Arc<dyn VectorStore>,
    cache: Option<Arc<dyn CacheStore>>,
    deadline: Option<Duration>,
}

impl SemanticMemory {
    #[must_use]
    pub fn builder() -> SemanticMemoryBuilder {
        SemanticMemoryBuilder::new()
    }

    /// Create all collections in the store. Call once on startup.
    pub async fn initialize(&self) -> Result<(), MemoryError> {
        for collection in CollectionName::all() {
            self.store.ensure_collection(collection).await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn VectorStore> {
        self.store.clone()
    }

    #[must_use]
    pub fn cache_healthy(&self) -> Option<bool> {
        self.cache.as_ref().map(|c| c.healthy())
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.healthy().await
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = Result<T, MemoryError>>,
    ) -> Result<T, MemoryError> {
        match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(MemoryError::Timeout {
                    detail: format!("{op} exceeded {deadline:?}"),
                }),
            },
            None => fut.await,
        }
    }

    /// Embed `content` and store it with `metadata`, returning the assigned
    /// document id. The current timestamp is stamped into `created_at` when
    /// the caller did not set one.
    #[instrument(skip(self, content, metadata), err)]
    pub async fn save(
        &self,
        collection: CollectionName,
        content: &str,
        metadata: BTreeMap<String, Scalar>,
    ) -> Result<u64, MemoryError> {
        let ids = self
            .bounded(
                "save",
                self.save_batch_inner(
                    collection,
                    vec![MemoryItem {
                        content: content.to_string(),
                        metadata,
                    }],
                ),
            )
            .await?;
        Ok(ids[0])
    }

    /// Save many items with one embedding batch and one atomic upsert.
    /// All-or-nothing: any schema or store failure fails the whole batch.
    #[instrument(skip(self, items), fields(count = items.len()), err)]
    pub async fn batch_save(
        &self,
        collection: CollectionName,
        items: Vec<MemoryItem>,
    ) -> Result<usize, MemoryError> {
        if items.is_empty() {
            return Ok(0);
        }
        let ids = self
            .bounded("batch_save", self.save_batch_inner(collection, items))
            .await?;
        Ok(ids.len())
    }

    async fn save_batch_inner(
        &self,
        collection: CollectionName,
        items: Vec<MemoryItem>,
    ) -> Result<Vec<u64>, MemoryError> {
        // Matches the embedding window (8191 tokens at ~4 bytes/token); the
        // provider truncates, this only surfaces it.
        const TRUNCATION_BYTES: usize = 8191 * 4;

        let now = Utc::now().to_rfc3339();
        let mut payloads = Vec::with_capacity(items.len());
        let mut contents = Vec::with_capacity(items.len());
        for item in items {
            if item.content.len() > TRUNCATION_BYTES {
                tracing::warn!(
                    collection = %collection,
                    bytes = item.content.len(),
                    "content exceeds the embedding window and will be truncated"
                );
            }
            let mut payload = item.metadata;
            payload
                .entry("created_at".to_string())
                .or_insert_with(|| Scalar::String(now.clone()));
            validate_payload(collection, &payload)?;
            payloads.push(payload);
            contents.push(item.content);
        }

        let vectors = self.embedder.embed(&contents).await?;
        let docs: Vec<NewDocument> = contents
            .iter()
            .zip(payloads.into_iter().zip(vectors.into_iter()))
            .map(|(content, (payload, vector))| NewDocument {
                vector,
                payload,
                content_hash: agentloom::utils::sha256(content.as_bytes()),
            })
            .collect();

        let ids = self.store.upsert(collection, docs).await?;
        self.invalidate_queries(collection).await;
        tracing::debug!(
            collection = %collection,
            count = ids.len(),
            "documents saved"
        );
        Ok(ids)
    }

    /// Semantic search with a transparent query cache (1 h TTL).
    ///
    /// Results come back sorted by score descending, ties broken by
    /// ascending id. `top_k == 0` returns an empty list without error.
    #[instrument(skip(self, query, filter), err)]
    pub async fn search(
        &self,
        collection: CollectionName,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        if top_k == 0 {
            return Ok(vec![]);
        }
        if let Some(filter) = filter {
            for field in filter.conditions.keys() {
                if collection.schema().field_type(field).is_none() {
                    return Err(MemoryError::SchemaViolation {
                        detail: format!("filter references unknown field {field:?}"),
                    });
                }
            }
        }

        let cache_key = self.query_cache_key(collection, query, top_k, filter);
        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.get(&cache_key).await {
                if let Ok(hits) = serde_json::from_slice::<Vec<SearchHit>>(&bytes) {
                    tracing::debug!(collection = %collection, "query cache hit");
                    return Ok(hits);
                }
            }
        }

        let hits = self
            .bounded("search", async {
                let vectors = self.embedder.embed(&[query.to_string()]).await?;
                let mut hits = self
                    .store
                    .search(collection, &vectors[0], top_k, filter)
                    .await?;
                hits.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.id.cmp(&b.id))
                });
                Ok(hits)
            })
            .await?;

        if let Some(cache) = &self.cache {
            if let Ok(bytes) = serde_json::to_vec(&hits) {
                cache.put(cache_key, bytes, QUERY_TTL).await;
            }
        }
        Ok(hits)
    }

    /// Partial metadata update; does not re-embed. The collection's query
    /// cache namespace is cleared so staleness is bounded by the next read
    /// rather than the full TTL.
    #[instrument(skip(self, updates), err)]
    pub async fn update_metadata(
        &self,
        collection: CollectionName,
        id: u64,
        updates: BTreeMap<String, Scalar>,
    ) -> Result<bool, MemoryError> {
        validate_payload(collection, &updates)?;
        let updated = self.store.update_payload(collection, id, updates).await?;
        if updated {
            self.invalidate_queries(collection).await;
        }
        Ok(updated)
    }

    /// Tombstone a document. Query caches are left to expire by TTL.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, collection: CollectionName, id: u64) -> Result<bool, MemoryError> {
        self.store.delete(collection, id).await
    }

    /// Cache, collection and embedding statistics.
    pub async fn stats(&self) -> MemoryStats {
        let mut collections = BTreeMap::new();
        for collection in CollectionName::all() {
            let count = self.store.count(collection).await.unwrap_or(0);
            collections.insert(collection.as_str().to_string(), count);
        }
        MemoryStats {
            cache: self.cache.as_ref().map(|c| c.stats()),
            collections,
            embeddings: self.embedder.stats(),
        }
    }

    fn query_cache_key(
        &self,
        collection: CollectionName,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(collection.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(query.as_bytes());
        hasher.update([0u8]);
        hasher.update(top_k.to_le_bytes());
        if let Some(filter) = filter {
            hasher.update(filter.canonical_bytes());
        }
        let digest = hasher.finalize();
        let mut hash = [0u8; 16];
        hash.copy_from_slice(&digest[0..16]);
        CacheKey::new(format!("query:{collection}"), hash)
    }

    async fn invalidate_queries(&self, collection: CollectionName) {
        if let Some(cache) = &self.cache {
            cache.remove_namespace(&format!("query:{collection}")).await;
        }
    }
}
