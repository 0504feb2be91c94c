//! Write-through embedding cache wrapper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{CacheKey, CacheStore, EMBED_TTL};
use crate::error::MemoryError;

use super::{
    bytes_to_vector, embedding_cache_key, vector_to_bytes, EmbedderStats, EmbeddingProvider,
};

/// Caches vectors from an inner provider under
/// `embed:sha256(model || 0 || text)[0..16]` with a 7-day TTL.
///
/// Vectors transit the cache as raw little-endian f32 bytes, so a cached
/// vector is byte-identical to the generated one. Without a cache the
/// wrapper degrades to pass-through; the cache is never load-bearing for
/// correctness.
pub struct CachingEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<dyn CacheStore>>,
    generated: AtomicU64,
    cache_hits: AtomicU64,
}

impl CachingEmbedder {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Option<Arc<dyn CacheStore>>) -> Self {
        Self {
            provider,
            cache,
            generated: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachingEmbedder {
    fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let Some(cache) = &self.cache else {
            self.generated
                .fetch_add(texts.len() as u64, Ordering::Relaxed);
            return self.provider.embed(texts).await;
        };

        let model = self.provider.model_id().to_string();
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = CacheKey::new("embed", embedding_cache_key(&model, text));
            match cache.get(&key).await.and_then(|b| bytes_to_vector(&b)) {
                Some(vector) if vector.len() == self.dimension() => out[i] = Some(vector),
                _ => {
                    miss_indices.push(i);
                    miss_texts.push(text.clone());
                }
            }
        }

        self.cache_hits.fetch_add(
            (texts.len() - miss_texts.len()) as u64,
            Ordering::Relaxed,
        );

        if !miss_texts.is_empty() {
            let fresh = self.provider.embed(&miss_texts).await?;
            self.generated
                .fetch_add(fresh.len() as u64, Ordering::Relaxed);
            for (slot, (text, vector)) in miss_indices
                .iter()
                .zip(miss_texts.iter().zip(fresh.into_iter()))
            {
                let key = CacheKey::new("embed", embedding_cache_key(&model, text));
                cache.put(key, vector_to_bytes(&vector), EMBED_TTL).await;
                out[*slot] = Some(vector);
            }
        }

        Ok(out
            .into_iter()
            .map(|v| v.expect("every slot filled by hit or miss path"))
            .collect())
    }

    fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            generated: self.generated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use crate::embedder::HashEmbedder;

    #[tokio::test]
    async fn cache_serves_repeat_texts_byte_identically() {
        let cache: Arc<dyn CacheStore> = Arc::new(LruCache::with_capacity(1 << 20));
        let embedder = CachingEmbedder::new(
            Arc::new(HashEmbedder::new(64)),
            Some(cache),
        );

        let first = embedder.embed(&["hello".into()]).await.unwrap();
        let second = embedder.embed(&["hello".into()]).await.unwrap();
        assert_eq!(first, second);

        let stats = embedder.stats();
        assert_eq!(stats.generated, 1);
        assert_eq!(stats.cache_hits, 1);
        assert!((stats.cached_fraction() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn mixed_batches_preserve_order() {
        let cache: Arc<dyn CacheStore> = Arc::new(LruCache::with_capacity(1 << 20));
        let embedder = CachingEmbedder::new(Arc::new(HashEmbedder::new(32)), Some(cache));

        embedder.embed(&["b".into()]).await.unwrap();
        let out = embedder
            .embed(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        let direct = HashEmbedder::new(32)
            .embed(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(out, direct);
    }

    #[tokio::test]
    async fn absent_cache_is_pass_through() {
        let embedder = CachingEmbedder::new(Arc::new(HashEmbedder::new(32)), None);
        let out = embedder.embed(&["x".into()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(embedder.stats().cache_hits, 0);
        assert_eq!(embedder.stats().generated, 1);
    }
}
