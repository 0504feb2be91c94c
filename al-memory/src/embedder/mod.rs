//! Embedding providers: deterministic text → fixed-dimension vector.
//!
//! The contract every provider honors: output length equals input length,
//! every vector has `dimension()` entries, and the same input text under
//! the same model id produces byte-identical vectors (the cache relies on
//! it). Inputs beyond the model's token window are truncated by the
//! provider; callers must not assume otherwise.

mod caching;
mod hashed;
mod openai;

pub use caching::CachingEmbedder;
pub use hashed::HashEmbedder;
pub use openai::{OpenAiConfig, OpenAiEmbedder};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::MemoryError;

/// Platform-wide embedding dimension (text-embedding-3-small).
pub const EMBEDDING_DIM: usize = 1536;

/// Counters exposed through `SemanticMemory::stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct EmbedderStats {
    /// Vectors actually generated by the underlying provider.
    pub generated: u64,
    /// Vectors served from the embedding cache.
    pub cache_hits: u64,
}

impl EmbedderStats {
    /// Fraction of requested vectors served from cache.
    #[must_use]
    pub fn cached_fraction(&self) -> f64 {
        let total = self.generated + self.cache_hits;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// A source of embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, part of every cache key.
    fn model_id(&self) -> &str;

    /// Output vector dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch. `out.len() == texts.len()` and every vector has
    /// `dimension()` entries.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError>;

    /// Cache-hit counters; providers without a cache report zeros.
    fn stats(&self) -> EmbedderStats {
        EmbedderStats::default()
    }
}

/// Embedding cache key: `sha256(model_id || 0x00 || text)[0..16]`.
#[must_use]
pub fn embedding_cache_key(model_id: &str, text: &str) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[0..16]);
    key
}

/// Little-endian f32 byte form used when vectors transit the cache or the
/// SQLite store. Round-tripping preserves bytes exactly.
#[must_use]
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Inverse of [`vector_to_bytes`]; `None` on a torn byte length.
#[must_use]
pub fn bytes_to_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_separate_models_and_texts() {
        let a = embedding_cache_key("model-a", "hello");
        let b = embedding_cache_key("model-b", "hello");
        let c = embedding_cache_key("model-a", "world");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, embedding_cache_key("model-a", "hello"));
    }

    #[test]
    fn vector_bytes_round_trip_exactly() {
        let v = vec![0.25f32, -1.5, 3.1415927, 0.0];
        let bytes = vector_to_bytes(&v);
        assert_eq!(bytes_to_vector(&bytes).unwrap(), v);
        assert!(bytes_to_vector(&bytes[..5]).is_none());
    }
}
