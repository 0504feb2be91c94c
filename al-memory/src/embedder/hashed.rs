//! Deterministic feature-hashing embedder for tests and offline use.
//!
//! Each lowercase token hashes to a pseudo-random direction; a text's
//! vector is the normalized sum of its token directions. Identical texts
//! embed identically, texts sharing most tokens land close together, and
//! unrelated texts are near-orthogonal — enough structure for round-trip
//! and duplicate-detection properties without a model.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::MemoryError;

use super::{EmbeddingProvider, EMBEDDING_DIM};

#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "embedding dimension must be positive");
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

fn token_direction(token: &str, dimension: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dimension);
    let mut counter: u32 = 0;
    let mut block = [0u8; 32];
    let mut offset = block.len();
    while out.len() < dimension {
        if offset >= block.len() {
            let mut hasher = Sha256::new();
            hasher.update(token.as_bytes());
            hasher.update(counter.to_le_bytes());
            block = hasher.finalize().into();
            counter += 1;
            offset = 0;
        }
        // Map one byte onto [-1, 1].
        let byte = block[offset];
        out.push((f32::from(byte) - 127.5) / 127.5);
        offset += 1;
    }
    out
}

fn embed_one(text: &str, dimension: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dimension];
    let mut tokens = 0usize;
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        for (acc, v) in sum.iter_mut().zip(token_direction(token, dimension)) {
            *acc += v;
        }
        tokens += 1;
    }
    if tokens == 0 {
        // Empty text embeds as a fixed unit direction.
        sum[0] = 1.0;
        return sum;
    }
    let norm: f32 = sum.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut sum {
            *v /= norm;
        }
    }
    sum
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts
            .iter()
            .map(|t| embed_one(t, self.dimension))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::cosine_similarity;

    #[tokio::test]
    async fn identical_texts_embed_identically() {
        let embedder = HashEmbedder::new(256);
        let a = embedder.embed(&["hello world".into()]).await.unwrap();
        let b = embedder.embed(&["hello world".into()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 256);
    }

    #[tokio::test]
    async fn vectors_are_unit_norm() {
        let embedder = HashEmbedder::new(128);
        let v = &embedder.embed(&["normalize me please".into()]).await.unwrap()[0];
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn near_identical_texts_are_close() {
        let embedder = HashEmbedder::new(512);
        let out = embedder
            .embed(&[
                "Nieuw binnen! Perfect voor jouw stijl vandaag".into(),
                "Nieuw binnen! Perfect voor jouw stijl morgen".into(),
                "quarterly revenue dashboards for enterprise finance".into(),
            ])
            .await
            .unwrap();
        let close = cosine_similarity(&out[0], &out[1]);
        let far = cosine_similarity(&out[0], &out[2]);
        assert!(close > 0.9, "similar captions should be close: {close}");
        assert!(far < 0.5, "unrelated text should be far: {far}");
    }

    #[tokio::test]
    async fn empty_text_embeds_without_error() {
        let embedder = HashEmbedder::new(64);
        let out = embedder.embed(&["".into()]).await.unwrap();
        assert_eq!(out[0][0], 1.0);
    }
}
