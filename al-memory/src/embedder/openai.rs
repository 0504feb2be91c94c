//! OpenAI-backed embedding provider.
//!
//! Batches up to 100 texts per call, truncates each text to the model's
//! 8191-token window before sending, retries transient failures with
//! exponential backoff, and throttles itself with a global in-flight limit
//! plus a token-per-minute bucket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tracing::instrument;

use crate::error::MemoryError;

use super::{EmbeddingProvider, EMBEDDING_DIM};

/// Max texts per underlying API call.
const BATCH_SIZE: usize = 100;
/// Model input window in tokens.
const MAX_INPUT_TOKENS: usize = 8191;
/// Rough bytes-per-token used for client-side truncation.
const BYTES_PER_TOKEN: usize = 4;
const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    /// Global cap on in-flight embedding requests.
    pub max_concurrency: usize,
    /// Token-per-minute budget for the token bucket.
    pub tokens_per_minute: f64,
}

impl OpenAiConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "text-embedding-3-small".to_string(),
            dimension: EMBEDDING_DIM,
            base_url: "https://api.openai.com/v1".to_string(),
            max_concurrency: 10,
            tokens_per_minute: 1_000_000.0,
        }
    }
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_minute: f64) -> Self {
        Self {
            tokens: per_minute,
            capacity: per_minute,
            refill_per_sec: per_minute / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = Instant::now();
    }

    /// Seconds to wait before `amount` tokens are available, taking them
    /// when they are.
    fn take(&mut self, amount: f64) -> Duration {
        self.refill();
        if self.tokens >= amount {
            self.tokens -= amount;
            Duration::ZERO
        } else {
            let deficit = amount - self.tokens;
            self.tokens = 0.0;
            Duration::from_secs_f64(deficit / self.refill_per_sec)
        }
    }
}

pub struct OpenAiEmbedder {
    http: reqwest::Client,
    config: OpenAiConfig,
    in_flight: Arc<Semaphore>,
    bucket: Mutex<TokenBucket>,
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(config: OpenAiConfig) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let bucket = Mutex::new(TokenBucket::new(config.tokens_per_minute));
        Self {
            http: reqwest::Client::new(),
            config,
            in_flight,
            bucket,
        }
    }

    fn truncate(text: &str) -> &str {
        let max_bytes = MAX_INPUT_TOKENS * BYTES_PER_TOKEN;
        if text.len() <= max_bytes {
            return text;
        }
        let mut end = max_bytes;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }

    fn estimate_tokens(texts: &[&str]) -> f64 {
        texts
            .iter()
            .map(|t| (t.len() / BYTES_PER_TOKEN + 1) as f64)
            .sum()
    }

    #[instrument(skip(self, batch), err)]
    async fn embed_batch(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let wait = {
            let mut bucket = self.bucket.lock().await;
            bucket.take(Self::estimate_tokens(batch))
        };
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "token budget exhausted");
            tokio::time::sleep(wait).await;
        }

        let _permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MemoryError::Internal {
                detail: "embedding semaphore closed".into(),
            })?;

        let mut attempt: u32 = 1;
        loop {
            match self.request(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if attempt < MAX_ATTEMPTS && e.kind().retryable() => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying embedding batch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        #[derive(Deserialize)]
        struct EmbeddingData {
            index: usize,
            embedding: Vec<f32>,
        }
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        let response = self
            .http
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "input": batch,
                "dimensions": self.config.dimension,
            }))
            .send()
            .await
            .map_err(|e| MemoryError::StoreUnavailable {
                detail: format!("embedding request failed: {e}"),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(MemoryError::RateLimited {
                detail: "embedding provider returned 429".into(),
            });
        }
        if status.is_server_error() {
            return Err(MemoryError::StoreUnavailable {
                detail: format!("embedding provider returned {status}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::EmbeddingFailed {
                detail: format!("embedding provider returned {status}: {body}"),
            });
        }

        let mut parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| MemoryError::EmbeddingFailed {
                    detail: format!("malformed embedding response: {e}"),
                })?;
        parsed.data.sort_by_key(|d| d.index);

        if parsed.data.len() != batch.len() {
            return Err(MemoryError::EmbeddingFailed {
                detail: format!(
                    "provider returned {} vectors for {} inputs",
                    parsed.data.len(),
                    batch.len()
                ),
            });
        }
        for data in &parsed.data {
            if data.embedding.len() != self.config.dimension {
                return Err(MemoryError::EmbeddingFailed {
                    detail: format!(
                        "provider returned dimension {} (expected {})",
                        data.embedding.len(),
                        self.config.dimension
                    ),
                });
            }
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let capped = base.min(BACKOFF_CAP.as_millis() as u64);
    // Deterministic jitter up to 25% so simultaneous retries fan out.
    let spread = agentloom::utils::sha256(&attempt.to_le_bytes())[0] as u64 % 256;
    Duration::from_millis(capped + capped * spread / 1024)
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let truncated: Vec<&str> = texts.iter().map(|t| Self::truncate(t)).collect();
        let mut out = Vec::with_capacity(texts.len());
        for batch in truncated.chunks(BATCH_SIZE) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_INPUT_TOKENS * BYTES_PER_TOKEN);
        let cut = OpenAiEmbedder::truncate(&long);
        assert!(cut.len() <= MAX_INPUT_TOKENS * BYTES_PER_TOKEN);
        assert!(cut.chars().all(|c| c == 'é'));

        let short = "hello";
        assert_eq!(OpenAiEmbedder::truncate(short), short);
    }

    #[test]
    fn token_bucket_charges_and_refills() {
        let mut bucket = TokenBucket::new(600.0); // 10 tokens/sec
        assert_eq!(bucket.take(100.0), Duration::ZERO);
        // Draining beyond capacity reports a wait proportional to deficit.
        let wait = bucket.take(600.0);
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(11));
    }

    #[test]
    fn backoff_is_capped() {
        assert!(backoff_delay(1) >= BACKOFF_BASE);
        assert!(backoff_delay(12) <= BACKOFF_CAP + BACKOFF_CAP / 4);
    }
}
