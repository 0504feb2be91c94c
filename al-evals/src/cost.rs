//! Token accounting and cost reporting for evaluation runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agentloom::error::PlatformError;
use al_agents::llm::{CompletionOptions, CompletionOutcome, LlmClient};
use async_trait::async_trait;
use serde::Serialize;

/// Per-million-token unit prices, USD.
#[derive(Clone, Copy, Debug)]
pub struct PriceTable {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
    pub embedding_per_million: f64,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            prompt_per_million: 3.0,
            completion_per_million: 15.0,
            embedding_per_million: 0.02,
        }
    }
}

/// Token counters for one evaluation run.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    embedding_tokens: AtomicU64,
}

/// Cost summary derived from a tracker and a price table.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CostReport {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub embedding_tokens: u64,
    pub prompt_usd: f64,
    pub completion_usd: f64,
    pub embedding_usd: f64,
    pub total_usd: f64,
}

impl ExecutionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completion(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
    }

    pub fn record_embedding(&self, tokens: u64) {
        self.embedding_tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    /// Cost so far under `prices`.
    #[must_use]
    pub fn cost(&self, prices: &PriceTable) -> CostReport {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        let embedding_tokens = self.embedding_tokens.load(Ordering::Relaxed);
        let per = |tokens: u64, unit: f64| tokens as f64 / 1_000_000.0 * unit;
        let prompt_usd = per(prompt_tokens, prices.prompt_per_million);
        let completion_usd = per(completion_tokens, prices.completion_per_million);
        let embedding_usd = per(embedding_tokens, prices.embedding_per_million);
        CostReport {
            prompt_tokens,
            completion_tokens,
            embedding_tokens,
            prompt_usd,
            completion_usd,
            embedding_usd,
            total_usd: prompt_usd + completion_usd + embedding_usd,
        }
    }
}

/// LLM wrapper that records token usage into a tracker.
pub struct TrackingLlm {
    inner: Arc<dyn LlmClient>,
    tracker: Arc<ExecutionTracker>,
}

impl TrackingLlm {
    #[must_use]
    pub fn new(inner: Arc<dyn LlmClient>, tracker: Arc<ExecutionTracker>) -> Self {
        Self { inner, tracker }
    }
}

#[async_trait]
impl LlmClient for TrackingLlm {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionOutcome, PlatformError> {
        let outcome = self.inner.complete(prompt, options).await?;
        self.tracker
            .record_completion(outcome.prompt_tokens, outcome.completion_tokens);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_agents::llm::TemplateLlm;
    use al_agents::state::Language;

    #[test]
    fn cost_report_applies_unit_prices() {
        let tracker = ExecutionTracker::new();
        tracker.record_completion(2_000_000, 1_000_000);
        tracker.record_embedding(10_000_000);
        let report = tracker.cost(&PriceTable::default());
        assert_eq!(report.prompt_usd, 6.0);
        assert_eq!(report.completion_usd, 15.0);
        assert!((report.embedding_usd - 0.2).abs() < 1e-9);
        assert!((report.total_usd - 21.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tracking_llm_accumulates_usage() {
        let tracker = Arc::new(ExecutionTracker::new());
        let llm = TrackingLlm::new(Arc::new(TemplateLlm), tracker.clone());
        let options = CompletionOptions {
            language: Some(Language::Nl),
            ..Default::default()
        };
        llm.complete("generate a caption", &options).await.unwrap();
        llm.complete("generate a caption", &options).await.unwrap();

        let report = tracker.cost(&PriceTable::default());
        assert!(report.prompt_tokens > 0);
        assert!(report.completion_tokens > 0);
        assert!(report.total_usd > 0.0);
    }
}
