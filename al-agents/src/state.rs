//! Typed graph states and the domain records flowing through them.
//!
//! Each graph declares one state record. Fields the caller provides are
//! required at construction; everything a node fills in later defaults.

use agentloom::graph::GraphState;
use al_memory::SearchHit;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A bank transaction to match against invoices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub vendor_name: String,
    pub amount: f64,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication: Option<String>,
}

/// An open invoice candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: i64,
    pub vendor_name: String,
    pub amount: f64,
    pub date: NaiveDate,
}

/// Outcome class of an invoice match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    AutoMatch,
    HumanReview,
    #[default]
    NoMatch,
}

impl DecisionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::AutoMatch => "auto_match",
            DecisionType::HumanReview => "human_review",
            DecisionType::NoMatch => "no_match",
        }
    }
}

/// State of one invoice-matcher run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceMatchState {
    pub transaction: Transaction,
    pub invoices: Vec<InvoiceRecord>,

    #[serde(default)]
    pub memory_query: String,
    #[serde(default)]
    pub memory_results: Vec<SearchHit>,
    #[serde(default)]
    pub matched_invoice_id: Option<i64>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub decision_type: DecisionType,
    #[serde(default)]
    pub reasoning: String,

    #[serde(default)]
    pub steps_completed: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl InvoiceMatchState {
    #[must_use]
    pub fn new(transaction: Transaction, invoices: Vec<InvoiceRecord>) -> Self {
        Self {
            transaction,
            invoices,
            memory_query: String::new(),
            memory_results: vec![],
            matched_invoice_id: None,
            confidence: 0.0,
            decision_type: DecisionType::NoMatch,
            reasoning: String::new(),
            steps_completed: vec![],
            warnings: vec![],
        }
    }

    #[must_use]
    pub fn matched(&self) -> bool {
        self.matched_invoice_id.is_some()
    }
}

impl GraphState for InvoiceMatchState {
    fn steps_completed(&self) -> &[String] {
        &self.steps_completed
    }
    fn record_step(&mut self, name: &str) {
        self.steps_completed.push(name.to_string());
    }
    fn warnings(&self) -> &[String] {
        &self.warnings
    }
    fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

/// Brands the feed publisher posts for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Brand {
    Pomandi,
    Costume,
}

impl Brand {
    /// Lowercase key used in payloads and queries.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Brand::Pomandi => "pomandi",
            Brand::Costume => "costume",
        }
    }

    /// Declared display capitalization, checked by the quality rubric.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Brand::Pomandi => "Pomandi",
            Brand::Costume => "Costume",
        }
    }

    /// Caption language for this brand.
    #[must_use]
    pub fn language(&self) -> Language {
        match self {
            Brand::Pomandi => Language::Nl,
            Brand::Costume => Language::Fr,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Facebook,
    Instagram,
}

impl Platform {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Nl,
    Fr,
}

impl Language {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Nl => "nl",
            Language::Fr => "fr",
        }
    }
}

/// Per-dimension quality scores of a caption.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub language: f64,
    pub brand: f64,
    pub length: f64,
    pub engagement: f64,
    pub total: f64,
}

/// State of one feed-publisher run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedPublishState {
    pub brand: Brand,
    pub platform: Platform,
    pub photo_key: String,
    /// Provided by the enclosing workflow so publish re-sends dedupe.
    #[serde(default)]
    pub idempotency_key: Option<String>,

    #[serde(default)]
    pub similar_captions: Vec<SearchHit>,
    #[serde(default)]
    pub duplicate_detected: bool,
    #[serde(default)]
    pub similarity_score: f64,
    #[serde(default)]
    pub similar_caption: Option<String>,
    #[serde(default)]
    pub image_description: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub caption_language: Option<Language>,
    #[serde(default)]
    pub quality: QualityBreakdown,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub facebook_post_id: Option<String>,
    #[serde(default)]
    pub instagram_post_id: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub steps_completed: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl FeedPublishState {
    #[must_use]
    pub fn new(brand: Brand, platform: Platform, photo_key: impl Into<String>) -> Self {
        Self {
            brand,
            platform,
            photo_key: photo_key.into(),
            idempotency_key: None,
            similar_captions: vec![],
            duplicate_detected: false,
            similarity_score: 0.0,
            similar_caption: None,
            image_description: String::new(),
            caption: String::new(),
            caption_language: None,
            quality: QualityBreakdown::default(),
            requires_approval: false,
            rejection_reason: None,
            facebook_post_id: None,
            instagram_post_id: None,
            published_at: None,
            steps_completed: vec![],
            warnings: vec![],
        }
    }

    #[must_use]
    pub fn published(&self) -> bool {
        self.published_at.is_some()
    }
}

impl GraphState for FeedPublishState {
    fn steps_completed(&self) -> &[String] {
        &self.steps_completed
    }
    fn record_step(&mut self, name: &str) {
        self.steps_completed.push(name.to_string());
    }
    fn warnings(&self) -> &[String] {
        &self.warnings
    }
    fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&DecisionType::AutoMatch).unwrap(),
            "\"auto_match\""
        );
        assert_eq!(
            serde_json::from_str::<DecisionType>("\"human_review\"").unwrap(),
            DecisionType::HumanReview
        );
    }

    #[test]
    fn invoice_state_deserializes_from_input_only() {
        let state: InvoiceMatchState = serde_json::from_value(serde_json::json!({
            "transaction": {
                "id": "tx-1",
                "vendor_name": "SNCB",
                "amount": 22.70,
                "date": "2025-01-03"
            },
            "invoices": [
                {"id": 1, "vendor_name": "SNCB", "amount": 22.70, "date": "2025-01-03"}
            ]
        }))
        .unwrap();
        assert_eq!(state.transaction.vendor_name, "SNCB");
        assert_eq!(state.decision_type, DecisionType::NoMatch);
        assert!(state.steps_completed.is_empty());
    }

    #[test]
    fn brand_language_assignment() {
        assert_eq!(Brand::Pomandi.language(), Language::Nl);
        assert_eq!(Brand::Costume.language(), Language::Fr);
        assert_eq!(Brand::Pomandi.display_name(), "Pomandi");
    }
}
