//! Feed publisher graph: duplicate-aware caption generation, quality
//! gating and social publishing.
//!
//! ```text
//! check_history → describe_image → generate_caption → quality_check
//!      quality_check ─┬─► publish → save_memory → End   (quality ≥ 0.85)
//!                     ├─► save_memory → End             (review band)
//!                     └─► save_memory → End             (duplicate / low quality)
//! ```
//!
//! The save-only branches record the decision without scheduling a publish;
//! a run that detects a duplicate still persists its caption so the
//! history keeps improving.

use std::sync::Arc;

use agentloom::graph::{
    Graph, GraphBuilder, GraphState, Node, NodeContext, NodeError, NodeKind, RouterFn,
};
use al_memory::{CollectionName, Filter, Scalar, SemanticMemory};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::external::{ObjectStorage, PostRequest, SocialPublisher};
use crate::llm::{CompletionOptions, LlmClient};
use crate::scoring;
use crate::state::{FeedPublishState, Platform};

/// Search recent posts for the brand/platform and flag near-duplicates.
struct CheckHistoryNode {
    memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Node<FeedPublishState> for CheckHistoryNode {
    async fn run(
        &self,
        mut state: FeedPublishState,
        ctx: NodeContext,
    ) -> Result<FeedPublishState, NodeError> {
        let query = format!(
            "{} {} social media post",
            state.brand.key(),
            state.platform.as_str()
        );
        let filter = Filter::new()
            .eq("brand", state.brand.key())
            .eq("platform", state.platform.as_str())
            .eq("published", true);
        let results = self
            .memory
            .search(CollectionName::SocialPosts, &query, 10, Some(&filter))
            .await
            .map_err(|e| NodeError::Provider {
                provider: "memory",
                message: e.to_string(),
            })?;

        state.similarity_score = results.first().map(|hit| f64::from(hit.score)).unwrap_or(0.0);
        if state.similarity_score > scoring::DUPLICATE_THRESHOLD {
            state.duplicate_detected = true;
            state.similar_caption = results.first().and_then(|hit| {
                hit.payload.get("caption_text").and_then(|v| match v {
                    Scalar::String(s) => Some(s.clone()),
                    _ => None,
                })
            });
            state.add_warning(format!(
                "Very similar caption found (similarity: {:.2})",
                state.similarity_score
            ));
        }
        ctx.emit(
            "history",
            format!(
                "{} prior posts, top similarity {:.2}",
                results.len(),
                state.similarity_score
            ),
        )?;
        state.similar_captions = results;
        Ok(state)
    }
}

/// Obtain a textual description of the product photo.
struct DescribeImageNode {
    storage: Arc<dyn ObjectStorage>,
}

#[async_trait]
impl Node<FeedPublishState> for DescribeImageNode {
    async fn run(
        &self,
        mut state: FeedPublishState,
        ctx: NodeContext,
    ) -> Result<FeedPublishState, NodeError> {
        match self.storage.fetch_object(&state.photo_key).await {
            Ok(object) => {
                state.image_description = format!(
                    "Product photo {} ({} bytes, {})",
                    object.key,
                    object.bytes.len(),
                    object.content_type
                );
            }
            Err(e) => {
                // The caption can still be generated from the key alone.
                state.add_warning(format!("image fetch failed: {e}"));
                state.image_description = format!("Product photo {}", state.photo_key);
            }
        }
        ctx.emit("image", state.image_description.clone())?;
        Ok(state)
    }
}

/// Generate the caption via the LLM collaborator.
struct GenerateCaptionNode {
    llm: Arc<dyn LlmClient>,
}

#[async_trait]
impl Node<FeedPublishState> for GenerateCaptionNode {
    async fn run(
        &self,
        mut state: FeedPublishState,
        ctx: NodeContext,
    ) -> Result<FeedPublishState, NodeError> {
        let language = state.brand.language();
        let similar_context = if state.similar_captions.is_empty() {
            "No similar captions in history".to_string()
        } else {
            state
                .similar_captions
                .iter()
                .take(3)
                .filter_map(|hit| hit.payload.get("caption_text"))
                .filter_map(|v| match v {
                    Scalar::String(s) => Some(format!("- {}", s.chars().take(100).collect::<String>())),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "Generate a {} social media caption for {}.\n\
             Image: {}\nPlatform: {}\n\
             Avoid duplicating these recent captions:\n{}\n\
             Length 50-150 characters, include the brand name and 2-3 emojis.",
            language.as_str(),
            state.brand.display_name(),
            state.image_description,
            state.platform.as_str(),
            similar_context,
        );

        let options = CompletionOptions {
            language: Some(language),
            ..Default::default()
        };
        let outcome = self
            .llm
            .complete(&prompt, &options)
            .await
            .map_err(|e| NodeError::Provider {
                provider: "llm",
                message: e.to_string(),
            })?;

        state.caption = outcome.text;
        state.caption_language = outcome.language.or(Some(language));
        ctx.emit(
            "caption",
            format!("generated {} chars", state.caption.chars().count()),
        )?;
        Ok(state)
    }
}

/// Rule-based quality gate.
struct QualityCheckNode;

#[async_trait]
impl Node<FeedPublishState> for QualityCheckNode {
    async fn run(
        &self,
        mut state: FeedPublishState,
        ctx: NodeContext,
    ) -> Result<FeedPublishState, NodeError> {
        let language = state.caption_language.unwrap_or_else(|| state.brand.language());
        let quality = scoring::caption_quality(&state.caption, state.brand, language);

        // The vector check in check_history runs before the caption exists;
        // now that it does, compare it against the retrieved history.
        if !state.duplicate_detected {
            let near_duplicate = state
                .similar_captions
                .iter()
                .filter_map(|hit| match hit.payload.get("caption_text") {
                    Some(Scalar::String(s)) => Some(s.clone()),
                    _ => None,
                })
                .map(|prior| (scoring::caption_overlap(&state.caption, &prior), prior))
                .filter(|(overlap, _)| *overlap > scoring::DUPLICATE_THRESHOLD)
                .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((overlap, prior)) = near_duplicate {
                state.duplicate_detected = true;
                state.similarity_score = overlap;
                state.similar_caption = Some(prior);
                state.add_warning(format!(
                    "Very similar caption found (similarity: {overlap:.2})"
                ));
            }
        }

        if quality.language == 0.0 {
            state.add_warning(format!(
                "Caption may not be in {}",
                language.as_str()
            ));
        }
        if quality.brand == 0.0 {
            state.add_warning("Brand name not mentioned".to_string());
        }
        if quality.length < 1.0 {
            state.add_warning("Caption length outside the preferred band".to_string());
        }
        if scoring::emoji_count(&state.caption) == 0 {
            state.add_warning("No emojis used".to_string());
        }

        state.requires_approval = quality.total < scoring::AUTO_PUBLISH_THRESHOLD;
        if quality.total < scoring::QUALITY_FLOOR {
            state.rejection_reason = Some("Quality score too low".to_string());
        }
        state.quality = quality;

        ctx.emit(
            "quality",
            format!(
                "score {:.2} (approval required: {})",
                quality.total, state.requires_approval
            ),
        )?;
        Ok(state)
    }
}

/// Publish through the social API with the workflow-provided idempotency
/// key.
struct PublishNode {
    publisher: Arc<dyn SocialPublisher>,
}

#[async_trait]
impl Node<FeedPublishState> for PublishNode {
    async fn run(
        &self,
        mut state: FeedPublishState,
        ctx: NodeContext,
    ) -> Result<FeedPublishState, NodeError> {
        let idempotency_key = state.idempotency_key.clone().unwrap_or_else(|| {
            // Without a workflow around us, derive a stable key from content.
            let digest = agentloom::utils::sha256(
                format!(
                    "{}|{}|{}|{}",
                    state.brand.key(),
                    state.platform.as_str(),
                    state.photo_key,
                    state.caption
                )
                .as_bytes(),
            );
            agentloom::utils::hex_prefix(&digest, 8)
        });

        let receipt = self
            .publisher
            .publish(&PostRequest {
                platform: state.platform,
                brand: state.brand,
                caption: state.caption.clone(),
                media_key: state.photo_key.clone(),
                idempotency_key,
            })
            .await
            .map_err(|e| NodeError::Provider {
                provider: "social",
                message: e.to_string(),
            })?;

        match state.platform {
            Platform::Facebook => state.facebook_post_id = Some(receipt.post_id.clone()),
            Platform::Instagram => state.instagram_post_id = Some(receipt.post_id.clone()),
        }
        state.published_at = Some(Utc::now());
        ctx.emit(
            "publish",
            format!(
                "posted as {}{}",
                receipt.post_id,
                if receipt.deduplicated {
                    " (deduplicated)"
                } else {
                    ""
                }
            ),
        )?;
        Ok(state)
    }
}

/// Persist the caption and outcome to `social_posts`.
struct SaveMemoryNode {
    memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Node<FeedPublishState> for SaveMemoryNode {
    async fn run(
        &self,
        state: FeedPublishState,
        ctx: NodeContext,
    ) -> Result<FeedPublishState, NodeError> {
        let content = format!(
            "{} {} post:\nCaption: {}\nQuality: {:.2}\nPublished: {}",
            state.brand.key(),
            state.platform.as_str(),
            state.caption,
            state.quality.total,
            state
                .published_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "not published".to_string()),
        );

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("brand".to_string(), Scalar::from(state.brand.key()));
        metadata.insert(
            "platform".to_string(),
            Scalar::from(state.platform.as_str()),
        );
        metadata.insert("caption_text".to_string(), Scalar::from(state.caption.clone()));
        if let Some(language) = state.caption_language {
            metadata.insert(
                "caption_language".to_string(),
                Scalar::from(language.as_str()),
            );
        }
        metadata.insert(
            "quality_score".to_string(),
            Scalar::Float(state.quality.total),
        );
        metadata.insert("published".to_string(), Scalar::Bool(state.published()));
        if let Some(post_id) = &state.facebook_post_id {
            metadata.insert("facebook_post_id".to_string(), Scalar::from(post_id.clone()));
        }
        if let Some(post_id) = &state.instagram_post_id {
            metadata.insert(
                "instagram_post_id".to_string(),
                Scalar::from(post_id.clone()),
            );
        }
        if let Some(published_at) = state.published_at {
            metadata.insert(
                "published_at".to_string(),
                Scalar::from(published_at.to_rfc3339()),
            );
        }
        metadata.insert("photo_key".to_string(), Scalar::from(state.photo_key.clone()));

        self.memory
            .save(CollectionName::SocialPosts, &content, metadata)
            .await
            .map_err(|e| NodeError::Provider {
                provider: "memory",
                message: e.to_string(),
            })?;

        ctx.emit("memory", "caption saved to history")?;
        Ok(state)
    }
}

/// Compile the feed publisher graph against its collaborators.
pub fn build_feed_publisher_graph(
    memory: Arc<SemanticMemory>,
    storage: Arc<dyn ObjectStorage>,
    llm: Arc<dyn LlmClient>,
    publisher: Arc<dyn SocialPublisher>,
) -> Graph<FeedPublishState> {
    let route_on_quality: RouterFn<FeedPublishState> = Arc::new(|state| {
        if state.duplicate_detected || state.quality.total < scoring::QUALITY_FLOOR {
            "save_only".to_string()
        } else if state.quality.total >= scoring::AUTO_PUBLISH_THRESHOLD {
            "publish".to_string()
        } else {
            "review".to_string()
        }
    });

    GraphBuilder::new()
        .add_node(
            "check_history",
            CheckHistoryNode {
                memory: memory.clone(),
            },
        )
        .add_node("describe_image", DescribeImageNode { storage })
        .add_node("generate_caption", GenerateCaptionNode { llm })
        .add_node("quality_check", QualityCheckNode)
        .add_node("publish", PublishNode { publisher })
        .add_node("save_memory", SaveMemoryNode { memory })
        .add_edge(NodeKind::Start, "check_history".into())
        .add_edge("check_history".into(), "describe_image".into())
        .add_edge("describe_image".into(), "generate_caption".into())
        .add_edge("generate_caption".into(), "quality_check".into())
        .add_conditional_edge(
            "quality_check".into(),
            route_on_quality,
            &[
                ("publish", "publish".into()),
                ("save_only", "save_memory".into()),
                ("review", "save_memory".into()),
            ],
        )
        .add_edge("publish".into(), "save_memory".into())
        .add_edge("save_memory".into(), NodeKind::End)
        .compile()
        .expect("feed publisher graph is statically valid")
}

/// Flattened outcome of one publisher run.
#[derive(Clone, Debug, Serialize)]
pub struct PublishReport {
    pub published: bool,
    pub facebook_post_id: Option<String>,
    pub instagram_post_id: Option<String>,
    pub caption: String,
    pub quality_score: f64,
    pub requires_approval: bool,
    pub rejection_reason: Option<String>,
    pub duplicate_detected: bool,
    pub warnings: Vec<String>,
    pub steps_completed: Vec<String>,
}

impl From<&FeedPublishState> for PublishReport {
    fn from(state: &FeedPublishState) -> Self {
        Self {
            published: state.published(),
            facebook_post_id: state.facebook_post_id.clone(),
            instagram_post_id: state.instagram_post_id.clone(),
            caption: state.caption.clone(),
            quality_score: state.quality.total,
            requires_approval: state.requires_approval,
            rejection_reason: state.rejection_reason.clone(),
            duplicate_detected: state.duplicate_detected,
            warnings: state.warnings.clone(),
            steps_completed: state.steps_completed.clone(),
        }
    }
}
