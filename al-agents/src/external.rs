//! External collaborators, specified at their interface: object storage,
//! social publishing and report sinks. In-memory implementations back
//! tests and the evaluation harness; production adapters live at the
//! deployment boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use agentloom::error::PlatformError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{Brand, Platform};

/// A fetched object.
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Object storage contract (S3-shaped).
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn fetch_object(&self, key: &str) -> Result<StoredObject, PlatformError>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, PlatformError>;
}

/// Test/in-process implementation of [`ObjectStorage`].
#[derive(Default)]
pub struct InMemoryObjectStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, bytes: Vec<u8>, content_type: &str) {
        self.objects.lock().expect("storage poisoned").insert(
            key.to_string(),
            StoredObject {
                key: key.to_string(),
                bytes,
                content_type: content_type.to_string(),
            },
        );
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn fetch_object(&self, key: &str) -> Result<StoredObject, PlatformError> {
        self.objects
            .lock()
            .expect("storage poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| PlatformError::not_found(format!("no such object: {key}")))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, PlatformError> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .expect("storage poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// A social post request. The idempotency key is provided by the enclosing
/// workflow; publishers must honor it so a re-sent request after a lost
/// completion does not double-post.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostRequest {
    pub platform: Platform,
    pub brand: Brand,
    pub caption: String,
    pub media_key: String,
    pub idempotency_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostReceipt {
    pub post_id: String,
    /// True when the publisher recognized the idempotency key and returned
    /// the prior success instead of posting again.
    pub deduplicated: bool,
}

/// Social publishing contract (Facebook/Instagram Graph-shaped).
#[async_trait]
pub trait SocialPublisher: Send + Sync {
    async fn publish(&self, request: &PostRequest) -> Result<PostReceipt, PlatformError>;
}

/// In-memory publisher with idempotency-key dedupe.
#[derive(Default)]
pub struct InMemorySocialPublisher {
    by_key: Mutex<HashMap<String, PostReceipt>>,
    sequence: AtomicU64,
}

impl InMemorySocialPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct posts actually published.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.by_key.lock().expect("publisher poisoned").len()
    }
}

#[async_trait]
impl SocialPublisher for InMemorySocialPublisher {
    async fn publish(&self, request: &PostRequest) -> Result<PostReceipt, PlatformError> {
        let mut by_key = self.by_key.lock().expect("publisher poisoned");
        if let Some(prior) = by_key.get(&request.idempotency_key) {
            return Ok(PostReceipt {
                post_id: prior.post_id.clone(),
                deduplicated: true,
            });
        }
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let receipt = PostReceipt {
            post_id: format!(
                "{}_{}_{n}",
                request.platform.as_str(),
                request.brand.key()
            ),
            deduplicated: false,
        };
        by_key.insert(request.idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }
}

/// Graph-API-backed publisher. Contract-level adapter: posts the caption
/// for the media key and relies on the idempotency key to dedupe re-sends
/// locally (the Graph API has no native idempotency for feed posts).
pub struct GraphApiPublisher {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
    seen: Mutex<HashMap<String, PostReceipt>>,
}

impl GraphApiPublisher {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: access_token.into(),
            base_url: "https://graph.facebook.com/v19.0".to_string(),
            seen: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SocialPublisher for GraphApiPublisher {
    async fn publish(&self, request: &PostRequest) -> Result<PostReceipt, PlatformError> {
        if let Some(prior) = self
            .seen
            .lock()
            .expect("publisher poisoned")
            .get(&request.idempotency_key)
        {
            return Ok(PostReceipt {
                post_id: prior.post_id.clone(),
                deduplicated: true,
            });
        }

        let endpoint = match request.platform {
            Platform::Facebook => format!("{}/me/feed", self.base_url),
            Platform::Instagram => format!("{}/me/media", self.base_url),
        };
        let response = self
            .http
            .post(endpoint)
            .form(&[
                ("message", request.caption.as_str()),
                ("media_key", request.media_key.as_str()),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PlatformError::transient(format!("graph api unreachable: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(PlatformError::new(
                agentloom::error::ErrorKind::RateLimited,
                "graph api rate limited",
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = if status.is_server_error() {
                agentloom::error::ErrorKind::Transient
            } else {
                agentloom::error::ErrorKind::Internal
            };
            return Err(PlatformError::new(
                kind,
                format!("graph api returned {status}: {body}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::internal(format!("malformed graph response: {e}")))?;
        let post_id = body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let receipt = PostReceipt {
            post_id,
            deduplicated: false,
        };
        self.seen
            .lock()
            .expect("publisher poisoned")
            .insert(request.idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }
}

/// Object storage over a plain HTTP base URL (media CDN or presigned S3
/// gateway).
pub struct HttpObjectStorage {
    http: reqwest::Client,
    base_url: String,
}

impl HttpObjectStorage {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn fetch_object(&self, key: &str) -> Result<StoredObject, PlatformError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PlatformError::transient(format!("storage unreachable: {e}")))?;
        if response.status().as_u16() == 404 {
            return Err(PlatformError::not_found(format!("no such object: {key}")));
        }
        if !response.status().is_success() {
            return Err(PlatformError::transient(format!(
                "storage returned {}",
                response.status()
            )));
        }
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlatformError::transient(format!("storage read failed: {e}")))?;
        Ok(StoredObject {
            key: key.to_string(),
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    async fn list_objects(&self, _prefix: &str) -> Result<Vec<String>, PlatformError> {
        // Listing needs a bucket API; the HTTP gateway serves objects only.
        Ok(vec![])
    }
}

/// Report sink that logs structured reports; the durable downstream sink
/// lives outside this service.
#[derive(Default)]
pub struct LoggingReportSink;

#[async_trait]
impl ReportSink for LoggingReportSink {
    async fn save(
        &self,
        agent_name: &str,
        kind: &str,
        payload: Value,
    ) -> Result<(), PlatformError> {
        tracing::info!(agent = agent_name, kind, payload = %payload, "agent report");
        Ok(())
    }
}

/// A saved agent report.
#[derive(Clone, Debug)]
pub struct Report {
    pub agent_name: String,
    pub kind: String,
    pub payload: Value,
}

/// Downstream report sink (agent-outputs-shaped).
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn save(&self, agent_name: &str, kind: &str, payload: Value)
        -> Result<(), PlatformError>;
}

/// In-memory sink capturing reports for assertions.
#[derive(Default)]
pub struct InMemoryReportSink {
    reports: Mutex<Vec<Report>>,
}

impl InMemoryReportSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().expect("sink poisoned").clone()
    }
}

#[async_trait]
impl ReportSink for InMemoryReportSink {
    async fn save(
        &self,
        agent_name: &str,
        kind: &str,
        payload: Value,
    ) -> Result<(), PlatformError> {
        self.reports.lock().expect("sink poisoned").push(Report {
            agent_name: agent_name.to_string(),
            kind: kind.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publisher_dedupes_on_idempotency_key() {
        let publisher = InMemorySocialPublisher::new();
        let request = PostRequest {
            platform: Platform::Instagram,
            brand: Brand::Pomandi,
            caption: "caption".into(),
            media_key: "photos/1.jpg".into(),
            idempotency_key: "wf-1-publish".into(),
        };
        let first = publisher.publish(&request).await.unwrap();
        let second = publisher.publish(&request).await.unwrap();
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.post_id, second.post_id);
        assert_eq!(publisher.published_count(), 1);
    }

    #[tokio::test]
    async fn storage_fetch_and_list() {
        let storage = InMemoryObjectStorage::new();
        storage.insert("products/pomandi/blazer.jpg", vec![1, 2, 3], "image/jpeg");
        storage.insert("products/costume/suit.jpg", vec![4], "image/jpeg");

        let object = storage
            .fetch_object("products/pomandi/blazer.jpg")
            .await
            .unwrap();
        assert_eq!(object.bytes.len(), 3);

        let keys = storage.list_objects("products/pomandi/").await.unwrap();
        assert_eq!(keys, vec!["products/pomandi/blazer.jpg"]);

        assert!(storage.fetch_object("missing").await.is_err());
    }
}
