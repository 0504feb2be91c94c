//! The activity library: idempotent units of work callable from workflows.
//!
//! Memory operations, graph runs and external I/O all cross this boundary
//! as typed JSON contracts; provider errors are translated into the
//! platform taxonomy here and nowhere else.

use std::sync::Arc;

use agentloom::error::ErrorKind;
use agentloom::event_bus::Event;
use agentloom::graph::Graph;
use agentloom::workflow::{Activity, ActivityError, ActivityRegistry};
use al_memory::types::payload_from_json;
use al_memory::{CollectionName, Filter, MemoryItem, Scalar, SemanticMemory};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::external::{ObjectStorage, PostRequest, ReportSink, SocialPublisher};
use crate::state::{FeedPublishState, InvoiceMatchState};

fn memory_error(e: al_memory::MemoryError) -> ActivityError {
    ActivityError::new(e.kind(), e.to_string())
}

fn require_collection(input: &Value) -> Result<CollectionName, ActivityError> {
    let name = require_str(input, "collection")?;
    CollectionName::parse(name).map_err(memory_error)
}

fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ActivityError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ActivityError::schema_violation(format!("missing string field {field:?}")))
}

fn require_payload(
    input: &Value,
    field: &str,
) -> Result<std::collections::BTreeMap<String, Scalar>, ActivityError> {
    input
        .get(field)
        .and_then(payload_from_json)
        .ok_or_else(|| {
            ActivityError::schema_violation(format!("{field:?} must be an object of scalars"))
        })
}

/// `memory.save` — embed and store one document.
pub struct MemorySaveActivity {
    pub memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Activity for MemorySaveActivity {
    fn name(&self) -> &str {
        "memory.save"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let collection = require_collection(&input)?;
        let content = require_str(&input, "content")?;
        let metadata = require_payload(&input, "metadata")?;
        let id = self
            .memory
            .save(collection, content, metadata)
            .await
            .map_err(memory_error)?;
        Ok(json!({"id": id}))
    }
}

/// `memory.search` — ranked semantic search.
pub struct MemorySearchActivity {
    pub memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Activity for MemorySearchActivity {
    fn name(&self) -> &str {
        "memory.search"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let collection = require_collection(&input)?;
        let query = require_str(&input, "query")?;
        let top_k = input.get("top_k").and_then(Value::as_u64).unwrap_or(10) as usize;
        let filter: Option<Filter> = match input.get("filter") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value(raw.clone())?),
        };
        let hits = self
            .memory
            .search(collection, query, top_k, filter.as_ref())
            .await
            .map_err(memory_error)?;
        Ok(json!({"results": hits}))
    }
}

/// `memory.batch_save` — one embedding batch, one atomic upsert.
pub struct MemoryBatchSaveActivity {
    pub memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Activity for MemoryBatchSaveActivity {
    fn name(&self) -> &str {
        "memory.batch_save"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let collection = require_collection(&input)?;
        let raw_items = input
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ActivityError::schema_violation("items must be an array"))?;
        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            items.push(MemoryItem {
                content: require_str(raw, "content")?.to_string(),
                metadata: require_payload(raw, "metadata")?,
            });
        }
        let count = self
            .memory
            .batch_save(collection, items)
            .await
            .map_err(memory_error)?;
        Ok(json!({"count": count}))
    }
}

/// `memory.update_metadata` — partial payload update, no re-embed.
pub struct MemoryUpdateMetadataActivity {
    pub memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Activity for MemoryUpdateMetadataActivity {
    fn name(&self) -> &str {
        "memory.update_metadata"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let collection = require_collection(&input)?;
        let id = input
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| ActivityError::schema_violation("missing document id"))?;
        let updates = require_payload(&input, "updates")?;
        let updated = self
            .memory
            .update_metadata(collection, id, updates)
            .await
            .map_err(memory_error)?;
        Ok(json!({"updated": updated}))
    }
}

/// `memory.delete` — tombstone a document.
pub struct MemoryDeleteActivity {
    pub memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Activity for MemoryDeleteActivity {
    fn name(&self) -> &str {
        "memory.delete"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let collection = require_collection(&input)?;
        let id = input
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| ActivityError::schema_violation("missing document id"))?;
        let deleted = self
            .memory
            .delete(collection, id)
            .await
            .map_err(memory_error)?;
        Ok(json!({"deleted": deleted}))
    }
}

/// `memory.stats` — cache/collection/embedding statistics.
pub struct MemoryStatsActivity {
    pub memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Activity for MemoryStatsActivity {
    fn name(&self) -> &str {
        "memory.stats"
    }

    async fn execute(&self, _input: Value) -> Result<Value, ActivityError> {
        let stats = self.memory.stats().await;
        Ok(serde_json::to_value(stats)?)
    }
}

/// The compiled graphs available to `graph.run`, plus the event sender
/// their nodes emit progress through.
pub struct GraphCatalog {
    pub invoice_matcher: Arc<Graph<InvoiceMatchState>>,
    pub feed_publisher: Arc<Graph<FeedPublishState>>,
    pub event_sender: flume::Sender<Event>,
}

/// `graph.run` — execute a named reasoning graph inside this activity and
/// return its full final state. Graphs are nondeterministic (LLM, memory),
/// so this is the only place they run; the workflow layer replays the
/// recorded final state, never the graph itself.
pub struct GraphRunActivity {
    pub catalog: Arc<GraphCatalog>,
}

#[async_trait]
impl Activity for GraphRunActivity {
    fn name(&self) -> &str {
        "graph.run"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let graph_name = require_str(&input, "graph")?;
        let initial = input
            .get("input")
            .cloned()
            .ok_or_else(|| ActivityError::schema_violation("missing graph input"))?;

        match graph_name {
            "invoice_matcher" => {
                let state: InvoiceMatchState = serde_json::from_value(initial)?;
                let final_state = self
                    .catalog
                    .invoice_matcher
                    .run(state, self.catalog.event_sender.clone())
                    .await
                    // Graph failures come from provider calls inside nodes;
                    // the caller's retry policy decides how many re-runs.
                    .map_err(|e| ActivityError::new(ErrorKind::Transient, e.to_string()))?;
                Ok(serde_json::to_value(final_state)?)
            }
            "feed_publisher" => {
                let state: FeedPublishState = serde_json::from_value(initial)?;
                let final_state = self
                    .catalog
                    .feed_publisher
                    .run(state, self.catalog.event_sender.clone())
                    .await
                    .map_err(|e| ActivityError::new(ErrorKind::Transient, e.to_string()))?;
                Ok(serde_json::to_value(final_state)?)
            }
            other => Err(ActivityError::new(
                ErrorKind::NotFound,
                format!("unknown graph: {other}"),
            )),
        }
    }
}

/// `storage.fetch_object` — contract-level object fetch.
pub struct StorageFetchActivity {
    pub storage: Arc<dyn ObjectStorage>,
}

#[async_trait]
impl Activity for StorageFetchActivity {
    fn name(&self) -> &str {
        "storage.fetch_object"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let key = require_str(&input, "key")?;
        let object = self.storage.fetch_object(key).await.map_err(ActivityError::from)?;
        Ok(json!({
            "key": object.key,
            "size": object.bytes.len(),
            "content_type": object.content_type,
        }))
    }
}

/// `storage.list_objects`.
pub struct StorageListActivity {
    pub storage: Arc<dyn ObjectStorage>,
}

#[async_trait]
impl Activity for StorageListActivity {
    fn name(&self) -> &str {
        "storage.list_objects"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let prefix = input.get("prefix").and_then(Value::as_str).unwrap_or("");
        let keys = self
            .storage
            .list_objects(prefix)
            .await
            .map_err(ActivityError::from)?;
        Ok(json!({"keys": keys}))
    }
}

/// `post.social` — publish with idempotency-key dedupe.
pub struct PostSocialActivity {
    pub publisher: Arc<dyn SocialPublisher>,
}

#[async_trait]
impl Activity for PostSocialActivity {
    fn name(&self) -> &str {
        "post.social"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let request: PostRequest = serde_json::from_value(input)?;
        let receipt = self
            .publisher
            .publish(&request)
            .await
            .map_err(ActivityError::from)?;
        Ok(serde_json::to_value(receipt)?)
    }
}

/// `report.save` — hand an agent report to the downstream sink.
pub struct ReportSaveActivity {
    pub sink: Arc<dyn ReportSink>,
}

#[async_trait]
impl Activity for ReportSaveActivity {
    fn name(&self) -> &str {
        "report.save"
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let agent_name = require_str(&input, "agent_name")?;
        let kind = require_str(&input, "kind")?;
        let payload = input.get("payload").cloned().unwrap_or(Value::Null);
        self.sink
            .save(agent_name, kind, payload)
            .await
            .map_err(ActivityError::from)?;
        Ok(json!({"saved": true}))
    }
}

/// Register the full activity library.
pub fn register_all(
    registry: &mut ActivityRegistry,
    memory: Arc<SemanticMemory>,
    catalog: Arc<GraphCatalog>,
    storage: Arc<dyn ObjectStorage>,
    publisher: Arc<dyn SocialPublisher>,
    sink: Arc<dyn ReportSink>,
) {
    registry.register(Arc::new(MemorySaveActivity {
        memory: memory.clone(),
    }));
    registry.register(Arc::new(MemorySearchActivity {
        memory: memory.clone(),
    }));
    registry.register(Arc::new(MemoryBatchSaveActivity {
        memory: memory.clone(),
    }));
    registry.register(Arc::new(MemoryUpdateMetadataActivity {
        memory: memory.clone(),
    }));
    registry.register(Arc::new(MemoryDeleteActivity {
        memory: memory.clone(),
    }));
    registry.register(Arc::new(MemoryStatsActivity { memory }));
    registry.register(Arc::new(GraphRunActivity { catalog }));
    registry.register(Arc::new(StorageFetchActivity {
        storage: storage.clone(),
    }));
    registry.register(Arc::new(StorageListActivity { storage }));
    registry.register(Arc::new(PostSocialActivity { publisher }));
    registry.register(Arc::new(ReportSaveActivity { sink }));
}
