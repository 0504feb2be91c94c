//! LLM-callable tool surface over the memory operations.
//!
//! Each tool carries a name, a JSON-schema input contract and a JSON
//! output, so an agent loop can expose them directly as function tools.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::collections::CollectionName;
use crate::error::MemoryError;
use crate::manager::SemanticMemory;
use crate::types::{Filter, Scalar};

/// Declaration of one tool.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Tool registry bound to one [`SemanticMemory`].
pub struct MemoryToolkit {
    memory: Arc<SemanticMemory>,
}

impl MemoryToolkit {
    #[must_use]
    pub fn new(memory: Arc<SemanticMemory>) -> Self {
        Self { memory }
    }

    /// Declared tools, in a stable order.
    #[must_use]
    pub fn specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "search_memory",
                description:
                    "Semantic search over a memory collection. Returns ranked hits with id, \
                     score and payload.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "collection": {
                            "type": "string",
                            "enum": ["invoices", "social_posts", "ad_reports", "agent_context"],
                        },
                        "query": {"type": "string"},
                        "top_k": {"type": "integer", "minimum": 0, "default": 5},
                        "filters": {
                            "type": "object",
                            "description": "Field name to exact-match value.",
                            "additionalProperties": {
                                "type": ["string", "number", "boolean"]
                            }
                        }
                    },
                    "required": ["collection", "query"]
                }),
            },
            ToolSpec {
                name: "save_to_memory",
                description: "Embed content and store it with metadata; returns the document id.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "collection": {
                            "type": "string",
                            "enum": ["invoices", "social_posts", "ad_reports", "agent_context"],
                        },
                        "content": {"type": "string"},
                        "metadata": {
                            "type": "object",
                            "additionalProperties": {
                                "type": ["string", "number", "boolean"]
                            }
                        }
                    },
                    "required": ["collection", "content", "metadata"]
                }),
            },
            ToolSpec {
                name: "get_memory_stats",
                description: "Cache, collection and embedding statistics.",
                input_schema: json!({"type": "object", "properties": {}}),
            },
        ]
    }

    /// Invoke a tool by name with a JSON input.
    pub async fn invoke(&self, name: &str, input: &Value) -> Result<Value, MemoryError> {
        match name {
            "search_memory" => self.search_memory(input).await,
            "save_to_memory" => self.save_to_memory(input).await,
            "get_memory_stats" => {
                let stats = self.memory.stats().await;
                Ok(serde_json::to_value(stats)?)
            }
            other => Err(MemoryError::NotFound {
                collection: format!("tool:{other}"),
                id: 0,
            }),
        }
    }

    async fn search_memory(&self, input: &Value) -> Result<Value, MemoryError> {
        let collection = require_collection(input)?;
        let query = require_str(input, "query")?;
        let top_k = input
            .get("top_k")
            .and_then(Value::as_u64)
            .unwrap_or(5) as usize;
        let filter = match input.get("filters") {
            Some(Value::Object(map)) => {
                let mut filter = Filter::new();
                for (field, value) in map {
                    let scalar =
                        Scalar::from_json(value).ok_or_else(|| MemoryError::SchemaViolation {
                            detail: format!("filter value for {field:?} is not a scalar"),
                        })?;
                    filter = filter.eq(field, scalar);
                }
                Some(filter)
            }
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(MemoryError::SchemaViolation {
                    detail: format!("filters must be an object, got {other}"),
                })
            }
        };

        let hits = self
            .memory
            .search(collection, query, top_k, filter.as_ref())
            .await?;
        let count = hits.len();
        Ok(json!({
            "results": hits,
            "count": count,
        }))
    }

    async fn save_to_memory(&self, input: &Value) -> Result<Value, MemoryError> {
        let collection = require_collection(input)?;
        let content = require_str(input, "content")?;
        let metadata = input
            .get("metadata")
            .and_then(crate::types::payload_from_json)
            .ok_or_else(|| MemoryError::SchemaViolation {
                detail: "metadata must be an object of scalars".into(),
            })?;
        let id = self.memory.save(collection, content, metadata).await?;
        Ok(json!({"id": id}))
    }
}

fn require_collection(input: &Value) -> Result<CollectionName, MemoryError> {
    let name = require_str(input, "collection")?;
    CollectionName::parse(name)
}

fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, MemoryError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| MemoryError::SchemaViolation {
            detail: format!("missing required string field {field:?}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use crate::embedder::HashEmbedder;
    use crate::store::MemoryVectorStore;

    fn toolkit() -> MemoryToolkit {
        let memory = SemanticMemory::builder()
            .with_embedder(Arc::new(HashEmbedder::default()))
            .with_store(Arc::new(MemoryVectorStore::new()))
            .with_cache(Arc::new(LruCache::default()))
            .build()
            .unwrap();
        MemoryToolkit::new(Arc::new(memory))
    }

    #[tokio::test]
    async fn save_then_search_through_tools() {
        let toolkit = toolkit();
        let saved = toolkit
            .invoke(
                "save_to_memory",
                &json!({
                    "collection": "invoices",
                    "content": "Invoice from SNCB for train ticket 22.70",
                    "metadata": {"vendor_name": "SNCB", "amount": 22.70, "matched": false}
                }),
            )
            .await
            .unwrap();
        assert!(saved["id"].as_u64().is_some());

        let found = toolkit
            .invoke(
                "search_memory",
                &json!({
                    "collection": "invoices",
                    "query": "SNCB train ticket",
                    "top_k": 5,
                    "filters": {"matched": false}
                }),
            )
            .await
            .unwrap();
        assert_eq!(found["count"], json!(1));
        assert_eq!(found["results"][0]["payload"]["vendor_name"], json!("SNCB"));
    }

    #[tokio::test]
    async fn stats_tool_reports_collections() {
        let toolkit = toolkit();
        let stats = toolkit
            .invoke("get_memory_stats", &json!({}))
            .await
            .unwrap();
        assert!(stats["collections"]["invoices"].is_u64());
        assert!(stats["embeddings"]["generated"].is_u64());
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_input_are_rejected() {
        let toolkit = toolkit();
        assert!(toolkit.invoke("no_such_tool", &json!({})).await.is_err());
        let err = toolkit
            .invoke("save_to_memory", &json!({"collection": "invoices"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::SchemaViolation { .. }));
    }

    #[test]
    fn specs_declare_three_tools() {
        let specs = MemoryToolkit::specs();
        let names: Vec<_> = specs.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["search_memory", "save_to_memory", "get_memory_stats"]
        );
    }
}
