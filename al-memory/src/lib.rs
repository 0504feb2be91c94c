//! ```text
//! SemanticMemory ─┬─► CachingEmbedder ─► EmbeddingProvider (OpenAI / hashed)
//!                 │          │
//!                 │          └─► CacheStore  (embed: namespace, 7 d TTL)
//!                 ├─► CacheStore             (query: namespace, 1 h TTL)
//!                 └─► VectorStore            (in-memory / sqlite-vec)
//! ```
//!
//! Unified semantic save/search over four typed collections, with a
//! transparent two-tier cache. The vector store is the system of record;
//! the cache is disposable — a cold or absent cache changes latency, never
//! results. Also exposes the memory operations as an LLM-callable tool
//! surface ([`tools`]).

pub mod cache;
pub mod collections;
pub mod embedder;
pub mod error;
pub mod manager;
pub mod store;
pub mod tools;
pub mod types;

pub use cache::{CacheKey, CacheStats, CacheStore, LruCache};
pub use collections::{CollectionName, CollectionSchema, FieldType};
pub use embedder::{
    embedding_cache_key, CachingEmbedder, EmbedderStats, EmbeddingProvider, HashEmbedder,
    OpenAiConfig, OpenAiEmbedder, EMBEDDING_DIM,
};
pub use error::MemoryError;
pub use manager::{MemoryItem, MemoryStats, SemanticMemory, SemanticMemoryBuilder};
pub use store::{MemoryVectorStore, NewDocument, SqliteVectorStore, VectorStore};
pub use tools::{MemoryToolkit, ToolSpec};
pub use types::{Document, FieldCondition, Filter, Scalar, SearchHit};
