//! Vector store backends.
//!
//! The store is the system of record for documents. Two implementations:
//! a brute-force in-memory store (tests, evaluation runs) and a sqlite-vec
//! backed store for durable deployments. Both apply filters in-store so
//! `top_k` is computed over matching documents only, break score ties by
//! ascending id, and tombstone deleted ids (an id is never reassigned).

mod memory;
mod sqlite;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::collections::CollectionName;
use crate::error::MemoryError;
use crate::types::{Filter, Scalar, SearchHit};

/// A document before the store assigns its id.
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub vector: Vec<f32>,
    pub payload: BTreeMap<String, Scalar>,
    pub content_hash: [u8; 32],
}

/// Durable nearest-neighbor storage. Writes are linearizable per document
/// id; a batch upsert is all-or-nothing.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection's backing structures if absent. Idempotent.
    async fn ensure_collection(&self, collection: CollectionName) -> Result<(), MemoryError>;

    /// Insert a batch atomically, returning assigned ids in input order.
    async fn upsert(
        &self,
        collection: CollectionName,
        docs: Vec<NewDocument>,
    ) -> Result<Vec<u64>, MemoryError>;

    /// Top-k cosine search over documents matching `filter`.
    async fn search(
        &self,
        collection: CollectionName,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, MemoryError>;

    /// Merge `updates` into an existing payload. `false` if the document is
    /// absent or deleted.
    async fn update_payload(
        &self,
        collection: CollectionName,
        id: u64,
        updates: BTreeMap<String, Scalar>,
    ) -> Result<bool, MemoryError>;

    /// Tombstone a document. `false` if already absent.
    async fn delete(&self, collection: CollectionName, id: u64) -> Result<bool, MemoryError>;

    /// Live (non-tombstoned) document count.
    async fn count(&self, collection: CollectionName) -> Result<u64, MemoryError>;

    /// Liveness probe for the status surface.
    async fn healthy(&self) -> bool {
        true
    }
}

/// Field names reaching SQL must be plain identifiers. Schema validation
/// upstream guarantees this; the check here keeps the store safe when
/// called directly.
pub(crate) fn safe_field_name(field: &str) -> Result<(), MemoryError> {
    if !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(MemoryError::SchemaViolation {
            detail: format!("invalid filter field name: {field:?}"),
        })
    }
}
