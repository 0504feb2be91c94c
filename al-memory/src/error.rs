use agentloom::error::{ErrorKind, PlatformError};
use miette::Diagnostic;
use thiserror::Error;

/// Memory-layer failures, each mapped onto the platform taxonomy.
#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("schema violation: {detail}")]
    #[diagnostic(
        code(al_memory::schema_violation),
        help("Payload fields must match the collection schema exactly.")
    )]
    SchemaViolation { detail: String },

    #[error("unknown collection: {name}")]
    #[diagnostic(code(al_memory::unknown_collection))]
    UnknownCollection { name: String },

    #[error("document {id} not found in {collection}")]
    #[diagnostic(code(al_memory::not_found))]
    NotFound { collection: String, id: u64 },

    #[error("embedding failed: {detail}")]
    #[diagnostic(code(al_memory::embedding_failed))]
    EmbeddingFailed { detail: String },

    #[error("embedding provider rate limited: {detail}")]
    #[diagnostic(code(al_memory::rate_limited))]
    RateLimited { detail: String },

    #[error("vector store unavailable: {detail}")]
    #[diagnostic(
        code(al_memory::store_unavailable),
        help("The store is the system of record; retry once it is reachable.")
    )]
    StoreUnavailable { detail: String },

    #[error("memory operation exceeded its deadline: {detail}")]
    #[diagnostic(code(al_memory::timeout))]
    Timeout { detail: String },

    #[error("internal memory error: {detail}")]
    #[diagnostic(code(al_memory::internal))]
    Internal { detail: String },
}

impl MemoryError {
    /// Taxonomy classification for propagation decisions.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            MemoryError::UnknownCollection { .. } | MemoryError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            MemoryError::EmbeddingFailed { .. } => ErrorKind::Internal,
            MemoryError::RateLimited { .. } => ErrorKind::RateLimited,
            MemoryError::StoreUnavailable { .. } => ErrorKind::Transient,
            MemoryError::Timeout { .. } => ErrorKind::Timeout,
            MemoryError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl From<MemoryError> for PlatformError {
    fn from(e: MemoryError) -> Self {
        PlatformError::new(e.kind(), e.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Internal {
            detail: e.to_string(),
        }
    }
}
