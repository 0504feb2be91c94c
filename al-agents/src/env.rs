//! Runtime environment: credentials and wiring options, resolved once at
//! startup into an explicit context. The service refuses to start when a
//! required credential is missing; nothing reads the environment after
//! this point.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EnvError {
    #[error("missing required environment variables: {}", missing.join(", "))]
    #[diagnostic(
        code(al_agents::env::missing),
        help("Provide the listed variables (an .env file is honored).")
    )]
    Missing { missing: Vec<String> },
}

/// Resolved process environment.
#[derive(Clone, Debug)]
pub struct RuntimeEnv {
    /// Embedding provider credential.
    pub openai_api_key: String,
    /// Social Graph API credential.
    pub meta_graph_token: String,
    pub embedding_model: String,
    pub http_addr: String,
    /// Vector store database file.
    pub memory_db_path: PathBuf,
    /// Workflow history database URL.
    pub history_db_url: String,
    pub cache_capacity_bytes: usize,
    /// Base URL media objects are fetched from; in-memory storage when
    /// absent (tests, dry runs).
    pub media_base_url: Option<String>,
}

impl RuntimeEnv {
    /// Read the environment (honoring `.env`), failing with the full list
    /// of missing required variables.
    pub fn from_env() -> Result<Self, EnvError> {
        dotenvy::dotenv().ok();

        let mut missing = Vec::new();
        let mut required = |name: &str| -> String {
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => value,
                _ => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        };

        let openai_api_key = required("OPENAI_API_KEY");
        let meta_graph_token = required("META_GRAPH_TOKEN");
        if !missing.is_empty() {
            return Err(EnvError::Missing { missing });
        }

        Ok(Self {
            openai_api_key,
            meta_graph_token,
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            http_addr: std::env::var("AGENTLOOM_HTTP_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            memory_db_path: std::env::var("AGENTLOOM_MEMORY_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("agentloom-memory.db")),
            history_db_url: std::env::var("AGENTLOOM_HISTORY_DB")
                .unwrap_or_else(|_| "sqlite://agentloom-history.db".to_string()),
            cache_capacity_bytes: std::env::var("AGENTLOOM_CACHE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(al_memory::cache::DEFAULT_CAPACITY_BYTES),
            media_base_url: std::env::var("AGENTLOOM_MEDIA_BASE_URL").ok(),
        })
    }
}
