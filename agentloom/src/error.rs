//! Platform-wide error taxonomy.
//!
//! Every boundary in the platform (activities, memory operations, the HTTP
//! facade) translates provider-specific failures into one of the kinds
//! defined here. Retry policies and HTTP status mapping are driven by the
//! kind alone, never by string matching.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a platform error.
///
/// The kind decides propagation: transient kinds are retried under the
/// caller's retry policy, permanent kinds surface immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Input fails a declared contract (collection schema, workflow input).
    SchemaViolation,
    /// A named entity (workflow, schedule, collection, document) does not exist.
    NotFound,
    /// An external dependency is temporarily unavailable.
    Transient,
    /// An operation exceeded its deadline.
    Timeout,
    /// A provider signalled overload.
    RateLimited,
    /// Workflow replay observed divergent history; the execution is unrecoverable.
    DeterminismViolation,
    /// An internal invariant broke.
    Internal,
}

impl ErrorKind {
    /// Whether a retry under backoff is worthwhile for this kind.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::Timeout | ErrorKind::RateLimited
        )
    }

    /// HTTP status code the facade maps this kind to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::SchemaViolation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimited => 429,
            ErrorKind::Transient | ErrorKind::Timeout => 503,
            ErrorKind::DeterminismViolation | ErrorKind::Internal => 500,
        }
    }

    /// Stable wire label, used in event payloads and HTTP bodies.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::DeterminismViolation => "determinism_violation",
            ErrorKind::Internal => "internal",
        }
    }

    /// Parse a wire label back into a kind. Unknown labels map to `Internal`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "schema_violation" => ErrorKind::SchemaViolation,
            "not_found" => ErrorKind::NotFound,
            "transient" => ErrorKind::Transient,
            "timeout" => ErrorKind::Timeout,
            "rate_limited" => ErrorKind::RateLimited,
            "determinism_violation" => ErrorKind::DeterminismViolation,
            _ => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified platform error: a taxonomy kind plus a human-readable message.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("{kind}: {message}")]
#[diagnostic(code(agentloom::error::platform))]
pub struct PlatformError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PlatformError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn schema_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaViolation, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    #[must_use]
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}
