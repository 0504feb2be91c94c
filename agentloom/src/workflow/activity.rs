//! Activities: idempotent, retryable units of work invoked by workflows.
//!
//! Activities are the only place a workflow touches the outside world. Each
//! one declares a name, takes a JSON input and produces a JSON output that
//! must be sufficient to resume downstream work without re-running it.
//! Provider-specific failures are translated into the platform taxonomy at
//! this boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::error::{ErrorKind, PlatformError};

/// A classified activity failure.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("activity failed ({kind}): {message}")]
#[diagnostic(code(agentloom::workflow::activity))]
pub struct ActivityError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ActivityError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    #[must_use]
    pub fn schema_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaViolation, message)
    }
}

impl From<PlatformError> for ActivityError {
    fn from(e: PlatformError) -> Self {
        Self {
            kind: e.kind,
            message: e.message,
        }
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(e: serde_json::Error) -> Self {
        Self::schema_violation(e.to_string())
    }
}

/// A unit of external work callable from workflows.
///
/// Implementations must not share mutable state between invocations; any
/// cross-activity coupling goes through the workflow's input and output.
#[async_trait]
pub trait Activity: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, input: Value) -> Result<Value, ActivityError>;
}

/// Immutable name → activity lookup, built once at startup.
#[derive(Default)]
pub struct ActivityRegistry {
    map: FxHashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, activity: Arc<dyn Activity>) {
        self.map.insert(activity.name().to_string(), activity);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.map.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Retry policy for one activity.
///
/// Defaults: 1 s initial interval, 2× backoff, 60 s cap, 3 attempts.
/// Only kinds that are retryable under the taxonomy are ever retried;
/// `non_retryable` narrows that further per call site.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub non_retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 3,
            non_retryable: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// A single-attempt policy.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Whether `error` warrants another attempt after `attempt` tries.
    #[must_use]
    pub fn should_retry(&self, error: &ActivityError, attempt: u32) -> bool {
        attempt < self.max_attempts
            && error.kind.retryable()
            && !self.non_retryable.contains(&error.kind)
    }

    /// Backoff delay before attempt `attempt + 1` (1-based attempts).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exp as i32);
        let capped = base.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Per-invocation options for an activity call.
#[derive(Clone, Debug)]
pub struct ActivityOptions {
    pub retry: RetryPolicy,
    /// Bound on how long the call may wait for a worker slot.
    pub schedule_to_start: Option<Duration>,
    /// Hard per-attempt execution timeout.
    pub start_to_close: Duration,
    /// Inactivity bound; in this single-process runtime it tightens the
    /// per-attempt timeout rather than tracking explicit heartbeats.
    pub heartbeat: Option<Duration>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            schedule_to_start: None,
            start_to_close: Duration::from_secs(60),
            heartbeat: None,
        }
    }
}

impl ActivityOptions {
    #[must_use]
    pub fn with_start_to_close(mut self, timeout: Duration) -> Self {
        self.start_to_close = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The effective per-attempt deadline.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        match self.heartbeat {
            Some(hb) if hb < self.start_to_close => hb,
            _ => self.start_to_close,
        }
    }
}
