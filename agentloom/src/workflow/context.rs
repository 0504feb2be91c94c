//! Deterministic execution context for workflow functions.
//!
//! Every side-effecting decision a workflow makes goes through this context
//! and is assigned a command index. On a fresh execution the context records
//! the decision in history; on replay it serves the recorded outcome back
//! without touching the outside world. Replay therefore reconstructs the
//! exact in-memory state the workflow had before a crash, provided the
//! workflow function is deterministic.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::error::ErrorKind;

use super::activity::ActivityOptions;
use super::history::{Event, EventKind};
use super::store::{HistoryStore, StoreError};
use super::worker::ActivityWorker;

/// Errors surfaced to workflow functions.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowError {
    #[error("activity {activity} failed ({kind}): {message}")]
    #[diagnostic(code(agentloom::workflow::activity_failed))]
    Activity {
        activity: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("workflow cancelled")]
    #[diagnostic(code(agentloom::workflow::cancelled))]
    Cancelled,

    #[error("replay diverged from recorded history: {detail}")]
    #[diagnostic(
        code(agentloom::workflow::determinism_violation),
        help("Workflow code must not read clocks, randomness or external state directly.")
    )]
    DeterminismViolation { detail: String },

    #[error("workflow input invalid: {0}")]
    #[diagnostic(code(agentloom::workflow::bad_input))]
    BadInput(String),

    #[error(transparent)]
    #[diagnostic(code(agentloom::workflow::store))]
    Store(#[from] StoreError),

    #[error("workflow internal error: {0}")]
    #[diagnostic(code(agentloom::workflow::internal))]
    Internal(String),
}

impl WorkflowError {
    /// Taxonomy kind for status reporting.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Activity { kind, .. } => *kind,
            WorkflowError::Cancelled => ErrorKind::Internal,
            WorkflowError::DeterminismViolation { .. } => ErrorKind::DeterminismViolation,
            WorkflowError::BadInput(_) => ErrorKind::SchemaViolation,
            WorkflowError::Store(_) => ErrorKind::Transient,
            WorkflowError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Cancellation flag shared between the runtime and the context.
///
/// Backed by a watch channel: version counting makes the wait race-free
/// even when the cancel lands between a check and a suspend.
pub(crate) struct CancelFlag {
    tx: tokio::sync::watch::Sender<bool>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        let (tx, _rx) = tokio::sync::watch::channel(false);
        Self { tx }
    }
}

impl CancelFlag {
    pub(crate) fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone means the execution is tearing down anyway.
                return;
            }
        }
    }
}

/// Signal queues shared between the runtime (producer) and context (consumer).
#[derive(Default)]
pub(crate) struct SignalHub {
    queues: std::sync::Mutex<FxHashMap<String, VecDeque<Value>>>,
    notify: Notify,
}

impl SignalHub {
    pub(crate) fn push(&self, name: &str, payload: Value) {
        self.queues
            .lock()
            .expect("signal hub poisoned")
            .entry(name.to_string())
            .or_default()
            .push_back(payload);
        // notify_one stores a permit when nobody waits yet, so a signal
        // delivered just before the workflow suspends is not lost.
        self.notify.notify_one();
    }

    fn pop(&self, name: &str) -> Option<Value> {
        self.queues
            .lock()
            .expect("signal hub poisoned")
            .get_mut(name)
            .and_then(VecDeque::pop_front)
    }
}

struct ReplayState {
    next_command_index: u64,
    /// Command indices whose completion is already recorded. Guards
    /// at-most-once completion even if a worker reports success twice.
    completions: FxHashSet<u64>,
}

pub(crate) struct CtxInner {
    pub(crate) workflow_id: String,
    pub(crate) run_id: String,
    store: Arc<dyn HistoryStore>,
    worker: Arc<ActivityWorker>,
    history: Vec<Event>,
    replay: Mutex<ReplayState>,
    pub(crate) cancel: Arc<CancelFlag>,
    pub(crate) signals: Arc<SignalHub>,
    published_state: std::sync::Mutex<Value>,
}

/// Handle passed to workflow functions. Cheap to clone.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<CtxInner>,
}

impl WorkflowContext {
    pub(crate) fn new(
        workflow_id: String,
        run_id: String,
        store: Arc<dyn HistoryStore>,
        worker: Arc<ActivityWorker>,
        history: Vec<Event>,
        cancel: Arc<CancelFlag>,
        signals: Arc<SignalHub>,
    ) -> Self {
        // Pre-deliver recorded signals so replayed consumption sees them in
        // history order.
        for event in &history {
            if event.kind == EventKind::SignalReceived {
                if let Some(name) = event.payload.get("name").and_then(Value::as_str) {
                    signals.push(
                        name,
                        event.payload.get("payload").cloned().unwrap_or(Value::Null),
                    );
                }
            }
        }
        let completions = history
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    EventKind::ActivityCompleted | EventKind::ActivityFailed
                )
            })
            .filter_map(Event::command_index)
            .collect();
        Self {
            inner: Arc::new(CtxInner {
                workflow_id,
                run_id,
                store,
                worker,
                history,
                replay: Mutex::new(ReplayState {
                    next_command_index: 0,
                    completions,
                }),
                cancel,
                signals,
                published_state: std::sync::Mutex::new(Value::Null),
            }),
        }
    }

    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.inner.workflow_id
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Whether an outside cancel has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Deterministic wall clock: recorded on first execution, replayed after.
    pub async fn now(&self) -> Result<DateTime<Utc>, WorkflowError> {
        let value = self.marker("now", || json!(Utc::now().to_rfc3339())).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| WorkflowError::Internal("now marker is not a string".into()))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| WorkflowError::Internal(format!("bad now marker: {e}")))
    }

    /// Deterministic randomness: a u64 recorded on first execution.
    pub async fn random(&self) -> Result<u64, WorkflowError> {
        let seed_id = self.inner.run_id.clone();
        let value = self
            .marker("random", move || {
                let nanos = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(0);
                let digest = crate::utils::sha256(
                    format!("{seed_id}:{nanos}").as_bytes(),
                );
                json!(u64::from_le_bytes(digest[0..8].try_into().unwrap()))
            })
            .await?;
        value
            .as_u64()
            .ok_or_else(|| WorkflowError::Internal("random marker is not a u64".into()))
    }

    async fn marker(
        &self,
        name: &str,
        fresh: impl FnOnce() -> Value,
    ) -> Result<Value, WorkflowError> {
        let index = self.next_index().await;
        if let Some(event) = self.find_command(EventKind::MarkerRecorded, index) {
            let recorded = event
                .payload
                .get("marker")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if recorded != name {
                return Err(WorkflowError::DeterminismViolation {
                    detail: format!(
                        "command {index}: recorded marker {recorded:?}, replay requested {name:?}"
                    ),
                });
            }
            return Ok(event.payload.get("value").cloned().unwrap_or(Value::Null));
        }
        let value = fresh();
        self.append(
            EventKind::MarkerRecorded,
            json!({"index": index, "marker": name, "value": value}),
        )
        .await?;
        Ok(value)
    }

    /// Invoke an activity with default options.
    pub async fn execute_activity(
        &self,
        name: &str,
        input: Value,
    ) -> Result<Value, WorkflowError> {
        self.execute_activity_with_options(name, input, ActivityOptions::default())
            .await
    }

    /// Invoke an activity under explicit retry/timeout options.
    ///
    /// On replay, a recorded completion short-circuits the call; a recorded
    /// schedule without completion means the worker died mid-flight and the
    /// activity is executed now without re-recording the schedule.
    pub async fn execute_activity_with_options(
        &self,
        name: &str,
        input: Value,
        options: ActivityOptions,
    ) -> Result<Value, WorkflowError> {
        if self.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        let index = self.next_index().await;

        let mut already_scheduled = false;
        if let Some(scheduled) = self.find_command(EventKind::ActivityScheduled, index) {
            let recorded_name = scheduled
                .payload
                .get("activity")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let recorded_input = scheduled.payload.get("input").cloned().unwrap_or(Value::Null);
            if recorded_name != name || recorded_input != input {
                return Err(WorkflowError::DeterminismViolation {
                    detail: format!(
                        "command {index}: recorded schedule of {recorded_name:?}, \
                         replay scheduled {name:?} with different input"
                    ),
                });
            }
            if let Some(done) = self.find_command(EventKind::ActivityCompleted, index) {
                return Ok(done.payload.get("result").cloned().unwrap_or(Value::Null));
            }
            if let Some(failed) = self.find_command(EventKind::ActivityFailed, index) {
                let kind = failed
                    .payload
                    .get("error_kind")
                    .and_then(Value::as_str)
                    .map(ErrorKind::parse)
                    .unwrap_or(ErrorKind::Internal);
                let message = failed
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Err(WorkflowError::Activity {
                    activity: name.to_string(),
                    kind,
                    message,
                });
            }
            already_scheduled = true;
        }

        if !already_scheduled {
            self.append(
                EventKind::ActivityScheduled,
                json!({"index": index, "activity": name, "input": input}),
            )
            .await?;
        }
        self.append(
            EventKind::ActivityStarted,
            json!({"index": index, "activity": name}),
        )
        .await?;

        let outcome = tokio::select! {
            res = self.inner.worker.run(name, input, &options) => res,
            _ = self.inner.cancel.cancelled() => return Err(WorkflowError::Cancelled),
        };

        match outcome {
            Ok(result) => {
                if self.record_completion(index).await {
                    self.append(
                        EventKind::ActivityCompleted,
                        json!({"index": index, "activity": name, "result": result}),
                    )
                    .await?;
                }
                Ok(result)
            }
            Err(e) => {
                if self.record_completion(index).await {
                    self.append(
                        EventKind::ActivityFailed,
                        json!({
                            "index": index,
                            "activity": name,
                            "error_kind": e.kind.as_str(),
                            "message": e.message,
                        }),
                    )
                    .await?;
                }
                Err(WorkflowError::Activity {
                    activity: name.to_string(),
                    kind: e.kind,
                    message: e.message,
                })
            }
        }
    }

    /// Durable timer. Replayed timers return immediately.
    pub async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError> {
        if self.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        let index = self.next_index().await;
        if self.find_command(EventKind::TimerFired, index).is_some() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.inner.cancel.cancelled() => return Err(WorkflowError::Cancelled),
        }
        self.append(EventKind::TimerFired, json!({"index": index})).await?;
        Ok(())
    }

    /// Take the next pending signal for `name`, if any.
    #[must_use]
    pub fn try_recv_signal(&self, name: &str) -> Option<Value> {
        self.inner.signals.pop(name)
    }

    /// Suspend until a signal named `name` arrives (or the workflow is
    /// cancelled).
    pub async fn wait_signal(&self, name: &str) -> Result<Value, WorkflowError> {
        loop {
            if let Some(payload) = self.inner.signals.pop(name) {
                return Ok(payload);
            }
            if self.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }
            tokio::select! {
                _ = self.inner.signals.notify.notified() => {}
                _ = self.inner.cancel.cancelled() => return Err(WorkflowError::Cancelled),
            }
        }
    }

    /// Publish a read-only state snapshot for queries. Must be derived
    /// deterministically from workflow state.
    pub fn publish_state(&self, state: Value) {
        *self
            .inner
            .published_state
            .lock()
            .expect("published state poisoned") = state;
    }

    pub(crate) fn published_state(&self) -> Value {
        self.inner
            .published_state
            .lock()
            .expect("published state poisoned")
            .clone()
    }

    async fn next_index(&self) -> u64 {
        let mut replay = self.inner.replay.lock().await;
        let index = replay.next_command_index;
        replay.next_command_index += 1;
        index
    }

    /// True exactly once per command index.
    async fn record_completion(&self, index: u64) -> bool {
        let mut replay = self.inner.replay.lock().await;
        replay.completions.insert(index)
    }

    fn find_command(&self, kind: EventKind, index: u64) -> Option<&Event> {
        self.inner
            .history
            .iter()
            .find(|e| e.kind == kind && e.command_index() == Some(index))
    }

    pub(crate) async fn append(
        &self,
        kind: EventKind,
        payload: Value,
    ) -> Result<u64, WorkflowError> {
        Ok(self
            .inner
            .store
            .append_event(
                &self.inner.workflow_id,
                &self.inner.run_id,
                Event::new(kind, payload),
            )
            .await?)
    }
}
