//! The workflow runtime: starts, resumes, signals, cancels and describes
//! event-sourced executions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::sync::{watch, RwLock};
use tracing::instrument;

use crate::error::{ErrorKind, PlatformError};
use crate::event_bus::Event as BusEvent;
use crate::utils::IdGenerator;

use super::context::{CancelFlag, SignalHub, WorkflowContext, WorkflowError};
use super::history::{EventKind, ExecutionRecord, WorkflowStatus};
use super::store::HistoryStore;
use super::worker::ActivityWorker;

/// A registered workflow function.
///
/// The function must be deterministic: all clocks, randomness and external
/// effects go through the [`WorkflowContext`].
pub type WorkflowFn = Arc<
    dyn Fn(WorkflowContext, Value) -> Pin<Box<dyn Future<Output = Result<Value, WorkflowError>> + Send>>
        + Send
        + Sync,
>;

/// Terminal outcome of an execution, shared with waiters.
#[derive(Clone, Debug)]
pub enum ExecutionOutcome {
    Completed(Value),
    Failed { kind: ErrorKind, message: String },
    Cancelled,
    TimedOut,
}

impl ExecutionOutcome {
    fn status(&self) -> WorkflowStatus {
        match self {
            ExecutionOutcome::Completed(_) => WorkflowStatus::Completed,
            ExecutionOutcome::Failed { .. } => WorkflowStatus::Failed,
            ExecutionOutcome::Cancelled => WorkflowStatus::Cancelled,
            ExecutionOutcome::TimedOut => WorkflowStatus::TimedOut,
        }
    }
}

/// Options for starting one execution.
#[derive(Clone, Debug, Default)]
pub struct StartOptions {
    /// Explicit workflow id; generated when absent. Starting an id that is
    /// already running is idempotent and returns the running execution.
    pub workflow_id: Option<String>,
    /// Total execution timeout; exceeding it closes the workflow as
    /// `TimedOut`.
    pub execution_timeout: Option<Duration>,
}

/// Identifiers of a started execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartedWorkflow {
    pub workflow_id: String,
    pub run_id: String,
}

/// Point-in-time description of an execution for status surfaces.
#[derive(Clone, Debug)]
pub struct ExecutionDescription {
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub history_summary: Value,
    pub published_state: Value,
}

struct LiveExecution {
    run_id: String,
    cancel: Arc<CancelFlag>,
    signals: Arc<SignalHub>,
    ctx: WorkflowContext,
    outcome_rx: watch::Receiver<Option<ExecutionOutcome>>,
}

/// Hosts workflow executions over a [`HistoryStore`] and an
/// [`ActivityWorker`]. One logical thread per execution; executions
/// interleave freely on the tokio runtime but each one's state is isolated.
pub struct WorkflowRuntime {
    store: Arc<dyn HistoryStore>,
    worker: Arc<ActivityWorker>,
    workflows: RwLock<FxHashMap<String, WorkflowFn>>,
    live: RwLock<FxHashMap<String, LiveExecution>>,
    ids: IdGenerator,
    bus_sender: std::sync::Mutex<Option<flume::Sender<BusEvent>>>,
}

impl WorkflowRuntime {
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>, worker: Arc<ActivityWorker>) -> Arc<Self> {
        Arc::new(Self {
            store,
            worker,
            workflows: RwLock::new(FxHashMap::default()),
            live: RwLock::new(FxHashMap::default()),
            ids: IdGenerator::new(),
            bus_sender: std::sync::Mutex::new(None),
        })
    }

    /// Wire a progress-event sender for runtime diagnostics.
    pub fn set_event_sender(&self, sender: flume::Sender<BusEvent>) {
        *self.bus_sender.lock().expect("bus sender poisoned") = Some(sender);
    }

    fn emit(&self, scope: &str, message: String) {
        if let Some(sender) = self.bus_sender.lock().expect("bus sender poisoned").as_ref() {
            let _ = sender.send(BusEvent::diagnostic(scope, message));
        }
    }

    /// Register a workflow type. Later registrations replace earlier ones.
    pub async fn register_workflow(&self, workflow_type: &str, f: WorkflowFn) {
        self.workflows
            .write()
            .await
            .insert(workflow_type.to_string(), f);
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn HistoryStore> {
        self.store.clone()
    }

    /// Number of currently running executions.
    pub async fn running_count(&self) -> usize {
        let live = self.live.read().await;
        live.values()
            .filter(|l| l.outcome_rx.borrow().is_none())
            .count()
    }

    /// Whether the given workflow id has a live, unfinished execution.
    pub async fn is_running(&self, workflow_id: &str) -> bool {
        let live = self.live.read().await;
        live.get(workflow_id)
            .map(|l| l.outcome_rx.borrow().is_none())
            .unwrap_or(false)
    }

    /// Start a new execution of a registered workflow type.
    #[instrument(skip(self, input, options), err)]
    pub async fn start_workflow(
        self: &Arc<Self>,
        workflow_type: &str,
        input: Value,
        options: StartOptions,
    ) -> Result<StartedWorkflow, PlatformError> {
        let wf_fn = {
            let workflows = self.workflows.read().await;
            workflows.get(workflow_type).cloned()
        }
        .ok_or_else(|| {
            PlatformError::not_found(format!("unknown workflow type: {workflow_type}"))
        })?;

        let workflow_id = options
            .workflow_id
            .clone()
            .unwrap_or_else(|| self.ids.generate(workflow_type));

        {
            let live = self.live.read().await;
            if let Some(existing) = live.get(&workflow_id) {
                if existing.outcome_rx.borrow().is_none() {
                    return Ok(StartedWorkflow {
                        workflow_id,
                        run_id: existing.run_id.clone(),
                    });
                }
            }
        }

        let run_id = self.ids.generate("run");
        let record = ExecutionRecord {
            workflow_id: workflow_id.clone(),
            run_id: run_id.clone(),
            workflow_type: workflow_type.to_string(),
            input: input.clone(),
            status: WorkflowStatus::Running,
            started_at: Utc::now(),
            closed_at: None,
        };
        self.store
            .create_execution(&record)
            .await
            .map_err(|e| PlatformError::transient(e.to_string()))?;

        self.spawn_driver(wf_fn, record, Vec::new(), options.execution_timeout, true)
            .await
            .map_err(|e| PlatformError::transient(e.to_string()))?;

        self.emit(
            "workflow",
            format!("started {workflow_type} as {workflow_id}/{run_id}"),
        );
        Ok(StartedWorkflow {
            workflow_id,
            run_id,
        })
    }

    /// Reload every `Running` execution from the store and re-drive it from
    /// its history. Called on process startup; completed activities replay
    /// from the log and are not re-executed.
    #[instrument(skip(self), err)]
    pub async fn resume_pending(self: &Arc<Self>) -> Result<usize, PlatformError> {
        let pending = self
            .store
            .list_by_status(WorkflowStatus::Running)
            .await
            .map_err(|e| PlatformError::transient(e.to_string()))?;

        let mut resumed = 0;
        for record in pending {
            if self.is_running(&record.workflow_id).await {
                continue;
            }
            let wf_fn = {
                let workflows = self.workflows.read().await;
                workflows.get(&record.workflow_type).cloned()
            };
            let Some(wf_fn) = wf_fn else {
                tracing::warn!(
                    workflow_type = %record.workflow_type,
                    workflow_id = %record.workflow_id,
                    "cannot resume execution of unregistered workflow type"
                );
                continue;
            };
            let history = self
                .store
                .load_latest(&record.workflow_id)
                .await
                .map_err(|e| PlatformError::transient(e.to_string()))?
                .map(|exec| exec.history)
                .unwrap_or_default();
            self.spawn_driver(wf_fn, record, history, None, false)
                .await
                .map_err(|e| PlatformError::transient(e.to_string()))?;
            resumed += 1;
        }
        Ok(resumed)
    }

    async fn spawn_driver(
        self: &Arc<Self>,
        wf_fn: WorkflowFn,
        record: ExecutionRecord,
        history: Vec<super::history::Event>,
        execution_timeout: Option<Duration>,
        fresh: bool,
    ) -> Result<(), WorkflowError> {
        let cancel = Arc::new(CancelFlag::default());
        let signals = Arc::new(SignalHub::default());
        let ctx = WorkflowContext::new(
            record.workflow_id.clone(),
            record.run_id.clone(),
            self.store.clone(),
            self.worker.clone(),
            history,
            cancel.clone(),
            signals.clone(),
        );

        if fresh {
            ctx.append(
                EventKind::WorkflowStarted,
                json!({"workflow_type": record.workflow_type, "input": record.input}),
            )
            .await?;
        }

        let (outcome_tx, outcome_rx) = watch::channel(None);
        {
            let mut live = self.live.write().await;
            live.insert(
                record.workflow_id.clone(),
                LiveExecution {
                    run_id: record.run_id.clone(),
                    cancel: cancel.clone(),
                    signals,
                    ctx: ctx.clone(),
                    outcome_rx,
                },
            );
        }

        let runtime = self.clone();
        tokio::spawn(async move {
            let fut = wf_fn(ctx.clone(), record.input.clone());
            let result = match execution_timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(res) => res,
                    Err(_) => {
                        runtime
                            .close_execution(
                                &ctx,
                                &record,
                                ExecutionOutcome::TimedOut,
                                &outcome_tx,
                            )
                            .await;
                        return;
                    }
                },
                None => fut.await,
            };

            let outcome = match result {
                Ok(value) => ExecutionOutcome::Completed(value),
                Err(WorkflowError::Cancelled) => ExecutionOutcome::Cancelled,
                Err(e) => ExecutionOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            };
            runtime
                .close_execution(&ctx, &record, outcome, &outcome_tx)
                .await;
        });
        Ok(())
    }

    async fn close_execution(
        &self,
        ctx: &WorkflowContext,
        record: &ExecutionRecord,
        outcome: ExecutionOutcome,
        outcome_tx: &watch::Sender<Option<ExecutionOutcome>>,
    ) {
        let (kind, payload) = match &outcome {
            ExecutionOutcome::Completed(value) => {
                (EventKind::WorkflowCompleted, json!({"result": value}))
            }
            ExecutionOutcome::Failed { kind, message } => (
                EventKind::WorkflowFailed,
                json!({"error_kind": kind.as_str(), "message": message}),
            ),
            ExecutionOutcome::Cancelled => (
                EventKind::WorkflowFailed,
                json!({"error_kind": "cancelled", "message": "workflow cancelled"}),
            ),
            ExecutionOutcome::TimedOut => (
                EventKind::WorkflowFailed,
                json!({"error_kind": "timeout", "message": "workflow execution timeout exceeded"}),
            ),
        };
        if let Err(e) = ctx.append(kind, payload).await {
            tracing::error!(error = %e, workflow_id = %record.workflow_id, "failed to append terminal event");
        }
        if let Err(e) = self
            .store
            .update_status(
                &record.workflow_id,
                &record.run_id,
                outcome.status(),
                Some(Utc::now()),
            )
            .await
        {
            tracing::error!(error = %e, workflow_id = %record.workflow_id, "failed to update terminal status");
        }
        self.emit(
            "workflow",
            format!(
                "{} closed as {}",
                record.workflow_id,
                outcome.status().as_str()
            ),
        );
        let _ = outcome_tx.send(Some(outcome));
    }

    /// Fire-and-forget signal delivery; recorded in history, handled by the
    /// workflow whenever it chooses to consume it.
    #[instrument(skip(self, payload), err)]
    pub async fn signal(
        &self,
        workflow_id: &str,
        name: &str,
        payload: Value,
    ) -> Result<(), PlatformError> {
        let (ctx, signals) = {
            let live = self.live.read().await;
            let Some(exec) = live.get(workflow_id) else {
                return Err(PlatformError::not_found(format!(
                    "no running workflow: {workflow_id}"
                )));
            };
            if exec.outcome_rx.borrow().is_some() {
                return Err(PlatformError::not_found(format!(
                    "workflow already closed: {workflow_id}"
                )));
            }
            (exec.ctx.clone(), exec.signals.clone())
        };
        ctx.append(
            EventKind::SignalReceived,
            json!({"name": name, "payload": payload}),
        )
        .await
        .map_err(|e| PlatformError::transient(e.to_string()))?;
        signals.push(name, payload);
        Ok(())
    }

    /// Cooperative cancellation: marks the execution; the next suspension
    /// point inside the workflow observes it.
    pub async fn cancel(&self, workflow_id: &str) -> bool {
        let live = self.live.read().await;
        match live.get(workflow_id) {
            Some(exec) if exec.outcome_rx.borrow().is_none() => {
                exec.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Describe an execution from its durable record and history.
    pub async fn describe(
        &self,
        workflow_id: &str,
    ) -> Result<ExecutionDescription, PlatformError> {
        let execution = self
            .store
            .load_latest(workflow_id)
            .await
            .map_err(|e| PlatformError::transient(e.to_string()))?
            .ok_or_else(|| {
                PlatformError::not_found(format!("unknown workflow: {workflow_id}"))
            })?;
        let published_state = {
            let live = self.live.read().await;
            live.get(workflow_id)
                .map(|l| l.ctx.published_state())
                .unwrap_or(Value::Null)
        };
        Ok(ExecutionDescription {
            workflow_id: execution.record.workflow_id.clone(),
            run_id: execution.record.run_id.clone(),
            workflow_type: execution.record.workflow_type.clone(),
            status: execution.record.status,
            history_summary: execution.history_summary(),
            published_state,
        })
    }

    /// Wait for an execution's terminal outcome.
    pub async fn await_result(
        &self,
        workflow_id: &str,
    ) -> Result<ExecutionOutcome, PlatformError> {
        let mut rx = {
            let live = self.live.read().await;
            live.get(workflow_id).map(|l| l.outcome_rx.clone())
        }
        .ok_or_else(|| PlatformError::not_found(format!("unknown workflow: {workflow_id}")))?;

        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return Ok(outcome);
            }
            rx.changed()
                .await
                .map_err(|_| PlatformError::internal("execution driver dropped"))?;
        }
    }
}
