//! Durable, deterministic workflow orchestration.
//!
//! A workflow is an async function over a [`WorkflowContext`] that invokes
//! activities and never performs I/O directly. Every decision the function
//! makes is recorded as an event in an append-only history; recovering from
//! a crash means re-executing the function against its recorded history,
//! feeding completed activities from the log instead of re-running them.
//! Any divergence between the replayed command sequence and the recorded
//! one is a [`WorkflowError::DeterminismViolation`] and fails the execution
//! as unrecoverable.
//!
//! Determinism rules for workflow code:
//! - wall-clock only through [`WorkflowContext::now`]
//! - randomness only through [`WorkflowContext::random`]
//! - no network, filesystem or environment access
//! - no unordered map iteration whose order affects outcomes
//!
//! Activities carry retry policies and timeouts; the [`ActivityWorker`]
//! enforces both. Scheduling lives in [`Scheduler`], which accepts POSIX
//! cron expressions and `HH:MM` shorthand and fires workflow executions
//! under an overlap policy.

mod activity;
mod context;
pub mod cron;
mod history;
mod runtime;
mod scheduler;
mod store;
mod worker;

pub use activity::{
    Activity, ActivityError, ActivityOptions, ActivityRegistry, RetryPolicy,
};
pub use context::{WorkflowContext, WorkflowError};
pub use history::{
    Event, EventKind, ExecutionRecord, WorkflowExecution, WorkflowStatus,
};
pub use runtime::{
    ExecutionDescription, ExecutionOutcome, StartOptions, StartedWorkflow, WorkflowFn,
    WorkflowRuntime,
};
pub use scheduler::{OverlapPolicy, Schedule, ScheduleError, Scheduler, SchedulerClock, SystemClock};
pub use store::{HistoryStore, InMemoryHistoryStore, SqliteHistoryStore, StoreError};
pub use worker::ActivityWorker;
