//! ```text
//! GraphBuilder ─► Graph::run ──────────► typed state in, typed state out
//!                   │                    (runs inside an activity)
//!                   └─► EventBus (progress / diagnostics)
//!
//! WorkflowRuntime ─► replay history ─► WorkflowContext ─► ActivityWorker
//!                   │                                      │
//!                   └─► HistoryStore (in-memory / SQLite)  └─► retries & timeouts
//!
//! Scheduler ─► cron / HH:MM specs ─► WorkflowRuntime::start_workflow
//! ```
//!
//! Agentloom is the core runtime for a durable, memory-aware agent platform:
//! a typed DAG executor for agent reasoning, an event-sourced workflow engine
//! with deterministic replay, and a cron-style scheduler that fires workflow
//! executions. Domain graphs, activities and the memory layer live in the
//! sibling crates and build on the traits defined here.

pub mod error;
pub mod event_bus;
pub mod graph;
pub mod utils;
pub mod workflow;
