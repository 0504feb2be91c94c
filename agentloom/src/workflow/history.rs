//! Event-sourced execution model.
//!
//! History is the authoritative record of a workflow execution: status and
//! in-memory state are always rebuildable from it. Shapes here are explicit
//! serde structs so the SQLite store and the in-memory store persist the
//! exact same JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of a history event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    WorkflowStarted,
    ActivityScheduled,
    ActivityStarted,
    ActivityCompleted,
    ActivityFailed,
    TimerFired,
    SignalReceived,
    /// Recorded value of a deterministic facade (`now`, `random`).
    MarkerRecorded,
    WorkflowCompleted,
    WorkflowFailed,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WorkflowStarted => "WorkflowStarted",
            EventKind::ActivityScheduled => "ActivityScheduled",
            EventKind::ActivityStarted => "ActivityStarted",
            EventKind::ActivityCompleted => "ActivityCompleted",
            EventKind::ActivityFailed => "ActivityFailed",
            EventKind::TimerFired => "TimerFired",
            EventKind::SignalReceived => "SignalReceived",
            EventKind::MarkerRecorded => "MarkerRecorded",
            EventKind::WorkflowCompleted => "WorkflowCompleted",
            EventKind::WorkflowFailed => "WorkflowFailed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "WorkflowStarted" => EventKind::WorkflowStarted,
            "ActivityScheduled" => EventKind::ActivityScheduled,
            "ActivityStarted" => EventKind::ActivityStarted,
            "ActivityCompleted" => EventKind::ActivityCompleted,
            "ActivityFailed" => EventKind::ActivityFailed,
            "TimerFired" => EventKind::TimerFired,
            "SignalReceived" => EventKind::SignalReceived,
            "MarkerRecorded" => EventKind::MarkerRecorded,
            "WorkflowCompleted" => EventKind::WorkflowCompleted,
            "WorkflowFailed" => EventKind::WorkflowFailed,
            _ => return None,
        })
    }
}

/// One entry in an execution's history. `seq` is assigned by the store and
/// strictly increases per execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            seq: 0,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Command index this event refers to, if it is command-scoped.
    #[must_use]
    pub fn command_index(&self) -> Option<u64> {
        self.payload.get("index").and_then(Value::as_u64)
    }
}

/// Terminal and non-terminal states of an execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "running" => WorkflowStatus::Running,
            "completed" => WorkflowStatus::Completed,
            "failed" => WorkflowStatus::Failed,
            "cancelled" => WorkflowStatus::Cancelled,
            "timed_out" => WorkflowStatus::TimedOut,
            _ => return None,
        })
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

/// Durable metadata of one execution, keyed by `workflow_id/run_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub input: Value,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// An execution record together with its full history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub record: ExecutionRecord,
    pub history: Vec<Event>,
}

impl WorkflowExecution {
    /// Compact summary of the history for status surfaces: event counts per
    /// kind, total length, and the failing activity if any.
    #[must_use]
    pub fn history_summary(&self) -> Value {
        let mut counts = serde_json::Map::new();
        for event in &self.history {
            let entry = counts
                .entry(event.kind.as_str().to_string())
                .or_insert(json!(0));
            if let Some(n) = entry.as_u64() {
                *entry = json!(n + 1);
            }
        }
        let failing_activity = self
            .history
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::ActivityFailed)
            .map(|e| e.payload.clone());
        json!({
            "length": self.history.len(),
            "counts": Value::Object(counts),
            "failing_activity": failing_activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip() {
        for kind in [
            EventKind::WorkflowStarted,
            EventKind::ActivityScheduled,
            EventKind::ActivityStarted,
            EventKind::ActivityCompleted,
            EventKind::ActivityFailed,
            EventKind::TimerFired,
            EventKind::SignalReceived,
            EventKind::MarkerRecorded,
            EventKind::WorkflowCompleted,
            EventKind::WorkflowFailed,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("Nope"), None);
    }

    #[test]
    fn status_round_trip() {
        for status in [
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
            WorkflowStatus::TimedOut,
        ] {
            assert_eq!(WorkflowStatus::parse(status.as_str()), Some(status));
        }
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
    }

    #[test]
    fn history_summary_counts_and_failure() {
        let exec = WorkflowExecution {
            record: ExecutionRecord {
                workflow_id: "w".into(),
                run_id: "r".into(),
                workflow_type: "t".into(),
                input: json!({}),
                status: WorkflowStatus::Failed,
                started_at: Utc::now(),
                closed_at: None,
            },
            history: vec![
                Event::new(EventKind::WorkflowStarted, json!({})),
                Event::new(EventKind::ActivityScheduled, json!({"index": 0})),
                Event::new(
                    EventKind::ActivityFailed,
                    json!({"index": 0, "error_kind": "transient"}),
                ),
            ],
        };
        let summary = exec.history_summary();
        assert_eq!(summary["length"], json!(3));
        assert_eq!(summary["counts"]["ActivityFailed"], json!(1));
        assert_eq!(summary["failing_activity"]["error_kind"], json!("transient"));
    }
}
