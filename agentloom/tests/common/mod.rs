//! Shared fixtures for agentloom integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use agentloom::workflow::{Activity, ActivityError, ActivityRegistry, ActivityWorker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Counts executions per `step` input and echoes the step back.
pub struct RecordingActivity {
    pub name: String,
    pub counts: Arc<CallCounts>,
}

#[derive(Default)]
pub struct CallCounts {
    pub a: AtomicU32,
    pub b: AtomicU32,
    pub c: AtomicU32,
}

impl CallCounts {
    pub fn of(&self, step: &str) -> u32 {
        match step {
            "A" => self.a.load(Ordering::SeqCst),
            "B" => self.b.load(Ordering::SeqCst),
            "C" => self.c.load(Ordering::SeqCst),
            _ => 0,
        }
    }

    fn bump(&self, step: &str) {
        match step {
            "A" => self.a.fetch_add(1, Ordering::SeqCst),
            "B" => self.b.fetch_add(1, Ordering::SeqCst),
            "C" => self.c.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
    }
}

#[async_trait]
impl Activity for RecordingActivity {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let step = input
            .get("step")
            .and_then(Value::as_str)
            .ok_or_else(|| ActivityError::schema_violation("missing step"))?
            .to_string();
        self.counts.bump(&step);
        Ok(json!({"step": step}))
    }
}

/// Variant that hangs forever on a chosen step, simulating a worker that
/// dies mid-flight.
pub struct HangingActivity {
    pub name: String,
    pub hang_on: String,
    pub counts: Arc<CallCounts>,
}

#[async_trait]
impl Activity for HangingActivity {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value) -> Result<Value, ActivityError> {
        let step = input
            .get("step")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if step == self.hang_on {
            std::future::pending::<()>().await;
        }
        self.counts.bump(&step);
        Ok(json!({"step": step}))
    }
}

pub fn worker_with(activities: Vec<Arc<dyn Activity>>) -> Arc<ActivityWorker> {
    let mut registry = ActivityRegistry::new();
    for activity in activities {
        registry.register(activity);
    }
    Arc::new(ActivityWorker::new(Arc::new(registry), 8))
}

/// Manually driven clock for scheduler tests.
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: std::sync::Mutex::new(start),
        })
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap() = t;
    }
}

impl agentloom::workflow::SchedulerClock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
