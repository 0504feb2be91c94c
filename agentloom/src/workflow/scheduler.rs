//! Cron-driven workflow firings with overlap policies.
//!
//! Each schedule owns a workflow template; every firing starts a new
//! execution whose id is derived from `{schedule_id}-{fire_time}`, so
//! per-schedule fire times (and ids) are strictly increasing. A firing
//! skipped under the `Skip` policy is dropped entirely; the next firing
//! considered is the next boundary after the running execution finishes.
//! `BufferOne` keeps the earliest missed firing and starts it as soon as
//! the running execution completes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::event_bus::Event as BusEvent;

use super::cron::ScheduleSpec;
use super::runtime::{StartOptions, WorkflowRuntime};

/// What to do when a firing is due while the previous one still runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Drop the firing (default).
    Skip,
    /// Queue at most one missed firing and start it on completion.
    BufferOne,
    /// Always start.
    AllowAll,
}

impl Default for OverlapPolicy {
    fn default() -> Self {
        OverlapPolicy::Skip
    }
}

/// A stored schedule.
#[derive(Clone, Debug)]
pub struct Schedule {
    pub id: String,
    pub spec: ScheduleSpec,
    pub workflow_type: String,
    pub input_template: Value,
    pub paused: bool,
    pub note: String,
    pub overlap: OverlapPolicy,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ScheduleError {
    #[error("schedule already exists: {id}")]
    #[diagnostic(code(agentloom::scheduler::already_exists))]
    AlreadyExists { id: String },

    #[error("schedule not found: {id}")]
    #[diagnostic(code(agentloom::scheduler::not_found))]
    NotFound { id: String },

    #[error("schedule {id} can never fire")]
    #[diagnostic(code(agentloom::scheduler::never_fires))]
    NeverFires { id: String },
}

/// Clock seam so schedule firing is testable under a controlled clock.
pub trait SchedulerClock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Default)]
pub struct SystemClock;

impl SchedulerClock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct ScheduleEntry {
    schedule: Schedule,
    next_fire: Option<DateTime<Utc>>,
    running_workflow: Option<String>,
    buffered_fire: Option<DateTime<Utc>>,
}

/// Fires registered schedules against a [`WorkflowRuntime`].
pub struct Scheduler {
    runtime: Arc<WorkflowRuntime>,
    clock: Arc<dyn SchedulerClock>,
    entries: Mutex<FxHashMap<String, ScheduleEntry>>,
    poll_interval: Duration,
    bus_sender: std::sync::Mutex<Option<flume::Sender<BusEvent>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(runtime: Arc<WorkflowRuntime>) -> Arc<Self> {
        Self::with_clock(runtime, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(runtime: Arc<WorkflowRuntime>, clock: Arc<dyn SchedulerClock>) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            clock,
            entries: Mutex::new(FxHashMap::default()),
            poll_interval: Duration::from_millis(500),
            bus_sender: std::sync::Mutex::new(None),
        })
    }

    pub fn set_event_sender(&self, sender: flume::Sender<BusEvent>) {
        *self.bus_sender.lock().expect("bus sender poisoned") = Some(sender);
    }

    fn emit(&self, message: String) {
        if let Some(sender) = self.bus_sender.lock().expect("bus sender poisoned").as_ref() {
            let _ = sender.send(BusEvent::diagnostic("scheduler", message));
        }
    }

    /// Register a schedule. Fails with `AlreadyExists` on a duplicate id and
    /// with `NeverFires` when the spec has no future firing.
    #[instrument(skip(self, schedule), err)]
    pub async fn create(&self, schedule: Schedule) -> Result<(), ScheduleError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&schedule.id) {
            return Err(ScheduleError::AlreadyExists {
                id: schedule.id.clone(),
            });
        }
        let next_fire = schedule.spec.next_after(self.clock.now_utc());
        if next_fire.is_none() {
            return Err(ScheduleError::NeverFires {
                id: schedule.id.clone(),
            });
        }
        entries.insert(
            schedule.id.clone(),
            ScheduleEntry {
                schedule,
                next_fire,
                running_workflow: None,
                buffered_fire: None,
            },
        );
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), ScheduleError> {
        let mut entries = self.entries.lock().await;
        entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ScheduleError::NotFound { id: id.to_string() })
    }

    /// Pause firing. No effect on executions already running.
    pub async fn pause(&self, id: &str) -> Result<(), ScheduleError> {
        self.set_paused(id, true).await
    }

    /// Resume firing from the next boundary; missed firings are not
    /// backfilled.
    pub async fn unpause(&self, id: &str) -> Result<(), ScheduleError> {
        let result = self.set_paused(id, false).await;
        if result.is_ok() {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(id) {
                entry.next_fire = entry.schedule.spec.next_after(self.clock.now_utc());
            }
        }
        result
    }

    async fn set_paused(&self, id: &str, paused: bool) -> Result<(), ScheduleError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| ScheduleError::NotFound { id: id.to_string() })?;
        entry.schedule.paused = paused;
        Ok(())
    }

    /// All schedules, sorted by id.
    pub async fn list(&self) -> Vec<Schedule> {
        let entries = self.entries.lock().await;
        let mut out: Vec<Schedule> = entries.values().map(|e| e.schedule.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn get(&self, id: &str) -> Option<Schedule> {
        let entries = self.entries.lock().await;
        entries.get(id).map(|e| e.schedule.clone())
    }

    /// Spawn the fire loop. The loop wakes every poll interval, fires due
    /// schedules and starts buffered firings whose blocker completed.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.poll_interval).await;
                self.tick().await;
            }
        })
    }

    /// One pass over all schedules. Public for tests driving a manual clock.
    pub async fn tick(&self) {
        let now = self.clock.now_utc();
        let due: Vec<(String, DateTime<Utc>)> = {
            let mut entries = self.entries.lock().await;
            let mut due = Vec::new();
            for (id, entry) in entries.iter_mut() {
                if entry.schedule.paused {
                    continue;
                }
                while let Some(next) = entry.next_fire {
                    if next > now {
                        break;
                    }
                    due.push((id.clone(), next));
                    entry.next_fire = entry.schedule.spec.next_after(next);
                }
            }
            due
        };

        for (id, fire_time) in due {
            self.fire(&id, fire_time).await;
        }

        self.drain_buffered().await;
    }

    async fn fire(&self, id: &str, fire_time: DateTime<Utc>) {
        let (workflow_type, input, policy, blocked_by) = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            (
                entry.schedule.workflow_type.clone(),
                entry.schedule.input_template.clone(),
                entry.schedule.overlap,
                entry.running_workflow.clone(),
            )
        };

        if let Some(running_id) = &blocked_by {
            if self.runtime.is_running(running_id).await {
                match policy {
                    OverlapPolicy::Skip => {
                        self.emit(format!("schedule {id}: firing at {fire_time} skipped (overlap)"));
                        return;
                    }
                    OverlapPolicy::BufferOne => {
                        let mut entries = self.entries.lock().await;
                        if let Some(entry) = entries.get_mut(id) {
                            if entry.buffered_fire.is_none() {
                                entry.buffered_fire = Some(fire_time);
                                self.emit(format!(
                                    "schedule {id}: firing at {fire_time} buffered (overlap)"
                                ));
                            } else {
                                self.emit(format!(
                                    "schedule {id}: firing at {fire_time} dropped (buffer full)"
                                ));
                            }
                        }
                        return;
                    }
                    OverlapPolicy::AllowAll => {}
                }
            }
        }

        self.start_firing(id, fire_time, &workflow_type, input).await;
    }

    async fn drain_buffered(&self) {
        let candidates: Vec<(String, DateTime<Utc>, String, Value)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter_map(|(id, entry)| {
                    entry.buffered_fire.map(|t| {
                        (
                            id.clone(),
                            t,
                            entry.schedule.workflow_type.clone(),
                            entry.schedule.input_template.clone(),
                        )
                    })
                })
                .collect()
        };

        for (id, fire_time, workflow_type, input) in candidates {
            let running_id = {
                let entries = self.entries.lock().await;
                entries.get(&id).and_then(|e| e.running_workflow.clone())
            };
            let still_running = match running_id {
                Some(running_id) => self.runtime.is_running(&running_id).await,
                None => false,
            };
            if still_running {
                continue;
            }
            {
                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(&id) {
                    entry.buffered_fire = None;
                }
            }
            self.start_firing(&id, fire_time, &workflow_type, input).await;
        }
    }

    async fn start_firing(
        &self,
        id: &str,
        fire_time: DateTime<Utc>,
        workflow_type: &str,
        input: Value,
    ) {
        let workflow_id = format!("{id}-{}", fire_time.format("%Y%m%dT%H%M%SZ"));
        match self
            .runtime
            .start_workflow(
                workflow_type,
                input,
                StartOptions {
                    workflow_id: Some(workflow_id.clone()),
                    execution_timeout: None,
                },
            )
            .await
        {
            Ok(started) => {
                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(id) {
                    entry.running_workflow = Some(started.workflow_id.clone());
                }
                self.emit(format!("schedule {id}: started {workflow_id}"));
            }
            Err(e) => {
                tracing::error!(schedule = id, error = %e, "schedule firing failed to start");
                self.emit(format!("schedule {id}: firing failed: {e}"));
            }
        }
    }
}
