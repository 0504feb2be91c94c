mod common;

use std::sync::Arc;
use std::time::Duration;

use agentloom::workflow::{
    HistoryStore, InMemoryHistoryStore, OverlapPolicy, Schedule, ScheduleError, Scheduler, WorkflowFn, WorkflowRuntime, WorkflowStatus, cron::ScheduleSpec,
};
use chrono::{DateTime, TimeZone, Utc};
use common::{worker_with, ManualClock};
use serde_json::json;

fn minute_schedule(id: &str, overlap: OverlapPolicy) -> Schedule {
    Schedule {
        id: id.into(),
        spec: ScheduleSpec::parse("* * * * *").unwrap(),
        workflow_type: "gated".into(),
        input_template: json!({}),
        paused: false,
        note: "test schedule".into(),
        overlap,
    }
}

/// Workflow that completes only when it receives the `done` signal, so the
/// test controls exactly when each firing finishes.
fn gated_workflow() -> WorkflowFn {
    Arc::new(|ctx, _input| {
        Box::pin(async move {
            let _ = ctx.wait_signal("done").await?;
            Ok(json!({"ok": true}))
        })
    })
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

async fn firings_of(
    store: &InMemoryHistoryStore,
    prefix: &str,
) -> Vec<String> {
    let mut ids = Vec::new();
    for status in [
        WorkflowStatus::Running,
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
    ] {
        for record in store.list_by_status(status).await.unwrap() {
            if record.workflow_id.starts_with(prefix) {
                ids.push(record.workflow_id);
            }
        }
    }
    ids.sort();
    ids
}

#[tokio::test]
async fn skip_policy_drops_overlapping_firings() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let runtime = WorkflowRuntime::new(store.clone(), worker_with(vec![]));
    runtime.register_workflow("gated", gated_workflow()).await;

    let clock = ManualClock::at(t0());
    let scheduler = Scheduler::with_clock(runtime.clone(), clock.clone());
    scheduler
        .create(minute_schedule("s1", OverlapPolicy::Skip))
        .await
        .unwrap();

    // The first firing lands at t0+60s and runs for 130 virtual seconds.
    for seconds in 1..240u32 {
        clock.set(t0() + chrono::Duration::seconds(i64::from(seconds)));
        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        if seconds == 190 {
            // First firing (at +60) completes now, 130s after starting.
            let ids = firings_of(&store, "s1-").await;
            assert_eq!(ids.len(), 1, "firings at +120 and +180 must be skipped");
            runtime.signal(&ids[0], "done", json!({})).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // Only the +60 firing started inside the window; the skipped boundaries
    // are never started retroactively.
    let ids = firings_of(&store, "s1-").await;
    assert_eq!(ids.len(), 1);

    clock.set(t0() + chrono::Duration::seconds(240));
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let ids = firings_of(&store, "s1-").await;
    assert_eq!(ids.len(), 2, "a fresh firing starts at the next boundary");
}

#[tokio::test]
async fn buffer_one_policy_starts_missed_firing_after_completion() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let runtime = WorkflowRuntime::new(store.clone(), worker_with(vec![]));
    runtime.register_workflow("gated", gated_workflow()).await;

    let clock = ManualClock::at(t0());
    let scheduler = Scheduler::with_clock(runtime.clone(), clock.clone());
    scheduler
        .create(minute_schedule("s2", OverlapPolicy::BufferOne))
        .await
        .unwrap();

    // First firing at +60.
    clock.set(t0() + chrono::Duration::seconds(60));
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let first = firings_of(&store, "s2-").await;
    assert_eq!(first.len(), 1);

    // Two more boundaries elapse while the first firing runs: one is
    // buffered, the other dropped.
    clock.set(t0() + chrono::Duration::seconds(120));
    scheduler.tick().await;
    clock.set(t0() + chrono::Duration::seconds(180));
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(firings_of(&store, "s2-").await.len(), 1);

    // Complete the first firing; the buffered one starts on the next tick.
    runtime.signal(&first[0], "done", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    clock.set(t0() + chrono::Duration::seconds(181));
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let ids = firings_of(&store, "s2-").await;
    assert_eq!(ids.len(), 2);
    // The buffered firing keeps its original fire time in the id.
    assert!(ids.iter().any(|id| id.ends_with("T120200Z")), "ids: {ids:?}");
}

#[tokio::test]
async fn allow_all_policy_starts_every_firing() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let runtime = WorkflowRuntime::new(store.clone(), worker_with(vec![]));
    runtime.register_workflow("gated", gated_workflow()).await;

    let clock = ManualClock::at(t0());
    let scheduler = Scheduler::with_clock(runtime.clone(), clock.clone());
    scheduler
        .create(minute_schedule("s3", OverlapPolicy::AllowAll))
        .await
        .unwrap();

    for boundary in [60, 120, 180] {
        clock.set(t0() + chrono::Duration::seconds(boundary));
        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(firings_of(&store, "s3-").await.len(), 3);
}

#[tokio::test]
async fn paused_schedules_do_not_fire_and_unpause_resumes() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let runtime = WorkflowRuntime::new(store.clone(), worker_with(vec![]));
    runtime.register_workflow("gated", gated_workflow()).await;

    let clock = ManualClock::at(t0());
    let scheduler = Scheduler::with_clock(runtime.clone(), clock.clone());
    scheduler
        .create(minute_schedule("s4", OverlapPolicy::Skip))
        .await
        .unwrap();

    scheduler.pause("s4").await.unwrap();
    clock.set(t0() + chrono::Duration::seconds(120));
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(firings_of(&store, "s4-").await.is_empty());

    // Unpausing does not backfill missed boundaries.
    scheduler.unpause("s4").await.unwrap();
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(firings_of(&store, "s4-").await.is_empty());

    clock.set(t0() + chrono::Duration::seconds(180));
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(firings_of(&store, "s4-").await.len(), 1);
}

#[tokio::test]
async fn duplicate_schedule_ids_conflict() {
    let runtime = WorkflowRuntime::new(Arc::new(InMemoryHistoryStore::new()), worker_with(vec![]));
    let scheduler = Scheduler::new(runtime);
    scheduler
        .create(minute_schedule("dup", OverlapPolicy::Skip))
        .await
        .unwrap();
    let err = scheduler
        .create(minute_schedule("dup", OverlapPolicy::Skip))
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::AlreadyExists { .. }));
}

#[tokio::test]
async fn shorthand_schedules_fire_daily() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let runtime = WorkflowRuntime::new(store.clone(), worker_with(vec![]));
    runtime.register_workflow("gated", gated_workflow()).await;

    let clock = ManualClock::at(t0());
    let scheduler = Scheduler::with_clock(runtime.clone(), clock.clone());
    scheduler
        .create(Schedule {
            id: "daily".into(),
            spec: ScheduleSpec::parse("13:30").unwrap(),
            workflow_type: "gated".into(),
            input_template: json!({"brand": "pomandi"}),
            paused: false,
            note: "daily posting".into(),
            overlap: OverlapPolicy::Skip,
        })
        .await
        .unwrap();

    clock.set(Utc.with_ymd_and_hms(2025, 3, 1, 13, 30, 0).unwrap());
    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let ids = firings_of(&store, "daily-").await;
    assert_eq!(ids.len(), 1);
    assert!(ids[0].contains("20250301T133000Z"));
}
