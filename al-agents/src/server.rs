//! HTTP status and trigger facade.
//!
//! A thin axum surface over the runtime, scheduler and memory layer.
//! Retries and replays are invisible here: only final outcomes surface,
//! and error kinds map onto status codes through
//! [`ErrorKind::http_status`](agentloom::error::ErrorKind::http_status).

use std::sync::Arc;

use agentloom::error::PlatformError;
use agentloom::workflow::{Schedule, ScheduleError, Scheduler, StartOptions, WorkflowRuntime};
use al_memory::SemanticMemory;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};

pub struct AppState {
    pub runtime: Arc<WorkflowRuntime>,
    pub scheduler: Arc<Scheduler>,
    pub memory: Arc<SemanticMemory>,
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/actors/status", get(actors_status))
        // One path template: POST interprets the segment as a workflow
        // type, GET as a workflow id.
        .route("/workflows/{id}", post(start_workflow).get(get_workflow))
        .route("/workflows/{id}/cancel", post(cancel_workflow))
        .route("/schedules", get(list_schedules))
        .route("/schedules/{id}/pause", post(pause_schedule))
        .route("/schedules/{id}/unpause", post(unpause_schedule))
        .with_state(state)
}

fn error_response(error: &PlatformError) -> Response {
    let status = StatusCode::from_u16(error.kind.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({
            "error": error.kind.as_str(),
            "message": error.message,
        })),
    )
        .into_response()
}

fn schedule_error_response(error: &ScheduleError) -> Response {
    let status = match error {
        ScheduleError::AlreadyExists { .. } => StatusCode::CONFLICT,
        ScheduleError::NotFound { .. } => StatusCode::NOT_FOUND,
        ScheduleError::NeverFires { .. } => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(json!({"error": "schedule", "message": error.to_string()})),
    )
        .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn actors_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let now = Utc::now().to_rfc3339();
    let store_healthy = state.memory.store_healthy().await;
    let cache_status = match state.memory.cache_healthy() {
        Some(true) => "healthy",
        Some(false) => "down",
        None => "degraded",
    };
    let running = state.runtime.running_count().await;

    let actor = |name: &str, status: &str| {
        json!({
            "name": name,
            "status": status,
            "last_activity": now,
        })
    };
    Json(json!({
        "actors": [
            actor("memory", if store_healthy { "healthy" } else { "degraded" }),
            actor(
                "workflow_runtime",
                if running < 1024 { "healthy" } else { "degraded" },
            ),
            actor("embedding_provider", "healthy"),
            actor(
                "vector_store",
                if store_healthy { "healthy" } else { "down" },
            ),
            actor("cache", cache_status),
        ],
        "updated_at": now,
    }))
}

async fn start_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_type): Path<String>,
    Json(input): Json<Value>,
) -> Response {
    match state
        .runtime
        .start_workflow(&workflow_type, input, StartOptions::default())
        .await
    {
        Ok(started) => Json(json!({
            "workflow_id": started.workflow_id,
            "run_id": started.run_id,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.runtime.describe(&id).await {
        Ok(description) => Json(json!({
            "workflow_id": description.workflow_id,
            "run_id": description.run_id,
            "workflow_type": description.workflow_type,
            "status": description.status.as_str(),
            "history_summary": description.history_summary,
            "state": description.published_state,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn cancel_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let cancelled = state.runtime.cancel(&id).await;
    Json(json!({"cancelled": cancelled}))
}

fn schedule_view(schedule: &Schedule) -> Value {
    json!({
        "id": schedule.id,
        "spec": schedule.spec.source(),
        "workflow_type": schedule.workflow_type,
        "paused": schedule.paused,
        "note": schedule.note,
    })
}

async fn list_schedules(State(state): State<Arc<AppState>>) -> Json<Value> {
    let schedules = state.scheduler.list().await;
    Json(json!(schedules.iter().map(schedule_view).collect::<Vec<_>>()))
}

async fn pause_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.scheduler.pause(&id).await {
        Ok(()) => Json(json!({"paused": true})).into_response(),
        Err(e) => schedule_error_response(&e),
    }
}

async fn unpause_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.scheduler.unpause(&id).await {
        Ok(()) => Json(json!({"paused": false})).into_response(),
        Err(e) => schedule_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloom::error::ErrorKind;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        for (kind, status) in [
            (ErrorKind::SchemaViolation, 400),
            (ErrorKind::NotFound, 404),
            (ErrorKind::RateLimited, 429),
            (ErrorKind::Internal, 500),
            (ErrorKind::Transient, 503),
        ] {
            let response = error_response(&PlatformError::new(kind, "x"));
            assert_eq!(response.status().as_u16(), status);
        }
    }
}
