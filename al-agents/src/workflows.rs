//! Workflow definitions.
//!
//! Workflow functions are deterministic: they call activities through the
//! context, read time through `ctx.now()`, and never touch memory, the
//! network or the graphs directly. The reasoning graphs run inside the
//! `graph.run` activity; the workflow sees only their recorded final state.

use std::sync::Arc;
use std::time::Duration;

use agentloom::workflow::{ActivityOptions, RetryPolicy, WorkflowFn, WorkflowRuntime};
use serde_json::{json, Value};

/// Activity options for a graph run: one retry, generous close timeout.
fn graph_run_options() -> ActivityOptions {
    ActivityOptions::default()
        .with_start_to_close(Duration::from_secs(180))
        .with_retry(
            RetryPolicy::default()
                .with_max_attempts(2)
                .with_initial_interval(Duration::from_secs(20)),
        )
}

/// `invoice_matcher`: run the matcher graph over `{transaction, invoices}`
/// and report the decision.
#[must_use]
pub fn invoice_matcher_workflow() -> WorkflowFn {
    Arc::new(|ctx, input| {
        Box::pin(async move {
            let final_state = ctx
                .execute_activity_with_options(
                    "graph.run",
                    json!({"graph": "invoice_matcher", "input": input}),
                    graph_run_options(),
                )
                .await?;

            let matched = final_state
                .get("matched_invoice_id")
                .map(|v| !v.is_null())
                .unwrap_or(false);
            let matched_at = if matched {
                Some(ctx.now().await?.to_rfc3339())
            } else {
                None
            };

            let result = json!({
                "success": true,
                "matched": matched,
                "invoice_id": final_state.get("matched_invoice_id"),
                "confidence": final_state.get("confidence"),
                "decision_type": final_state.get("decision_type"),
                "reasoning": final_state.get("reasoning"),
                "warnings": final_state.get("warnings"),
                "steps_completed": final_state.get("steps_completed"),
                "workflow_id": ctx.workflow_id(),
                "run_id": ctx.run_id(),
                "matched_at": matched_at,
            });
            ctx.publish_state(result.clone());

            ctx.execute_activity(
                "report.save",
                json!({
                    "agent_name": "invoice_matcher",
                    "kind": "match_result",
                    "payload": result,
                }),
            )
            .await?;

            Ok(result)
        })
    })
}

/// `feed_publisher`: run the publisher graph for `{brand, platform,
/// photo_key}`. The idempotency key for the publish call derives from the
/// workflow id, so a retried or replayed run cannot double-post.
#[must_use]
pub fn feed_publisher_workflow() -> WorkflowFn {
    Arc::new(|ctx, input| {
        Box::pin(async move {
            let mut graph_input = input.clone();
            if let Value::Object(map) = &mut graph_input {
                map.insert(
                    "idempotency_key".to_string(),
                    json!(format!("{}-publish", ctx.workflow_id())),
                );
            }

            let final_state = ctx
                .execute_activity_with_options(
                    "graph.run",
                    json!({"graph": "feed_publisher", "input": graph_input}),
                    graph_run_options(),
                )
                .await?;

            let result = json!({
                "published": final_state
                    .get("published_at")
                    .map(|v| !v.is_null())
                    .unwrap_or(false),
                "facebook_post_id": final_state.get("facebook_post_id"),
                "instagram_post_id": final_state.get("instagram_post_id"),
                "caption": final_state.get("caption"),
                "quality_score": final_state
                    .get("quality")
                    .and_then(|q| q.get("total")),
                "requires_approval": final_state.get("requires_approval"),
                "rejection_reason": final_state.get("rejection_reason"),
                "duplicate_detected": final_state.get("duplicate_detected"),
                "warnings": final_state.get("warnings"),
                "steps_completed": final_state.get("steps_completed"),
                "workflow_id": ctx.workflow_id(),
                "run_id": ctx.run_id(),
            });
            ctx.publish_state(result.clone());

            ctx.execute_activity(
                "report.save",
                json!({
                    "agent_name": "feed_publisher",
                    "kind": "publish_result",
                    "payload": result,
                }),
            )
            .await?;

            Ok(result)
        })
    })
}

/// Register every workflow type with the runtime.
pub async fn register_all(runtime: &WorkflowRuntime) {
    runtime
        .register_workflow("invoice_matcher", invoice_matcher_workflow())
        .await;
    runtime
        .register_workflow("feed_publisher", feed_publisher_workflow())
        .await;
}
