use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::AppContext;

pub fn tasks_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/tasks/:task_id", get(get_task))
        .route("/health", get(health))
        .with_state(ctx)
}

// Latest known state, same shape as a progress event
async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match ctx.registry.snapshot(&task_id).await {
        Some(event) => (StatusCode::OK, Json(json!(event))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("task {} not found", task_id) })),
        ),
    }
}

async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let stats = ctx.registry.stats().await;
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "running_jobs": ctx.scheduler.running_jobs(),
        "tasks": stats,
    }))
}
