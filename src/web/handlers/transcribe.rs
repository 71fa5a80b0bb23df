use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::protocol::{AcceptResponse, TranscribeRequest};
use crate::AppContext;

pub const INVALID_URL: &str = "invalid url";
pub const RATE_LIMITED: &str = "rate limit exceeded";

pub fn transcribe_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/transcribe", post(transcribe))
        .with_state(ctx)
}

/// Accepts a job and answers with its id right away; progress is only
/// delivered on the event stream.
pub async fn transcribe(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<TranscribeRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            warn!("Malformed transcribe request: {}", e);
            return (StatusCode::BAD_REQUEST, Json(AcceptResponse::rejected(INVALID_URL)));
        }
    };

    let source = match validate_source(&req.video_url) {
        Some(source) => source,
        None => {
            info!("Rejecting submission {:?}", req.video_url);
            return (StatusCode::BAD_REQUEST, Json(AcceptResponse::rejected(INVALID_URL)));
        }
    };

    if ctx.limiter.check().is_err() {
        warn!("Submission rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(AcceptResponse::rejected(RATE_LIMITED)),
        );
    }

    let task = ctx.scheduler.accept(source.as_str()).await;
    (StatusCode::ACCEPTED, Json(AcceptResponse::accepted(task.id)))
}

/// Only absolute http(s) locators with a host are accepted.
fn validate_source(raw: &str) -> Option<reqwest::Url> {
    let url = reqwest::Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}
