use axum::Router;
use std::sync::Arc;
use crate::AppContext;

pub mod events;
pub mod tasks;
pub mod transcribe;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .merge(transcribe::transcribe_router(ctx.clone()))
        .merge(events::events_router(ctx.clone()))
        .merge(tasks::tasks_router(ctx))
}
