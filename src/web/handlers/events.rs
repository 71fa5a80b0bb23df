//! Live progress delivery: WebSocket rooms and a per-task SSE stream.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, ProgressEvent, ServerMessage, PROGRESS_EVENT};
use crate::schedule::{Subscription, TaskRegistry};
use crate::AppContext;

pub fn events_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/tasks/:task_id/events", get(stream_task))
        .with_state(ctx)
}

/// Snapshot first, then every transition until the terminal one.
///
/// A lagging subscriber is resynced from a fresh snapshot instead of
/// replaying what it missed.
fn task_events(
    task_id: String,
    subscription: Subscription,
    registry: Arc<TaskRegistry>,
) -> impl Stream<Item = ProgressEvent> {
    async_stream::stream! {
        let Subscription { snapshot, mut receiver } = subscription;
        let mut finished = snapshot.is_terminal();
        yield snapshot;

        while !finished {
            match receiver.recv().await {
                Ok(event) => {
                    finished = event.is_terminal();
                    yield event;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(task_id = %task_id, skipped, "Subscriber lagged, resyncing");
                    match registry.subscribe(&task_id).await {
                        Some(fresh) => {
                            receiver = fresh.receiver;
                            finished = fresh.snapshot.is_terminal();
                            yield fresh.snapshot;
                        }
                        None => finished = true,
                    }
                }
                Err(RecvError::Closed) => finished = true,
            }
        }
    }
}

// ---- SSE ----

pub async fn stream_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Response {
    let Some(subscription) = ctx.registry.subscribe(&task_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("task {} not found", task_id) })),
        )
            .into_response();
    };

    info!(task_id = %task_id, "SSE subscriber attached");
    let stream = task_events(task_id, subscription, ctx.registry.clone()).map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().event(PROGRESS_EVENT).data(json))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ---- WebSocket ----

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<AppContext>) {
    let (mut sink, mut stream) = socket.split();

    // 所有房间共用一个写端
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode server message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut rooms: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Join { task_id }) => {
                    if let Some(previous) = rooms.remove(&task_id) {
                        previous.abort();
                    }
                    match ctx.registry.subscribe(&task_id).await {
                        Some(subscription) => {
                            debug!(task_id = %task_id, "Client joined task room");
                            let forwarder = tokio::spawn(forward_room(
                                task_id.clone(),
                                subscription,
                                ctx.registry.clone(),
                                tx.clone(),
                            ));
                            rooms.insert(task_id, forwarder);
                        }
                        None => {
                            let _ = tx.send(ServerMessage::Error {
                                message: format!("task {} not found", task_id),
                                task_id: Some(task_id),
                            });
                        }
                    }
                }
                Ok(ClientMessage::Leave { task_id }) => {
                    if let Some(room) = rooms.remove(&task_id) {
                        debug!(task_id = %task_id, "Client left task room");
                        room.abort();
                    }
                }
                Err(e) => {
                    let _ = tx.send(ServerMessage::Error {
                        task_id: None,
                        message: format!("invalid message: {}", e),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    for (_, room) in rooms.drain() {
        room.abort();
    }
    writer.abort();
    debug!("WebSocket client disconnected");
}

async fn forward_room(
    task_id: String,
    subscription: Subscription,
    registry: Arc<TaskRegistry>,
    tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let events = task_events(task_id, subscription, registry);
    futures_util::pin_mut!(events);
    while let Some(event) = events.next().await {
        if tx.send(ServerMessage::ProgressUpdate(event)).is_err() {
            break;
        }
    }
}
