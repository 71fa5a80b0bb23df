//! Server→client progress delivery.
//!
//! One trait, two transports: a WebSocket that subscribes by sending a
//! `join` message, and an SSE stream whose address names the task. Both
//! deliver events only for the subscribed id, report connection loss
//! separately from task failure, and close idempotently.

pub mod sse;
pub mod ws;

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;

use super::error::ChannelError;
use crate::protocol::ProgressEvent;

pub use sse::EventStreamChannel;
pub use ws::WebSocketChannel;

/// What a channel yields on each read.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Event(ProgressEvent),
    /// The transport dropped; the task itself may still be running.
    ConnectionLost(String),
    /// The server refused the subscription, resuming is pointless.
    Rejected(String),
    /// No open subscription (never opened, closed, or past its terminal event).
    Closed,
}

#[async_trait]
pub trait ProgressChannel: Send {
    /// Opens a fresh transport for `task_id`, releasing any previous one.
    /// Also used to resume after [`ChannelSignal::ConnectionLost`].
    async fn subscribe(&mut self, task_id: &str) -> Result<(), ChannelError>;

    async fn next_signal(&mut self) -> ChannelSignal;

    /// Releases the transport. Safe to call any number of times.
    async fn close(&mut self);

    fn subscribed_task(&self) -> Option<&str>;

    fn transport(&self) -> Transport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    WebSocket,
    EventStream,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ws" | "websocket" => Ok(Transport::WebSocket),
            "sse" | "eventstream" | "event-stream" => Ok(Transport::EventStream),
            other => Err(format!("unknown transport: {} (expected ws or sse)", other)),
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::WebSocket => f.write_str("ws"),
            Transport::EventStream => f.write_str("sse"),
        }
    }
}

/// Builds the channel selected by configuration.
pub fn open_channel(
    transport: Transport,
    server_url: &reqwest::Url,
) -> Result<Box<dyn ProgressChannel>, ChannelError> {
    Ok(match transport {
        Transport::WebSocket => Box::new(WebSocketChannel::new(server_url)?),
        Transport::EventStream => Box::new(EventStreamChannel::new(server_url)?),
    })
}
