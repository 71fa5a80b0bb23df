use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ChannelSignal, ProgressChannel, Transport};
use crate::client::error::ChannelError;
use crate::protocol::{ClientMessage, ServerMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push channel over `GET /ws`, subscribed with a `join` message.
pub struct WebSocketChannel {
    url: reqwest::Url,
    socket: Option<Socket>,
    task_id: Option<String>,
}

impl WebSocketChannel {
    /// `http(s)://host/base/` becomes `ws(s)://host/base/ws`.
    pub fn new(server_url: &reqwest::Url) -> Result<Self, ChannelError> {
        let mut url = server_url
            .join("ws")
            .map_err(|e| ChannelError::Address(e.to_string()))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ChannelError::Address(format!("cannot use {} for websockets", server_url)))?;

        Ok(Self {
            url,
            socket: None,
            task_id: None,
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    async fn release(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!("WebSocket close failed: {}", e);
            }
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), ChannelError> {
        let text = serde_json::to_string(message).map_err(|e| ChannelError::Send(e.to_string()))?;
        match self.socket.as_mut() {
            Some(socket) => socket
                .send(Message::Text(text))
                .await
                .map_err(|e| ChannelError::Send(e.to_string())),
            None => Err(ChannelError::Send("socket is not open".to_string())),
        }
    }
}

#[async_trait]
impl ProgressChannel for WebSocketChannel {
    async fn subscribe(&mut self, task_id: &str) -> Result<(), ChannelError> {
        self.release().await;
        self.task_id = None;

        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        self.socket = Some(socket);

        if let Err(e) = self
            .send(&ClientMessage::Join {
                task_id: task_id.to_string(),
            })
            .await
        {
            self.socket = None;
            return Err(e);
        }

        info!(task_id, url = %self.url, "Joined task room");
        self.task_id = Some(task_id.to_string());
        Ok(())
    }

    async fn next_signal(&mut self) -> ChannelSignal {
        loop {
            let frame = match self.socket.as_mut() {
                Some(socket) => socket.next().await,
                None => return ChannelSignal::Closed,
            };

            match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::ProgressUpdate(event)) => {
                        if self.task_id.as_deref() != Some(event.task_id.as_str()) {
                            debug!(task_id = %event.task_id, "Dropping event for another task");
                            continue;
                        }
                        if event.is_terminal() {
                            // the stream for this task is finished
                            self.release().await;
                        }
                        return ChannelSignal::Event(event);
                    }
                    Ok(ServerMessage::Error { task_id, message }) => {
                        if task_id.is_some() && task_id != self.task_id {
                            continue;
                        }
                        self.release().await;
                        return ChannelSignal::Rejected(message);
                    }
                    Err(e) => {
                        warn!("Ignoring malformed server message: {}", e);
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    self.socket = None;
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "server closed the connection".to_string());
                    return ChannelSignal::ConnectionLost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.socket = None;
                    return ChannelSignal::ConnectionLost(e.to_string());
                }
                None => {
                    self.socket = None;
                    return ChannelSignal::ConnectionLost("connection closed".to_string());
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(task_id) = self.task_id.take() {
            if self.socket.is_some() {
                let _ = self.send(&ClientMessage::Leave { task_id }).await;
            }
        }
        self.release().await;
    }

    fn subscribed_task(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    fn transport(&self) -> Transport {
        Transport::WebSocket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_from_server_url() {
        let http = reqwest::Url::parse("http://127.0.0.1:5000").unwrap();
        assert_eq!(WebSocketChannel::new(&http).unwrap().url().as_str(), "ws://127.0.0.1:5000/ws");

        let https = reqwest::Url::parse("https://example.com/app/").unwrap();
        assert_eq!(
            WebSocketChannel::new(&https).unwrap().url().as_str(),
            "wss://example.com/app/ws"
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_without_connection() {
        let url = reqwest::Url::parse("http://127.0.0.1:5000").unwrap();
        let mut channel = WebSocketChannel::new(&url).unwrap();
        channel.close().await;
        channel.close().await;
        assert_eq!(channel.next_signal().await, ChannelSignal::Closed);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let url = reqwest::Url::parse("http://127.0.0.1:9").unwrap();
        let mut channel = WebSocketChannel::new(&url).unwrap();
        let err = channel.subscribe("t1").await.unwrap_err();
        assert!(matches!(err, ChannelError::Connect(_)));
        assert!(channel.subscribed_task().is_none());
    }
}
