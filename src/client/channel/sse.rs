use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ChannelSignal, ProgressChannel, Transport};
use crate::client::error::ChannelError;
use crate::protocol::{ProgressEvent, PROGRESS_EVENT};

/// Streamed channel over `GET /tasks/:task_id/events`.
pub struct EventStreamChannel {
    http: reqwest::Client,
    server_url: reqwest::Url,
    body: Option<BoxStream<'static, reqwest::Result<Vec<u8>>>>,
    decoder: SseDecoder,
    pending: VecDeque<ProgressEvent>,
    task_id: Option<String>,
}

impl EventStreamChannel {
    pub fn new(server_url: &reqwest::Url) -> Result<Self, ChannelError> {
        if server_url.cannot_be_a_base() {
            return Err(ChannelError::Address(server_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        Ok(Self {
            http,
            server_url: server_url.clone(),
            body: None,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            task_id: None,
        })
    }

    pub fn events_url(&self, task_id: &str) -> Result<reqwest::Url, ChannelError> {
        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::Address(self.server_url.to_string()))?
            .pop_if_empty()
            .extend(["tasks", task_id, "events"]);
        Ok(url)
    }

    fn release(&mut self) {
        self.body = None;
        self.pending.clear();
        self.decoder = SseDecoder::default();
    }

    fn accept_frame(&mut self, frame: SseFrame) {
        if frame.event.as_deref().map_or(false, |name| name != PROGRESS_EVENT) {
            debug!(event = ?frame.event, "Skipping unrelated SSE event");
            return;
        }
        match serde_json::from_str::<ProgressEvent>(&frame.data) {
            Ok(event) if self.task_id.as_deref() == Some(event.task_id.as_str()) => {
                self.pending.push_back(event)
            }
            Ok(event) => debug!(task_id = %event.task_id, "Dropping event for another task"),
            Err(e) => warn!("Ignoring malformed progress frame: {}", e),
        }
    }
}

#[async_trait]
impl ProgressChannel for EventStreamChannel {
    async fn subscribe(&mut self, task_id: &str) -> Result<(), ChannelError> {
        self.release();
        self.task_id = None;
        let url = self.events_url(task_id)?;

        let response = self
            .http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ChannelError::Unavailable(task_id.to_string())),
            status => {
                return Err(ChannelError::Connect(format!(
                    "unexpected status {} from {}",
                    status, url
                )))
            }
        }

        info!(task_id, url = %url, "Opened event stream");
        self.body = Some(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
        );
        self.task_id = Some(task_id.to_string());
        Ok(())
    }

    async fn next_signal(&mut self) -> ChannelSignal {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    self.release();
                }
                return ChannelSignal::Event(event);
            }

            let chunk = match self.body.as_mut() {
                Some(body) => body.next().await,
                None => return ChannelSignal::Closed,
            };

            match chunk {
                Some(Ok(bytes)) => match self.decoder.push(&bytes) {
                    Ok(frames) => {
                        for frame in frames {
                            self.accept_frame(frame);
                        }
                    }
                    Err(e) => {
                        warn!("Dropping event stream: {}", e);
                        self.release();
                        return ChannelSignal::ConnectionLost(e.to_string());
                    }
                },
                Some(Err(e)) => {
                    self.release();
                    return ChannelSignal::ConnectionLost(e.to_string());
                }
                None => {
                    self.release();
                    return ChannelSignal::ConnectionLost(
                        "event stream ended before the task finished".to_string(),
                    );
                }
            }
        }
    }

    async fn close(&mut self) {
        self.release();
        self.task_id = None;
    }

    fn subscribed_task(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    fn transport(&self) -> Transport {
        Transport::EventStream
    }
}

/// One dispatched `text/event-stream` event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

// progress payloads are tiny, anything this big is not ours
const MAX_EVENT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("event stream line or event exceeds {0} bytes")]
    TooLong(usize),
}

/// Incremental `text/event-stream` parser. Chunks may split lines (and
/// UTF-8 sequences) anywhere.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    /// `limit` bounds both a single unterminated line and one event's data.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, DecodeError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let decoded = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line: &str = decoded.strip_suffix('\r').unwrap_or(&decoded);

            if line.is_empty() {
                if !self.data.is_empty() {
                    frames.push(SseFrame {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                    self.data_len = 0;
                } else {
                    self.event = None;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => {
                    self.data_len += value.len();
                    if self.data_len > self.limit {
                        return Err(DecodeError::TooLong(self.limit));
                    }
                    self.data.push(value.to_string());
                }
                _ => {}
            }
        }

        if self.buffer.len() > self.limit {
            return Err(DecodeError::TooLong(self.limit));
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        let payload = "event: progress_update\ndata: {\"task_id\":\"t1\",\"status\":\"downloading\",\"progress\":10}\n\n";
        let (head, tail) = payload.split_at(31);

        assert!(decoder.push(head.as_bytes()).unwrap().is_empty());
        let frames = decoder.push(tail.as_bytes()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("progress_update"));
        assert!(frames[0].data.contains("\"progress\":10"));
    }

    #[test]
    fn test_decoder_comments_crlf_and_multiline_data() {
        let mut decoder = SseDecoder::default();
        let frames = decoder
            .push(b":keepalive\r\n\r\ndata: a\r\ndata: b\r\n\r\n: ping\n\n")
            .unwrap();
        assert_eq!(
            frames,
            vec![SseFrame {
                event: None,
                data: "a\nb".to_string()
            }]
        );
    }

    #[test]
    fn test_decoder_keeps_utf8_across_chunks() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: héllo\n\n".as_bytes();
        // split inside the two-byte 'é'
        assert!(decoder.push(&bytes[..8]).unwrap().is_empty());
        let frames = decoder.push(&bytes[8..]).unwrap();
        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn test_decoder_bounds_unterminated_input() {
        let mut decoder = SseDecoder::with_limit(16);
        assert!(decoder.push(b"data: 0123456").unwrap().is_empty());
        assert_eq!(decoder.push(b"789abcdef"), Err(DecodeError::TooLong(16)));

        // many short lines without a blank one
        let mut decoder = SseDecoder::with_limit(16);
        assert_eq!(
            decoder.push(b"data: 0123456789\ndata: 0123456789\n"),
            Err(DecodeError::TooLong(16))
        );

        // the budget is per event
        let mut decoder = SseDecoder::with_limit(16);
        for _ in 0..4 {
            assert_eq!(decoder.push(b"data: 0123456789\n\n").unwrap().len(), 1);
        }
    }

    #[test]
    fn test_events_url_escapes_task_id() {
        let base = reqwest::Url::parse("http://127.0.0.1:5000/").unwrap();
        let channel = EventStreamChannel::new(&base).unwrap();
        assert_eq!(
            channel.events_url("task-1").unwrap().as_str(),
            "http://127.0.0.1:5000/tasks/task-1/events"
        );
        assert_eq!(
            channel.events_url("a/b").unwrap().as_str(),
            "http://127.0.0.1:5000/tasks/a%2Fb/events"
        );
    }

    #[test]
    fn test_foreign_and_unrelated_frames_are_dropped() {
        let base = reqwest::Url::parse("http://127.0.0.1:5000/").unwrap();
        let mut channel = EventStreamChannel::new(&base).unwrap();
        channel.task_id = Some("t1".into());

        channel.accept_frame(SseFrame {
            event: Some(PROGRESS_EVENT.into()),
            data: r#"{"task_id":"t2","status":"completed","progress":100}"#.into(),
        });
        channel.accept_frame(SseFrame {
            event: Some("heartbeat".into()),
            data: r#"{"task_id":"t1","status":"completed","progress":100}"#.into(),
        });
        channel.accept_frame(SseFrame {
            event: None,
            data: "not json".into(),
        });
        assert!(channel.pending.is_empty());

        channel.accept_frame(SseFrame {
            event: Some(PROGRESS_EVENT.into()),
            data: r#"{"task_id":"t1","status":"converting","progress":40}"#.into(),
        });
        assert_eq!(channel.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_close_twice() {
        let base = reqwest::Url::parse("http://127.0.0.1:5000/").unwrap();
        let mut channel = EventStreamChannel::new(&base).unwrap();
        channel.close().await;
        channel.close().await;
        assert_eq!(channel.next_signal().await, ChannelSignal::Closed);
    }
}
