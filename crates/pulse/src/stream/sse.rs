//! Server-sent events transport.
//!
//! Connects to `<base_url>/<subscriber_id>/stream` with `Accept:
//! text/event-stream` and decodes the response body incrementally. The last
//! seen event id is replayed as `Last-Event-ID` on reconnect so the server
//! can resume where the previous connection stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};
use url::Url;

use super::transport::{EventStream, EventTransport, TransportFrame, validate_subscriber_id};
use crate::http_client::build_stream_client;
use crate::{Error, Result};

const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Longest line, and largest event payload, the decoder will hold.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Configuration for [`SseTransport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SseTransportConfig {
    /// Base URL; the subscriber id and `stream` are appended as path segments.
    pub base_url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl SseTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// [`EventTransport`] over HTTP server-sent events.
pub struct SseTransport {
    client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
    last_event_id: Arc<Mutex<Option<String>>>,
}

impl SseTransport {
    pub fn new(config: SseTransportConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::config(format!("invalid stream URL '{}': {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "stream URL must be an http(s) URL: {}",
                config.base_url
            )));
        }
        let client = build_stream_client(Duration::from_millis(config.connect_timeout_ms))?;
        Ok(Self {
            client,
            base_url,
            bearer_token: config.bearer_token,
            last_event_id: Arc::new(Mutex::new(None)),
        })
    }

    /// Endpoint for a subscriber: `<base>/<subscriber_id>/stream`.
    pub fn endpoint(&self, subscriber_id: &str) -> Result<Url> {
        validate_subscriber_id(subscriber_id)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config("stream URL cannot carry path segments"))?
            .pop_if_empty()
            .push(subscriber_id)
            .push("stream");
        Ok(url)
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }
}

#[async_trait]
impl EventTransport for SseTransport {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn open(&self, subscriber_id: &str) -> Result<Box<dyn EventStream>> {
        let url = self.endpoint(subscriber_id)?;
        info!("Opening event stream: {}", url);

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(token) = &self.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(id) = self.last_event_id() {
            request = request.header(LAST_EVENT_ID, id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(format!("failed to reach event stream: {e}")))?
            .error_for_status()?;

        Ok(Box::new(SseStream {
            body: Some(response.bytes_stream().boxed()),
            decoder: SseDecoder::default(),
            last_event_id: self.last_event_id.clone(),
        }))
    }
}

struct SseStream {
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    decoder: SseDecoder,
    last_event_id: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl EventStream for SseStream {
    async fn next_frame(&mut self) -> Option<Result<TransportFrame>> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Some(Ok(match frame {
                    SseFrame::Event { data, id, .. } => {
                        if let Some(id) = id {
                            *self.last_event_id.lock() = Some(id);
                        }
                        TransportFrame::Message(data)
                    }
                    SseFrame::Comment => TransportFrame::KeepAlive,
                }));
            }

            let body = self.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => {
                    trace!(len = chunk.len(), "Received stream chunk");
                    if let Err(e) = self.decoder.feed(&chunk) {
                        self.body = None;
                        return Some(Err(e));
                    }
                }
                Some(Err(e)) => {
                    self.body = None;
                    return Some(Err(Error::transport(format!("event stream broken: {e}"))));
                }
                None => {
                    debug!("Event stream closed by server");
                    self.body = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        self.body = None;
    }
}

/// A decoded server-sent event block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Event {
        event: Option<String>,
        data: String,
        id: Option<String>,
    },
    /// A `:` comment line, used by servers as keepalive.
    Comment,
}

/// Incremental `text/event-stream` decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the line still waiting for its terminator.
    buffer: Vec<u8>,
    /// A trailing `\r` was consumed; a following `\n` belongs to it.
    pending_cr: bool,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    id: Option<String>,
    ready: std::collections::VecDeque<SseFrame>,
}

impl SseDecoder {
    /// Decode `chunk`. Fails once a line or an event outgrows
    /// [`MAX_EVENT_BYTES`]; the decoder should not be fed again after that.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        let mut chunk = chunk;
        if self.pending_cr {
            self.pending_cr = false;
            if let Some(rest) = chunk.strip_prefix(b"\n") {
                chunk = rest;
            }
        }

        // Only the new bytes are scanned; `buffer` never holds a terminator.
        let mut rest = chunk;
        while let Some(end) = rest.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line = if self.buffer.is_empty() {
                &rest[..end]
            } else {
                self.buffer.extend_from_slice(&rest[..end]);
                self.buffer.as_slice()
            };
            let line = String::from_utf8_lossy(line).into_owned();
            self.buffer.clear();
            self.check_len(line.len())?;
            self.process_line(&line)?;

            let mut next = end + 1;
            if rest[end] == b'\r' {
                match rest.get(next) {
                    Some(b'\n') => next += 1,
                    None => self.pending_cr = true,
                    Some(_) => {}
                }
            }
            rest = &rest[next..];
        }

        self.buffer.extend_from_slice(rest);
        self.check_len(self.buffer.len())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > MAX_EVENT_BYTES {
            return Err(Error::protocol(format!(
                "event stream line exceeds {MAX_EVENT_BYTES} bytes"
            )));
        }
        Ok(())
    }

    pub fn next_frame(&mut self) -> Option<SseFrame> {
        self.ready.pop_front()
    }

    fn process_line(&mut self, line: &str) -> Result<()> {
        if line.is_empty() {
            self.dispatch();
            return Ok(());
        }
        if line.starts_with(':') {
            self.ready.push_back(SseFrame::Comment);
            return Ok(());
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                self.data_len += value.len() + 1;
                if self.data_len > MAX_EVENT_BYTES {
                    return Err(Error::protocol(format!(
                        "event stream event exceeds {MAX_EVENT_BYTES} bytes"
                    )));
                }
                self.data.push(value.to_string());
            }
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            // Reconnect timing is owned by the stream manager.
            "retry" => {}
            _ => trace!(field, "Ignoring unknown SSE field"),
        }
        Ok(())
    }

    fn dispatch(&mut self) {
        let event = self.event.take();
        let id = self.id.take();
        self.data_len = 0;
        if self.data.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        self.ready.push_back(SseFrame::Event { event, data, id });
    }
}
