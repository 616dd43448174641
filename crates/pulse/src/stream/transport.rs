//! Transport seam between the stream manager and the event source.

use async_trait::async_trait;

use crate::{Error, Result};

const MAX_SUBSCRIBER_ID_LEN: usize = 128;

/// One unit read from an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// A complete message body, to be parsed as a wire event.
    Message(String),
    /// Traffic with no event in it (keepalive comment, heartbeat frame).
    KeepAlive,
}

/// Opens push connections for a subscriber.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Short transport name for logs (e.g. "sse").
    fn name(&self) -> &'static str;

    /// Open the stream for `subscriber_id`. Resolves once the transport is
    /// open and ready to deliver events.
    async fn open(&self, subscriber_id: &str) -> Result<Box<dyn EventStream>>;
}

/// A live push connection.
#[async_trait]
pub trait EventStream: Send {
    /// Next frame. `None` means the peer closed the stream.
    async fn next_frame(&mut self) -> Option<Result<TransportFrame>>;

    /// Close the stream. Must be safe to call more than once.
    async fn close(&mut self) {}
}

/// Reject subscriber ids that cannot be used as a single path segment.
pub fn validate_subscriber_id(subscriber_id: &str) -> Result<()> {
    if subscriber_id.is_empty() {
        return Err(Error::config("subscriber id must not be empty"));
    }
    if subscriber_id.len() > MAX_SUBSCRIBER_ID_LEN {
        return Err(Error::config(format!(
            "subscriber id exceeds {MAX_SUBSCRIBER_ID_LEN} characters"
        )));
    }
    if let Some(c) = subscriber_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+')))
    {
        return Err(Error::config(format!(
            "subscriber id contains invalid character {c:?}"
        )));
    }
    if subscriber_id.chars().all(|c| c == '.') {
        return Err(Error::config("subscriber id must not be a relative path"));
    }
    Ok(())
}
