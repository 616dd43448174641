//! Push-stream connection handling.

pub mod event;
pub mod manager;
pub mod sse;
pub mod transport;

pub use event::WireEvent;
pub use manager::{ConnectionEvent, EventSink, StreamManager};
pub use sse::{SseDecoder, SseFrame, SseTransport, SseTransportConfig};
pub use transport::{EventStream, EventTransport, TransportFrame, validate_subscriber_id};
