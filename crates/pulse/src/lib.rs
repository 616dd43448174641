//! Pulse: real-time notification delivery engine.
//!
//! This crate keeps a live server-pushed event stream open, survives network
//! interruption with bounded exponential-backoff reconnection, and fans the
//! routed events out to independent delivery channels.
//!
//! ## Core Types
//!
//! - [`NotificationService`] - Composition root and public surface
//! - [`Notification`] - Immutable delivery request
//! - [`EngineConfig`] - Engine configuration with serde defaults
//!
//! ## Connection
//!
//! - [`StreamManager`] - Owns the push connection and its reconnect loop
//! - [`ConnectionTracker`] - Connection state machine and health metrics
//! - [`SseTransport`] - Server-sent events over HTTP
//!
//! ## Delivery
//!
//! - [`NotificationQueue`] - Bounded queue of visible notifications
//! - [`EventDispatcher`] - Routes wire events against delivery settings
//! - [`SystemChannel`], [`SoundChannel`], [`ToastSurface`] - Delivery channels
//! - [`HistoryLog`] - Persisted notification history

pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod history;
pub mod http_client;
pub mod notification;
pub mod queue;
pub mod service;
pub mod settings;
pub mod store;
pub mod stream;

pub use channels::{
    AudioBackend, DeliveryChannel, NotificationPlatform, PermissionState, SoundChannel,
    SoundHandle, SystemChannel, ToastSurface,
};
pub use config::{DurationDefaults, EngineConfig};
pub use dispatcher::{Dispatch, EventDispatcher, RouteSpec, RoutingTable, SuppressReason};
pub use error::{Error, Result};
pub use health::{ConnectionState, ConnectionStatus, ConnectionTracker};
pub use history::{HistoryFilter, HistoryLog, HistoryStats};
pub use notification::{
    HistoricalNotification, Notification, NotificationAction, NotificationId,
    NotificationPriority, NotificationRequest,
};
pub use queue::{DismissReason, NotificationQueue, QueueEvent, QueueStats};
pub use service::{NotificationService, ServiceDeps};
pub use settings::{DeliverySettings, InMemorySettings, PersistedSettings, SettingsStore};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use stream::{
    ConnectionEvent, EventSink, EventTransport, SseTransport, SseTransportConfig, StreamManager,
    WireEvent,
};
