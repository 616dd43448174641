//! Engine error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the notification engine.
///
/// Delivery-channel failures never reach callers of the public service
/// surface; they are logged and swallowed so other channels still deliver.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or caller input rejected up front (never retried).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Transient transport failure (network drop, server unavailable, stale stream).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed payload on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the stream manager should schedule a reconnect after this error.
    ///
    /// Client errors from the stream endpoint (bad subscriber, auth) are
    /// permanent, except request timeout and rate limiting.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io(_) => true,
            Self::Http(e) => {
                if e.is_builder() {
                    return false;
                }
                match e.status() {
                    Some(status) if status.is_client_error() => {
                        matches!(status.as_u16(), 408 | 429)
                    }
                    _ => true,
                }
            }
            _ => false,
        }
    }
}
