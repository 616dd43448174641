//! Connection health tracking.
//!
//! [`ConnectionTracker`] is a pure state holder driven by discrete
//! transitions. Only the transitions listed on
//! [`ConnectionStatus::can_transition_to`] are accepted; anything else is
//! rejected with [`Error::InvalidStateTransition`] and leaves the state
//! untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Status of the push connection.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Error)
                | (Error, Connecting)
                | (Connected, Disconnected)
                | (Connecting, Disconnected)
                | (Error, Disconnected)
        )
    }
}

/// Point-in-time view of the connection, as handed to presentation code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_connected: Option<DateTime<Utc>>,
    pub connection_attempts: u32,
    pub latency_ms: Option<u64>,
    pub uptime_ms: Option<u64>,
    pub total_connections: u64,
    pub error_message: Option<String>,
}

/// Mutable connection health state. Owned by the stream manager.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    status: ConnectionStatus,
    last_connected: Option<DateTime<Utc>>,
    connection_attempts: u32,
    latency_ms: Option<u64>,
    total_connections: u64,
    error_message: Option<String>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn connection_attempts(&self) -> u32 {
        self.connection_attempts
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections
    }

    fn transition(&mut self, next: ConnectionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::invalid_transition(self.status, next));
        }
        self.status = next;
        Ok(())
    }

    /// `disconnected|error → connecting`.
    pub fn begin_connect(&mut self) -> Result<()> {
        self.transition(ConnectionStatus::Connecting)
    }

    /// `connecting → connected`. Resets the failure counter and counts the
    /// connection.
    pub fn mark_open(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(ConnectionStatus::Connected)?;
        self.last_connected = Some(now);
        self.total_connections += 1;
        self.connection_attempts = 0;
        self.error_message = None;
        Ok(())
    }

    /// `connecting|connected → error`. Returns the updated failure count.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<u32> {
        self.transition(ConnectionStatus::Error)?;
        self.connection_attempts = self.connection_attempts.saturating_add(1);
        self.error_message = Some(message.into());
        Ok(self.connection_attempts)
    }

    /// `connected|connecting|error → disconnected`.
    ///
    /// Returns `false` when already disconnected; repeated disconnects are
    /// no-ops rather than invalid transitions.
    pub fn mark_disconnected(&mut self) -> Result<bool> {
        if self.status == ConnectionStatus::Disconnected {
            return Ok(false);
        }
        self.transition(ConnectionStatus::Disconnected)?;
        self.error_message = None;
        Ok(true)
    }

    /// Store an externally measured round-trip latency.
    pub fn record_latency(&mut self, latency_ms: u64) {
        self.latency_ms = Some(latency_ms);
    }

    /// Health read. `uptime_ms` is derived from `now` while connected.
    pub fn snapshot(&self, now: DateTime<Utc>) -> ConnectionState {
        let uptime_ms = match (self.status, self.last_connected) {
            (ConnectionStatus::Connected, Some(since)) => {
                Some(now.signed_duration_since(since).num_milliseconds().max(0) as u64)
            }
            _ => None,
        };

        ConnectionState {
            status: self.status,
            last_connected: self.last_connected,
            connection_attempts: self.connection_attempts,
            latency_ms: self.latency_ms,
            uptime_ms,
            total_connections: self.total_connections,
            error_message: self.error_message.clone(),
        }
    }
}
