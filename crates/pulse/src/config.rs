//! Engine configuration.
//!
//! Field names are snake_case; the camelCase names used by browser-side
//! callers (`maxToasts`, `reconnectDelay`, ...) are accepted as aliases.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::RouteSpec;
use crate::notification::NotificationPriority;
use crate::{Error, Result};

/// Configuration for the notification engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of concurrently visible notifications.
    #[serde(
        default = "default_max_visible",
        alias = "max_toasts",
        alias = "maxToasts",
        alias = "maxVisible"
    )]
    pub max_visible: usize,
    /// Gates the audio channel.
    #[serde(default = "default_true", alias = "enableSounds")]
    pub enable_sounds: bool,
    /// Gates the system-level notification channel.
    #[serde(
        default = "default_true",
        alias = "enable_browser_notifications",
        alias = "enableBrowserNotifications"
    )]
    pub enable_system_notifications: bool,
    #[serde(default = "default_true", alias = "autoReconnect")]
    pub auto_reconnect: bool,
    #[serde(
        default = "default_max_reconnect_attempts",
        alias = "maxReconnectAttempts"
    )]
    pub max_reconnect_attempts: u32,
    /// Base backoff unit in milliseconds.
    #[serde(
        default = "default_reconnect_delay_ms",
        alias = "reconnect_delay",
        alias = "reconnectDelay"
    )]
    pub reconnect_delay_ms: u64,
    /// Pause between teardown and reopen on a manual reconnect.
    #[serde(default = "default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
    /// A stream silent for this long is treated as failed. 0 disables the check.
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
    #[serde(default = "default_max_history", alias = "maxHistory")]
    pub max_history: usize,
    /// Default time-to-live per priority.
    #[serde(default)]
    pub durations: DurationDefaults,
    /// Sound resource per notification type.
    #[serde(default = "default_sounds")]
    pub sounds: BTreeMap<String, String>,
    /// Route overrides and additions, keyed by wire event type.
    #[serde(default)]
    pub routes: BTreeMap<String, RouteSpec>,
}

fn default_max_visible() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_reconnect_grace_ms() -> u64 {
    50
}

fn default_stale_timeout_ms() -> u64 {
    45_000
}

fn default_max_history() -> usize {
    100
}

fn default_sounds() -> BTreeMap<String, String> {
    [
        ("email", "sounds/email.wav"),
        ("urgent_email", "sounds/urgent.wav"),
        ("task_due", "sounds/task.wav"),
        ("calendar_reminder", "sounds/reminder.wav"),
        ("file_shared", "sounds/file.wav"),
        ("system", "sounds/system.wav"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_visible: default_max_visible(),
            enable_sounds: default_true(),
            enable_system_notifications: default_true(),
            auto_reconnect: default_true(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_grace_ms: default_reconnect_grace_ms(),
            stale_timeout_ms: default_stale_timeout_ms(),
            max_history: default_max_history(),
            durations: DurationDefaults::default(),
            sounds: default_sounds(),
            routes: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_visible == 0 {
            return Err(Error::config("max_visible must be at least 1"));
        }
        if self.max_history == 0 {
            return Err(Error::config("max_history must be at least 1"));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(Error::config("reconnect_delay_ms must be greater than 0"));
        }
        for (event_type, route) in &self.routes {
            if event_type.trim().is_empty() {
                return Err(Error::config("route event type must not be empty"));
            }
            if route.kind.trim().is_empty() {
                return Err(Error::config(format!(
                    "route '{event_type}' has an empty notification type"
                )));
            }
        }
        Ok(())
    }

    /// Backoff before the next automatic reconnect.
    ///
    /// `failures_before` is the number of consecutive failures that preceded
    /// the one being handled, so the first failure waits exactly one
    /// `reconnect_delay_ms`.
    pub fn reconnect_delay(&self, failures_before: u32) -> Duration {
        let factor = 2u64.saturating_pow(failures_before);
        Duration::from_millis(self.reconnect_delay_ms.saturating_mul(factor))
    }

    /// Whether another automatic attempt is allowed once `attempts` failures
    /// have been counted.
    pub fn should_reconnect(&self, attempts: u32) -> bool {
        self.auto_reconnect && attempts < self.max_reconnect_attempts
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn stale_timeout(&self) -> Option<Duration> {
        (self.stale_timeout_ms > 0).then(|| Duration::from_millis(self.stale_timeout_ms))
    }
}

/// Default notification lifetime in milliseconds.
///
/// A per-type entry wins over the priority default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationDefaults {
    pub low_ms: u64,
    pub normal_ms: u64,
    pub high_ms: u64,
    pub urgent_ms: u64,
    /// Lifetime keyed by notification type.
    #[serde(alias = "byType")]
    pub by_type: BTreeMap<String, u64>,
}

impl Default for DurationDefaults {
    fn default() -> Self {
        Self {
            low_ms: 3000,
            normal_ms: 5000,
            high_ms: 8000,
            urgent_ms: 10_000,
            by_type: BTreeMap::new(),
        }
    }
}

impl DurationDefaults {
    pub fn for_priority(&self, priority: NotificationPriority) -> u64 {
        match priority {
            NotificationPriority::Low => self.low_ms,
            NotificationPriority::Normal => self.normal_ms,
            NotificationPriority::High => self.high_ms,
            NotificationPriority::Urgent => self.urgent_ms,
        }
    }

    /// Lifetime for a notification of `kind` that did not set its own.
    pub fn resolve(&self, kind: &str, priority: NotificationPriority) -> u64 {
        self.by_type
            .get(kind)
            .copied()
            .unwrap_or_else(|| self.for_priority(priority))
    }
}
