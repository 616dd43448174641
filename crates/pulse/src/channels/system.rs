//! System-level notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::DeliveryChannel;
use crate::notification::Notification;
use crate::{Error, Result};

pub(super) const CHANNEL_TYPE: &str = "system";

/// Platform notification API.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    /// Whether the host can show system notifications at all.
    fn is_supported(&self) -> bool;

    /// Ask the user for permission. Resolves to the grant.
    async fn request_permission(&self) -> Result<bool>;

    /// Show a notification. A notification shown with a `tag` that is still
    /// on screen replaces it.
    async fn show(&self, tag: &str, notification: &Notification) -> Result<()>;

    /// Close the notification shown under `tag`, if any.
    async fn close(&self, tag: &str) -> Result<()>;
}

/// Platform for hosts without system notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPlatform;

#[async_trait]
impl NotificationPlatform for UnsupportedPlatform {
    fn is_supported(&self) -> bool {
        false
    }

    async fn request_permission(&self) -> Result<bool> {
        Ok(false)
    }

    async fn show(&self, _tag: &str, _notification: &Notification) -> Result<()> {
        Err(Error::permission("system notifications are not supported"))
    }

    async fn close(&self, _tag: &str) -> Result<()> {
        Ok(())
    }
}

/// Cached permission grant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PermissionState {
    /// Not asked yet.
    #[default]
    Unknown,
    Granted,
    Denied,
    Unsupported,
}

/// Delivers notifications through a [`NotificationPlatform`].
///
/// Permission is requested lazily on first use and cached for the session;
/// once denied the channel disables itself and is never re-prompted
/// automatically. Each notification is shown under its id as tag and closed
/// again after its `duration_ms`.
pub struct SystemChannel {
    platform: Arc<dyn NotificationPlatform>,
    enabled: bool,
    permission: RwLock<PermissionState>,
    /// Serializes permission prompts so concurrent sends ask only once.
    prompt: tokio::sync::Mutex<()>,
    close_timers: Arc<DashMap<String, (u64, JoinHandle<()>)>>,
    next_timer: AtomicU64,
}

impl SystemChannel {
    pub fn new(platform: Arc<dyn NotificationPlatform>, enabled: bool) -> Self {
        let permission = if platform.is_supported() {
            PermissionState::Unknown
        } else {
            PermissionState::Unsupported
        };
        Self {
            platform,
            enabled,
            permission: RwLock::new(permission),
            prompt: tokio::sync::Mutex::new(()),
            close_timers: Arc::new(DashMap::new()),
            next_timer: AtomicU64::new(0),
        }
    }

    pub fn permission(&self) -> PermissionState {
        *self.permission.read()
    }

    /// Explicitly ask for permission. Unlike the lazy path this prompts again
    /// after a previous denial.
    pub async fn request_permission(&self) -> bool {
        let _prompt = self.prompt.lock().await;
        match self.permission() {
            PermissionState::Granted => return true,
            PermissionState::Unsupported => return false,
            PermissionState::Unknown | PermissionState::Denied => {}
        }
        self.prompt_user().await
    }

    /// Resolve the permission, prompting only if never asked.
    async fn ensure_permission(&self) -> bool {
        match self.permission() {
            PermissionState::Granted => return true,
            PermissionState::Denied | PermissionState::Unsupported => return false,
            PermissionState::Unknown => {}
        }
        let _prompt = self.prompt.lock().await;
        // Another send may have prompted while we waited.
        match self.permission() {
            PermissionState::Granted => true,
            PermissionState::Unknown => self.prompt_user().await,
            _ => false,
        }
    }

    async fn prompt_user(&self) -> bool {
        let granted = match self.platform.request_permission().await {
            Ok(granted) => granted,
            Err(e) => {
                warn!("System notification permission request failed: {}", e);
                false
            }
        };
        let state = if granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        info!(permission = %state, "System notification permission resolved");
        *self.permission.write() = state;
        granted
    }

    fn schedule_close(&self, tag: String, after: Duration) {
        let seq = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let platform = self.platform.clone();
        let timers = self.close_timers.clone();
        let timer_tag = tag.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Err(e) = platform.close(&timer_tag).await {
                debug!(tag = %timer_tag, "Failed to close system notification: {}", e);
            }
            timers.remove_if(&timer_tag, |_, (s, _)| *s == seq);
        });
        if let Some((_, (_, previous))) = self.close_timers.remove(&tag) {
            previous.abort();
        }
        self.close_timers.insert(tag, (seq, handle));
    }

    /// Number of shown notifications still waiting to auto-close.
    pub fn pending_closes(&self) -> usize {
        self.close_timers.len()
    }
}

#[async_trait]
impl DeliveryChannel for SystemChannel {
    fn channel_type(&self) -> &'static str {
        CHANNEL_TYPE
    }

    fn is_enabled(&self) -> bool {
        self.enabled
            && !matches!(
                self.permission(),
                PermissionState::Denied | PermissionState::Unsupported
            )
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        if !self.enabled || !self.ensure_permission().await {
            debug!(id = notification.id, "System notification skipped");
            return Ok(());
        }

        let tag = notification.id.to_string();
        self.platform.show(&tag, notification).await?;
        if notification.duration_ms > 0 {
            self.schedule_close(tag, Duration::from_millis(notification.duration_ms));
        }
        Ok(())
    }
}

impl Drop for SystemChannel {
    fn drop(&mut self) {
        for entry in self.close_timers.iter() {
            entry.value().1.abort();
        }
    }
}
