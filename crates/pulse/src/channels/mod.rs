//! Delivery channels.
//!
//! This module provides the independent ways a notification reaches the user:
//! - In-app toasts (a read projection over the queue)
//! - System-level notifications through a platform API
//! - Audio cues
//!
//! The persisted history log lives in [`crate::history`].

mod sound;
mod system;
mod toast;

pub use sound::{AudioBackend, SilentAudio, SoundChannel, SoundHandle};
pub use system::{NotificationPlatform, PermissionState, SystemChannel, UnsupportedPlatform};
pub use toast::ToastSurface;

use async_trait::async_trait;

use crate::Result;
use crate::notification::Notification;

/// Trait for side-effecting delivery channels.
///
/// Errors returned from `send` are logged by the caller and never stop
/// delivery through the remaining channels.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Deliver a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Which optional channels a notification should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSet {
    pub system: bool,
    pub sound: bool,
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self {
            system: true,
            sound: true,
        }
    }
}

impl ChannelSet {
    pub fn allows(&self, channel_type: &str) -> bool {
        match channel_type {
            system::CHANNEL_TYPE => self.system,
            sound::CHANNEL_TYPE => self.sound,
            _ => true,
        }
    }
}
