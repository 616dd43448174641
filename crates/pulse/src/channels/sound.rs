//! Audio cues.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use super::DeliveryChannel;
use crate::Result;
use crate::notification::Notification;

pub(super) const CHANNEL_TYPE: &str = "sound";

/// A loaded, replayable sound.
pub trait SoundHandle: Send + Sync {
    /// Reset playback to the start.
    fn rewind(&self) -> Result<()>;

    fn play(&self) -> Result<()>;
}

/// Loads sound resources.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Load `resource`. `Ok(None)` means the resource does not exist.
    async fn load(&self, resource: &str) -> Result<Option<Arc<dyn SoundHandle>>>;
}

/// Backend that has no sounds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAudio;

#[async_trait]
impl AudioBackend for SilentAudio {
    async fn load(&self, _resource: &str) -> Result<Option<Arc<dyn SoundHandle>>> {
        Ok(None)
    }
}

/// Plays a per-type cue for audible notifications.
///
/// Sounds are loaded on first use and cached by notification type, including
/// misses, so a missing resource is looked up once and then silently skipped.
pub struct SoundChannel {
    backend: Arc<dyn AudioBackend>,
    /// Notification type to resource name.
    sounds: BTreeMap<String, String>,
    enabled: bool,
    cache: DashMap<String, Option<Arc<dyn SoundHandle>>>,
}

impl SoundChannel {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        sounds: BTreeMap<String, String>,
        enabled: bool,
    ) -> Self {
        Self {
            backend,
            sounds,
            enabled,
            cache: DashMap::new(),
        }
    }

    /// Number of notification types with a resolved cache entry.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    async fn handle_for(&self, kind: &str) -> Option<Arc<dyn SoundHandle>> {
        if let Some(cached) = self.cache.get(kind) {
            return cached.value().clone();
        }

        let handle = match self.sounds.get(kind) {
            Some(resource) => match self.backend.load(resource).await {
                Ok(Some(handle)) => {
                    debug!(kind, resource = %resource, "Loaded notification sound");
                    Some(handle)
                }
                Ok(None) => {
                    debug!(kind, resource = %resource, "Notification sound not found");
                    None
                }
                Err(e) => {
                    warn!(kind, resource = %resource, "Failed to load notification sound: {}", e);
                    None
                }
            },
            None => None,
        };
        self.cache.insert(kind.to_string(), handle.clone());
        handle
    }
}

#[async_trait]
impl DeliveryChannel for SoundChannel {
    fn channel_type(&self) -> &'static str {
        CHANNEL_TYPE
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        if !self.enabled || !notification.wants_sound() {
            return Ok(());
        }
        let Some(handle) = self.handle_for(&notification.kind).await else {
            trace!(kind = %notification.kind, "No sound for notification type");
            return Ok(());
        };
        handle.rewind()?;
        handle.play()
    }
}
