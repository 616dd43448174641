//! Delivery settings consulted by the dispatcher.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;
use crate::store::KeyValueStore;

/// Fixed key the settings are persisted under.
pub const SETTINGS_KEY: &str = "notification_settings";

/// User-controlled delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Global switch. When off nothing is delivered from the stream.
    pub enabled: bool,
    pub sounds_enabled: bool,
    pub system_enabled: bool,
    /// Notification types the user has switched off.
    pub disabled_types: BTreeSet<String>,
    pub do_not_disturb: DoNotDisturb,
    pub quiet_hours: QuietHours,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sounds_enabled: true,
            system_enabled: true,
            disabled_types: BTreeSet::new(),
            do_not_disturb: DoNotDisturb::default(),
            quiet_hours: QuietHours::default(),
        }
    }
}

impl DeliverySettings {
    pub fn is_type_enabled(&self, kind: &str) -> bool {
        !self.disabled_types.contains(kind)
    }

    pub fn set_type_enabled(&mut self, kind: impl Into<String>, enabled: bool) {
        let kind = kind.into();
        if enabled {
            self.disabled_types.remove(&kind);
        } else {
            self.disabled_types.insert(kind);
        }
    }
}

/// Manually toggled suppression, optionally ending at a fixed instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoNotDisturb {
    pub enabled: bool,
    pub until: Option<DateTime<Utc>>,
}

impl DoNotDisturb {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.until.is_none_or(|until| now < until)
    }
}

/// Daily suppression window. `start > end` wraps past midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// IANA timezone the window is expressed in; host local time when unset.
    pub timezone: Option<Tz>,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            timezone: None,
        }
    }
}

impl QuietHours {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let time = match self.timezone {
            Some(tz) => now.with_timezone(&tz).time(),
            None => now.with_timezone(&Local).time(),
        };
        self.contains(time)
    }

    /// Whether a wall-clock time falls inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            return false;
        }
        if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Source of delivery settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self) -> DeliverySettings;

    async fn set(&self, settings: DeliverySettings) -> Result<()>;
}

/// Settings held in memory only.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    settings: RwLock<DeliverySettings>,
}

impl InMemorySettings {
    pub fn new(settings: DeliverySettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn get(&self) -> DeliverySettings {
        self.settings.read().clone()
    }

    async fn set(&self, settings: DeliverySettings) -> Result<()> {
        *self.settings.write() = settings;
        Ok(())
    }
}

/// Settings persisted as JSON in a [`KeyValueStore`], cached in memory.
pub struct PersistedSettings {
    store: Arc<dyn KeyValueStore>,
    cached: RwLock<DeliverySettings>,
}

impl PersistedSettings {
    /// Load settings from `store`, falling back to defaults when missing or
    /// unreadable.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let settings = match store.get(SETTINGS_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable notification settings: {}", e);
                DeliverySettings::default()
            }),
            None => DeliverySettings::default(),
        };
        Ok(Self {
            store,
            cached: RwLock::new(settings),
        })
    }
}

#[async_trait]
impl SettingsStore for PersistedSettings {
    async fn get(&self) -> DeliverySettings {
        self.cached.read().clone()
    }

    async fn set(&self, settings: DeliverySettings) -> Result<()> {
        let payload = serde_json::to_string(&settings)?;
        self.store.set(SETTINGS_KEY, payload).await?;
        *self.cached.write() = settings;
        Ok(())
    }
}
