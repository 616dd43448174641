//! Event dispatcher.
//!
//! Maps inbound wire events to notification requests through a routing
//! table, then applies the user's delivery settings: global and per-type
//! enablement, do-not-disturb and quiet hours. Suppression windows only
//! hold back non-critical events.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channels::ChannelSet;
use crate::config::DurationDefaults;
use crate::notification::{NotificationAction, NotificationPriority, NotificationRequest};
use crate::settings::{DeliverySettings, SettingsStore};
use crate::stream::WireEvent;

/// How one wire event type becomes a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Notification type tag given to the created notification.
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    #[serde(default)]
    pub priority: NotificationPriority,
    /// Title used when the event carries none.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_true")]
    pub system: bool,
    #[serde(default = "default_true")]
    pub sound: bool,
    /// Deliver even inside do-not-disturb and quiet hours.
    #[serde(default)]
    pub critical: bool,
}

fn default_true() -> bool {
    true
}

impl RouteSpec {
    pub fn new(kind: impl Into<String>, priority: NotificationPriority) -> Self {
        Self {
            kind: kind.into(),
            priority,
            title: None,
            system: true,
            sound: true,
            critical: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_sound(mut self, sound: bool) -> Self {
        self.sound = sound;
        self
    }

    pub fn with_system(mut self, system: bool) -> Self {
        self.system = system;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Wire event type to route lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTable {
    routes: BTreeMap<String, RouteSpec>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        use NotificationPriority::*;

        let routes = [
            ("email", RouteSpec::new("email", Normal).with_title("New email")),
            (
                "urgent_email",
                RouteSpec::new("urgent_email", Urgent).with_title("Urgent email"),
            ),
            ("task_due", RouteSpec::new("task_due", High).with_title("Task due")),
            (
                "calendar_reminder",
                RouteSpec::new("calendar_reminder", High).with_title("Upcoming event"),
            ),
            (
                "file_shared",
                RouteSpec::new("file_shared", Normal).with_title("File shared with you"),
            ),
            (
                "sheet_updated",
                RouteSpec::new("sheet_updated", Low)
                    .with_title("Sheet updated")
                    .with_sound(false),
            ),
            ("system", RouteSpec::new("system", Normal).with_title("System")),
        ]
        .into_iter()
        .map(|(event_type, route)| (event_type.to_string(), route))
        .collect();

        Self { routes }
    }
}

impl RoutingTable {
    /// Default table with `overrides` added or replacing entries.
    pub fn with_overrides(overrides: &BTreeMap<String, RouteSpec>) -> Self {
        let mut table = Self::default();
        for (event_type, route) in overrides {
            table.insert(event_type.clone(), route.clone());
        }
        table
    }

    pub fn insert(&mut self, event_type: impl Into<String>, route: RouteSpec) {
        self.routes.insert(event_type.into(), route);
    }

    pub fn get(&self, event_type: &str) -> Option<&RouteSpec> {
        self.routes.get(event_type)
    }
}

/// Why a routed event was held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SuppressReason {
    NotificationsDisabled,
    TypeDisabled,
    DoNotDisturb,
    QuietHours,
}

/// A notification ready for delivery, with the channels it may use.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedNotification {
    pub request: NotificationRequest,
    pub channels: ChannelSet,
    pub critical: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Deliver(Box<RoutedNotification>),
    Suppressed(SuppressReason),
    /// No route for the event type.
    Unrouted,
}

pub struct EventDispatcher {
    routes: RoutingTable,
    durations: DurationDefaults,
    settings: Arc<dyn SettingsStore>,
}

impl EventDispatcher {
    pub fn new(
        routes: RoutingTable,
        durations: DurationDefaults,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            routes,
            durations,
            settings,
        }
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Route `event` against the current settings.
    pub async fn dispatch(&self, event: &WireEvent) -> Dispatch {
        let settings = self.settings.get().await;
        self.dispatch_at(event, &settings, Utc::now())
    }

    /// Route `event` as of `now`.
    pub fn dispatch_at(
        &self,
        event: &WireEvent,
        settings: &DeliverySettings,
        now: DateTime<Utc>,
    ) -> Dispatch {
        let Some(route) = self.routes.get(&event.event_type) else {
            warn!(event_type = %event.event_type, "Ignoring event with no route");
            return Dispatch::Unrouted;
        };

        let priority = event.priority().unwrap_or(route.priority);
        let critical = route.critical || event.flagged_critical() || priority.is_urgent();

        let suppressed = if !settings.enabled {
            Some(SuppressReason::NotificationsDisabled)
        } else if !settings.is_type_enabled(&route.kind)
            || !settings.is_type_enabled(&event.event_type)
        {
            Some(SuppressReason::TypeDisabled)
        } else if critical {
            None
        } else if settings.do_not_disturb.is_active(now) {
            Some(SuppressReason::DoNotDisturb)
        } else if settings.quiet_hours.is_active(now) {
            Some(SuppressReason::QuietHours)
        } else {
            None
        };
        if let Some(reason) = suppressed {
            debug!(event_type = %event.event_type, %reason, "Event suppressed");
            return Dispatch::Suppressed(reason);
        }

        let request = self.build_request(event, route, priority);
        let channels = ChannelSet {
            system: route.system && settings.system_enabled,
            sound: route.sound && settings.sounds_enabled,
        };
        Dispatch::Deliver(Box::new(RoutedNotification {
            request,
            channels,
            critical,
        }))
    }

    fn build_request(
        &self,
        event: &WireEvent,
        route: &RouteSpec,
        priority: NotificationPriority,
    ) -> NotificationRequest {
        let title = event
            .str_field("title")
            .map(str::to_string)
            .or_else(|| route.title.clone())
            .unwrap_or_else(|| event.event_type.clone());
        let message = ["message", "body", "subject"]
            .iter()
            .find_map(|key| event.str_field(key))
            .unwrap_or_default();
        let duration_ms = event
            .u64_field("duration_ms")
            .or_else(|| event.u64_field("durationMs"))
            .unwrap_or_else(|| self.durations.resolve(&route.kind, priority));

        let mut request = NotificationRequest::new(title, message)
            .with_kind(route.kind.clone())
            .with_priority(priority)
            .with_duration_ms(duration_ms);
        if let Some(sound) = event.bool_field("sound") {
            request = request.with_sound(sound);
        }
        if let Some(avatar) = event.str_field("avatar") {
            request = request.with_avatar(avatar);
        }
        if let Some(action) = event
            .payload
            .get("action")
            .and_then(|value| serde_json::from_value::<NotificationAction>(value.clone()).ok())
        {
            request = request.with_action(action);
        }
        request
    }
}
