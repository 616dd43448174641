//! Notification data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique notification identifier, allocated monotonically by the service.
pub type NotificationId = u64;

/// Priority level for notifications.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NotificationPriority {
    /// Informational only.
    Low,
    #[default]
    Normal,
    High,
    /// Requires immediate attention. Always treated as critical by the dispatcher.
    #[serde(alias = "critical")]
    #[strum(to_string = "urgent", serialize = "critical")]
    Urgent,
}

impl NotificationPriority {
    pub fn is_urgent(self) -> bool {
        self == Self::Urgent
    }
}

/// Caller-supplied action attached to a notification.
///
/// The engine never invokes the action; `action_id` is a reference the
/// presentation layer resolves to its own callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
    pub label: String,
    pub action_id: String,
}

impl NotificationAction {
    pub fn new(label: impl Into<String>, action_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action_id: action_id.into(),
        }
    }
}

/// An immutable delivery request accepted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    /// Domain tag (e.g. `email`, `task_due`); opaque to the engine.
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub created_at: DateTime<Utc>,
    /// Time to live before auto-dismiss.
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Notification {
    /// Whether the audio channel should play a cue for this notification.
    ///
    /// An explicit `sound` flag wins; otherwise only high and urgent
    /// notifications are audible.
    pub fn wants_sound(&self) -> bool {
        self.sound
            .unwrap_or(self.priority >= NotificationPriority::High)
    }
}

/// Input accepted by `NotificationService::show_notification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub priority: NotificationPriority,
    /// Falls back to the per-type/per-priority default when absent.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub action: Option<NotificationAction>,
    #[serde(default)]
    pub sound: Option<bool>,
    #[serde(default)]
    pub avatar: Option<String>,
}

fn default_kind() -> String {
    "info".to_string()
}

impl NotificationRequest {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: default_kind(),
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Normal,
            duration_ms: None,
            action: None,
            sound: None,
            avatar: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_sound(mut self, sound: bool) -> Self {
        self.sound = Some(sound);
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Materialize the request into an immutable notification.
    pub fn into_notification(
        self,
        id: NotificationId,
        default_duration_ms: u64,
        created_at: DateTime<Utc>,
    ) -> Notification {
        Notification {
            id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            priority: self.priority,
            created_at,
            duration_ms: self.duration_ms.unwrap_or(default_duration_ms),
            action: self.action,
            sound: self.sound,
            avatar: self.avatar,
        }
    }
}

/// A notification as recorded in the persisted history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalNotification {
    #[serde(flatten)]
    pub notification: Notification,
    #[serde(default)]
    pub read: bool,
}

impl HistoricalNotification {
    pub fn unread(notification: Notification) -> Self {
        Self {
            notification,
            read: false,
        }
    }

    pub fn id(&self) -> NotificationId {
        self.notification.id
    }
}
