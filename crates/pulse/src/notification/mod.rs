//! Notification model shared by the queue, channels and history log.

pub mod model;

pub use model::{
    HistoricalNotification, Notification, NotificationAction, NotificationId,
    NotificationPriority, NotificationRequest,
};
