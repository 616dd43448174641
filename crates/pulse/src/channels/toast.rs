use tokio::sync::broadcast;

use crate::notification::Notification;
use crate::queue::{NotificationQueue, QueueEvent};

/// In-app transient surface.
///
/// Holds no state of its own: everything it shows is read from the queue.
#[derive(Clone)]
pub struct ToastSurface {
    queue: NotificationQueue,
}

impl ToastSurface {
    pub fn new(queue: NotificationQueue) -> Self {
        Self { queue }
    }

    /// Currently visible toasts, oldest first.
    pub fn visible(&self) -> Vec<Notification> {
        self.queue.snapshot()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }
}
