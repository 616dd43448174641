//! Bounded queue of visible notifications.
//!
//! The queue owns one expiry timer per entry. Every removal path (expiry,
//! dismissal, eviction, clear) disposes of the entry's timer, and timers
//! carry a per-entry token so a timer that fires after its entry was
//! replaced cannot remove the replacement.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::notification::{Notification, NotificationId};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why an entry left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DismissReason {
    /// Its expiry timer fired.
    Expired,
    /// Explicit dismissal by a caller.
    Dismissed,
    /// Pushed out by a newer entry when the queue was full.
    Evicted,
    /// Removed by `clear()`.
    Cleared,
    /// Superseded by a notification with the same id.
    Replaced,
}

/// Change feed for presentation code.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Shown(Notification),
    Dismissed {
        id: NotificationId,
        reason: DismissReason,
    },
}

/// Counters over the lifetime of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub visible: usize,
    pub shown: u64,
    pub expired: u64,
    pub dismissed: u64,
    pub evicted: u64,
    /// Timers cancelled before firing (dismiss, evict, clear, replace).
    pub timers_cancelled: u64,
}

struct QueueEntry {
    notification: Notification,
    token: u64,
    timer: JoinHandle<()>,
}

impl QueueEntry {
    /// Dispose of the entry, cancelling its timer unless it is the one firing.
    fn dispose(self, timer_fired: bool) -> Notification {
        if !timer_fired {
            self.timer.abort();
        }
        self.notification
    }
}

#[derive(Default)]
struct Counters {
    shown: AtomicU64,
    expired: AtomicU64,
    dismissed: AtomicU64,
    evicted: AtomicU64,
    timers_cancelled: AtomicU64,
}

struct QueueInner {
    max_visible: usize,
    entries: Mutex<VecDeque<QueueEntry>>,
    next_token: AtomicU64,
    counters: Counters,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl QueueInner {
    /// Remove an entry by id. `token` restricts removal to a specific
    /// generation of the entry (used by expiry timers).
    fn remove(
        &self,
        id: NotificationId,
        token: Option<u64>,
        reason: DismissReason,
    ) -> Option<Notification> {
        let entry = {
            let mut entries = self.entries.lock();
            let pos = entries
                .iter()
                .position(|e| e.notification.id == id && token.is_none_or(|t| t == e.token))?;
            entries.remove(pos)?
        };

        let timer_fired = reason == DismissReason::Expired;
        let notification = entry.dispose(timer_fired);
        self.record_removal(id, reason);
        Some(notification)
    }

    fn record_removal(&self, id: NotificationId, reason: DismissReason) {
        let counter = match reason {
            DismissReason::Expired => &self.counters.expired,
            DismissReason::Evicted => &self.counters.evicted,
            DismissReason::Dismissed | DismissReason::Cleared | DismissReason::Replaced => {
                &self.counters.dismissed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if reason != DismissReason::Expired {
            self.counters.timers_cancelled.fetch_add(1, Ordering::Relaxed);
        }

        trace!(id, %reason, "Notification removed from queue");
        let _ = self.event_tx.send(QueueEvent::Dismissed { id, reason });
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().drain(..) {
            entry.timer.abort();
        }
    }
}

/// Bounded, ordered collection of visible notifications.
///
/// Cloning yields another handle to the same queue. Enqueueing spawns the
/// expiry timer on the current Tokio runtime.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<QueueInner>,
}

impl NotificationQueue {
    /// Create a queue holding at most `max_visible` entries (minimum 1).
    pub fn new(max_visible: usize) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                max_visible: max_visible.max(1),
                entries: Mutex::new(VecDeque::with_capacity(max_visible.max(1) + 1)),
                next_token: AtomicU64::new(1),
                counters: Counters::default(),
                event_tx,
            }),
        }
    }

    pub fn max_visible(&self) -> usize {
        self.inner.max_visible
    }

    /// Append a notification and start its expiry timer.
    ///
    /// Returns the ids evicted from the head to stay within `max_visible`.
    /// A notification whose id is already visible replaces the old entry.
    pub fn enqueue(&self, notification: Notification) -> Vec<NotificationId> {
        let id = notification.id;
        self.inner.remove(id, None, DismissReason::Replaced);

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let timer = spawn_expiry_timer(
            Arc::downgrade(&self.inner),
            id,
            token,
            Duration::from_millis(notification.duration_ms),
        );

        let shown = notification.clone();
        let evicted_entries: Vec<QueueEntry> = {
            let mut entries = self.inner.entries.lock();
            entries.push_back(QueueEntry {
                notification,
                token,
                timer,
            });
            let overflow = entries.len().saturating_sub(self.inner.max_visible);
            entries.drain(..overflow).collect()
        };

        self.inner.counters.shown.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.event_tx.send(QueueEvent::Shown(shown));

        let mut evicted = Vec::with_capacity(evicted_entries.len());
        for entry in evicted_entries {
            let evicted_id = entry.dispose(false).id;
            debug!(id = evicted_id, "Evicting oldest notification, queue full");
            self.inner.record_removal(evicted_id, DismissReason::Evicted);
            evicted.push(evicted_id);
        }
        evicted
    }

    /// Remove a notification. Returns `false` if it was not visible.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        self.inner
            .remove(id, None, DismissReason::Dismissed)
            .is_some()
    }

    /// Cancel every timer and empty the queue. Returns the number removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueueEntry> = self.inner.entries.lock().drain(..).collect();
        let count = drained.len();
        for entry in drained {
            let id = entry.dispose(false).id;
            self.inner.record_removal(id, DismissReason::Cleared);
        }
        count
    }

    /// Visible notifications, oldest first.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|e| e.notification.clone())
            .collect()
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.inner
            .entries
            .lock()
            .iter()
            .any(|e| e.notification.id == id)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of expiry timers that have neither fired nor been cancelled.
    pub fn pending_timers(&self) -> usize {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|e| !e.timer.is_finished())
            .count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        QueueStats {
            visible: self.len(),
            shown: c.shown.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            dismissed: c.dismissed.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
            timers_cancelled: c.timers_cancelled.load(Ordering::Relaxed),
        }
    }
}

fn spawn_expiry_timer(
    queue: Weak<QueueInner>,
    id: NotificationId,
    token: u64,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        if let Some(queue) = queue.upgrade() {
            queue.remove(id, Some(token), DismissReason::Expired);
        }
    })
}
