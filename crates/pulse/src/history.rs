//! Persisted notification history.
//!
//! The log is an ordered array of [`HistoricalNotification`] records (oldest
//! first) stored as JSON under [`HISTORY_KEY`]. It is append-only apart from
//! the `read` flag and whole-history clear, and never holds more than
//! `max_history` records; the oldest records are dropped first.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Result;
use crate::notification::{
    HistoricalNotification, Notification, NotificationId, NotificationPriority,
};
use crate::store::KeyValueStore;

/// Fixed key the history is persisted under.
pub const HISTORY_KEY: &str = "notification_history";

/// Read filter over the history log. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub read: Option<bool>,
    pub kind: Option<String>,
    pub priority: Option<NotificationPriority>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring match over title, message and type.
    pub text: Option<String>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unread() -> Self {
        Self {
            read: Some(false),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_range(
        mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &HistoricalNotification) -> bool {
        let n = &record.notification;
        if self.read.is_some_and(|read| read != record.read) {
            return false;
        }
        if self.kind.as_deref().is_some_and(|kind| kind != n.kind) {
            return false;
        }
        if self.priority.is_some_and(|p| p != n.priority) {
            return false;
        }
        if self.since.is_some_and(|since| n.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| n.created_at > until) {
            return false;
        }
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            let hit = [&n.title, &n.message, &n.kind]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Summary counters over the history log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub unread: usize,
    pub by_priority: BTreeMap<NotificationPriority, usize>,
}

/// Persisted, bounded history of delivered notifications.
pub struct HistoryLog {
    store: Arc<dyn KeyValueStore>,
    max_history: usize,
    records: Mutex<Vec<HistoricalNotification>>,
}

impl HistoryLog {
    /// Load the log from `store`. A missing or unreadable payload starts an
    /// empty history.
    pub async fn load(store: Arc<dyn KeyValueStore>, max_history: usize) -> Result<Self> {
        let max_history = max_history.max(1);
        let mut records = match store.get(HISTORY_KEY).await? {
            Some(raw) => match serde_json::from_str::<Vec<HistoricalNotification>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Discarding unreadable notification history: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        trim_oldest(&mut records, max_history);
        debug!(count = records.len(), "Loaded notification history");

        Ok(Self {
            store,
            max_history,
            records: Mutex::new(records),
        })
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Record a delivered notification as unread.
    pub async fn append(&self, notification: Notification) -> Result<()> {
        let mut records = self.records.lock().await;
        records.push(HistoricalNotification::unread(notification));
        trim_oldest(&mut records, self.max_history);
        self.persist(&records).await
    }

    /// Records matching `filter`, oldest first.
    pub async fn query(&self, filter: &HistoryFilter) -> Vec<HistoricalNotification> {
        let records = self.records.lock().await;
        let mut matched: Vec<HistoricalNotification> =
            records.iter().filter(|r| filter.matches(r)).cloned().collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub async fn all(&self) -> Vec<HistoricalNotification> {
        self.records.lock().await.clone()
    }

    pub async fn get(&self, id: NotificationId) -> Option<HistoricalNotification> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn unread_count(&self) -> usize {
        self.records.lock().await.iter().filter(|r| !r.read).count()
    }

    /// Mark one record read. Returns `false` if the id is unknown or the
    /// record was already read.
    pub async fn mark_read(&self, id: NotificationId) -> Result<bool> {
        let mut records = self.records.lock().await;
        let Some(record) = records.iter_mut().find(|r| r.id() == id && !r.read) else {
            return Ok(false);
        };
        record.read = true;
        self.persist(&records).await?;
        Ok(true)
    }

    /// Mark every record read. Returns how many changed.
    pub async fn mark_all_read(&self) -> Result<usize> {
        let mut records = self.records.lock().await;
        let mut changed = 0;
        for record in records.iter_mut().filter(|r| !r.read) {
            record.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.persist(&records).await?;
        }
        Ok(changed)
    }

    /// Drop the whole history, including the persisted payload.
    pub async fn clear(&self) -> Result<()> {
        let mut records = self.records.lock().await;
        records.clear();
        self.store.remove(HISTORY_KEY).await
    }

    pub async fn stats(&self) -> HistoryStats {
        let records = self.records.lock().await;
        let mut stats = HistoryStats {
            total: records.len(),
            ..Default::default()
        };
        for record in records.iter() {
            if !record.read {
                stats.unread += 1;
            }
            *stats
                .by_priority
                .entry(record.notification.priority)
                .or_default() += 1;
        }
        stats
    }

    async fn persist(&self, records: &[HistoricalNotification]) -> Result<()> {
        let payload = serde_json::to_string(records)?;
        self.store.set(HISTORY_KEY, payload).await
    }
}

fn trim_oldest(records: &mut Vec<HistoricalNotification>, max: usize) {
    let overflow = records.len().saturating_sub(max);
    if overflow > 0 {
        records.drain(..overflow);
    }
}
