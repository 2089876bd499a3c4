//! # Notification Store
//!
//! A bounded, most-recent-first list of notifications with read tracking.
//!
//! The list is mirrored to a [`NotificationCache`] after every mutation and
//! hydrated from it at startup. Each `add` also fires a one-shot [`Toast`]
//! on a broadcast channel; toasts are never persisted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::cache::NotificationCache;
use crate::protocol::{NotificationLevel, NotificationPayload};

/// Default number of records kept.
pub const DEFAULT_CAPACITY: usize = 50;
/// Default toast lifetime.
pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_millis(5000);

/// One stored notification. Only `read` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Locally generated id.
    pub id: String,
    /// Headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Display severity.
    pub level: NotificationLevel,
    /// Optional in-app link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Server timestamp, or local receive time when the server sent none.
    pub timestamp: String,
    /// Read flag.
    #[serde(default)]
    pub read: bool,
}

impl NotificationRecord {
    /// Builds an unread record with a fresh id.
    pub fn from_payload(payload: NotificationPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: payload.title,
            message: payload.message,
            level: payload.level,
            action_url: payload.action_url,
            timestamp: payload.timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
            read: false,
        }
    }
}

/// Transient popup for a newly added notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    /// Id of the record that caused it.
    pub id: String,
    /// Headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity.
    pub level: NotificationLevel,
    /// How long to show it before auto-dismissing.
    pub duration: Duration,
}

/// # Notification Store
pub struct NotificationStore {
    records: Mutex<VecDeque<NotificationRecord>>,
    capacity: usize,
    cache: Arc<dyn NotificationCache>,
    toasts: broadcast::Sender<Toast>,
    toast_duration: Duration,
}

impl NotificationStore {
    /// Empty store. Call [`NotificationStore::hydrate`] to load the cache.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn new(cache: Arc<dyn NotificationCache>, capacity: usize, toast_duration: Duration) -> Self {
        let (toasts, _) = broadcast::channel(16);
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            cache,
            toasts,
            toast_duration,
        }
    }

    /// Replaces the in-memory list with the cached snapshot, truncated to
    /// capacity. A cache error leaves the store empty and is logged.
    pub fn hydrate(&self) -> usize {
        let loaded = match self.cache.load() {
            Ok(records) => records,
            Err(e) => {
                log::warn!("NotificationStore: could not load cache: {}", e);
                Vec::new()
            }
        };
        let mut records = self.lock();
        *records = loaded.into_iter().take(self.capacity).collect();
        log::debug!("NotificationStore: hydrated {} records", records.len());
        records.len()
    }

    /// Prepends a record built from `payload`, evicting the oldest beyond
    /// capacity, and fires a toast.
    pub fn add(&self, payload: NotificationPayload) -> NotificationRecord {
        let record = NotificationRecord::from_payload(payload);
        {
            let mut records = self.lock();
            records.push_front(record.clone());
            records.truncate(self.capacity);
            self.persist(&records);
        }

        // No toast subscribers is fine.
        let _ = self.toasts.send(Toast {
            id: record.id.clone(),
            title: record.title.clone(),
            message: record.message.clone(),
            level: record.level,
            duration: self.toast_duration,
        });
        record
    }

    /// Marks one record read. Returns false for an unknown id.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut records = self.lock();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        if !record.read {
            record.read = true;
            self.persist(&records);
        }
        true
    }

    /// Marks every record read. Returns how many changed.
    pub fn mark_all_read(&self) -> usize {
        let mut records = self.lock();
        let mut changed = 0;
        for record in records.iter_mut().filter(|r| !r.read) {
            record.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.persist(&records);
        }
        changed
    }

    /// Removes one record. Returns false for an unknown id.
    pub fn clear(&self, id: &str) -> bool {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return false;
        }
        self.persist(&records);
        true
    }

    /// Removes every record.
    pub fn clear_all(&self) {
        let mut records = self.lock();
        records.clear();
        self.persist(&records);
    }

    /// Snapshot, most recent first.
    pub fn list(&self) -> Vec<NotificationRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Looks one record up.
    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of unread records.
    pub fn unread_count(&self) -> usize {
        self.lock().iter().filter(|r| !r.read).count()
    }

    /// Maximum number of records kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Toast stream. Only toasts fired after subscribing are received.
    pub fn toasts(&self) -> broadcast::Receiver<Toast> {
        self.toasts.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<NotificationRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, records: &VecDeque<NotificationRecord>) {
        let snapshot: Vec<NotificationRecord> = records.iter().cloned().collect();
        if let Err(e) = self.cache.save(&snapshot) {
            log::warn!("NotificationStore: could not persist {} records: {}", snapshot.len(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::cache::{JsonFileCache, MemoryCache};

    fn payload(title: &str) -> NotificationPayload {
        NotificationPayload {
            source: "notification".to_string(),
            title: title.to_string(),
            message: format!("{title} body"),
            level: NotificationLevel::Info,
            action_url: None,
            timestamp: None,
        }
    }

    fn store() -> (NotificationStore, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::default());
        let store = NotificationStore::new(cache.clone(), DEFAULT_CAPACITY, DEFAULT_TOAST_DURATION);
        (store, cache)
    }

    #[test]
    fn keeps_the_fifty_most_recent_newest_first() {
        let (store, _cache) = store();
        for i in 0..60 {
            store.add(payload(&format!("n{i}")));
        }
        let titles: Vec<String> = store.list().into_iter().map(|r| r.title).collect();
        let expected: Vec<String> = (10..60).rev().map(|i| format!("n{i}")).collect();
        assert_eq!(titles, expected);
    }

    #[test]
    fn read_state_changes_neither_order_nor_count() {
        let (store, _cache) = store();
        let a = store.add(payload("a"));
        let b = store.add(payload("b"));
        assert_eq!(store.unread_count(), 2);

        assert!(store.mark_read(&a.id));
        assert!(!store.mark_read("missing"));
        let ids: Vec<String> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id.clone(), a.id.clone()]);
        assert_eq!(store.unread_count(), 1);
        assert!(store.get(&a.id).unwrap().read);

        assert_eq!(store.mark_all_read(), 1);
        assert_eq!(store.mark_all_read(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_removes_one_or_all() {
        let (store, cache) = store();
        let a = store.add(payload("a"));
        store.add(payload("b"));
        assert!(store.clear(&a.id));
        assert!(!store.clear(&a.id));
        assert_eq!(cache.snapshot().len(), 1);

        store.clear_all();
        assert!(store.is_empty());
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn every_mutation_is_mirrored_to_the_cache() {
        let (store, cache) = store();
        let a = store.add(payload("a"));
        assert_eq!(cache.snapshot()[0].id, a.id);
        store.mark_read(&a.id);
        assert!(cache.snapshot()[0].read);
    }

    #[test]
    fn hydrate_replaces_with_persisted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.json");

        let first = NotificationStore::new(Arc::new(JsonFileCache::new(&path)), 50, DEFAULT_TOAST_DURATION);
        let kept = first.add(payload("persisted"));
        first.mark_read(&kept.id);

        let second = NotificationStore::new(Arc::new(JsonFileCache::new(&path)), 50, DEFAULT_TOAST_DURATION);
        assert!(second.is_empty());
        assert_eq!(second.hydrate(), 1);
        let records = second.list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, kept.id);
        assert!(records[0].read);
    }

    #[test]
    fn add_fires_a_toast_that_is_not_stored() {
        let (store, _cache) = store();
        let mut toasts = store.toasts();
        let record = store.add(payload("hello"));

        let toast = toasts.try_recv().unwrap();
        assert_eq!(toast.id, record.id);
        assert_eq!(toast.duration, DEFAULT_TOAST_DURATION);
        assert!(toasts.try_recv().is_err());
    }

    #[test]
    fn missing_timestamp_gets_receive_time() {
        let record = NotificationRecord::from_payload(payload("x"));
        assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
        assert!(!record.read);
    }
}
