//! # Subscription Registry
//!
//! Remembers which courses the client wants push updates for, independent of
//! whether a socket is currently open. Subscribing while offline only records
//! intent; the full set is replayed each time a session opens.
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use crate::core::connection_manager::{ConnectionHandle, SessionListener};
use crate::protocol::ControlFrame;

/// Course ids the client wants pushed updates for.
pub struct SubscriptionRegistry {
    topics: Mutex<BTreeSet<String>>,
    handle: ConnectionHandle,
}

impl SubscriptionRegistry {
    /// Empty registry sending through `handle`.
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            topics: Mutex::new(BTreeSet::new()),
            handle,
        }
    }

    /// Adds a course. Returns false if it was already present (no frame is
    /// sent in that case).
    pub fn subscribe(&self, course_id: &str) -> bool {
        let added = self
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(course_id.to_string());
        if !added {
            log::debug!("Registry: already subscribed to {}", course_id);
            return false;
        }

        let sent = self.handle.send(&ControlFrame::SubscribeCourse {
            course_id: course_id.to_string(),
        });
        log::info!(
            "Registry: subscribed to {}{}",
            course_id,
            if sent { "" } else { " (deferred until connected)" }
        );
        true
    }

    /// Removes a course. Returns false if it was not present.
    pub fn unsubscribe(&self, course_id: &str) -> bool {
        let removed = self
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(course_id);
        if !removed {
            return false;
        }

        // Offline: nothing to tell the server, the next replay simply omits it.
        self.handle.send(&ControlFrame::UnsubscribeCourse {
            course_id: course_id.to_string(),
        });
        log::info!("Registry: unsubscribed from {}", course_id);
        true
    }

    /// True when `course_id` is registered.
    pub fn contains(&self, course_id: &str) -> bool {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(course_id)
    }

    /// Snapshot of the subscribed courses, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl SessionListener for SubscriptionRegistry {
    fn on_open(&self, handle: &ConnectionHandle) {
        let topics = self.topics();
        if topics.is_empty() {
            return;
        }
        log::info!("Registry: replaying {} subscriptions", topics.len());
        for course_id in topics {
            handle.send(&ControlFrame::SubscribeCourse { course_id });
        }
    }
}
