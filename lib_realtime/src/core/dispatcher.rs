//! # Message Router
//!
//! Classifies inbound text frames and fans them out to listeners, keyed by
//! message category.
//!
//! ## Core Design Principles:
//!
//! 1.  **Never fail the receive path**: a frame that is not valid JSON, or a
//!     known type whose payload does not match its schema, becomes a local
//!     [`RoutedEvent::ParseError`]. The socket stays open.
//!
//! 2.  **Typed fan-out**: listeners subscribe to a [`MessageCategory`] and get
//!     an unbounded channel of `Arc<RoutedEvent>`. Each event is allocated once
//!     and every listener receives a new `Arc` pointer to it.
//!
//! 3.  **Graceful degradation**: types the router does not know are delivered
//!     as [`RoutedEvent::Unclassified`] instead of being dropped.
//!
//! 4.  **Self-cleaning**: listeners whose receiver was dropped are pruned on
//!     the next dispatch.

use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::protocol::{
    InitialProgress, Message, NotificationLevel, NotificationPayload, ProgressUpdate,
};

/// Routing key for listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCategory {
    /// `connection` acknowledgement sent right after the socket opens.
    Connection,
    /// `pong` replies to keepalive pings.
    Pong,
    /// `notification`, `course_notification` and `progress_notification`.
    Notification,
    /// `progress_updated` pushes.
    ProgressUpdate,
    /// `initial_progress` snapshots.
    InitialProgress,
    /// `subscription_confirmed` / `unsubscription_confirmed`.
    Subscription,
    /// `error` frames sent by the server.
    ServerError,
    /// Frames that could not be parsed locally.
    ParseError,
    /// Anything with a `type` the router does not know.
    Unclassified,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedEvent {
    /// Connection acknowledgement.
    ConnectionAck {
        /// Greeting text.
        message: Option<String>,
        /// Authenticated user id.
        user_id: Option<String>,
    },
    /// Keepalive reply.
    Pong {
        /// Server time of the reply.
        timestamp: Option<String>,
    },
    /// Any notification-class frame, normalized.
    Notification(NotificationPayload),
    /// Stored progress changed.
    ProgressUpdated(ProgressUpdate),
    /// Per-course progress snapshot.
    InitialProgress(InitialProgress),
    /// The server accepted a course subscription.
    SubscriptionConfirmed {
        /// Course id.
        course_id: String,
    },
    /// The server dropped a course subscription.
    UnsubscriptionConfirmed {
        /// Course id.
        course_id: String,
    },
    /// The server reported a problem with something we sent.
    ServerError {
        /// Server message.
        message: String,
    },
    /// Local parse failure. The frame was not dispatched anywhere else.
    ParseError {
        /// Offending frame text.
        raw: String,
        /// Why it failed.
        reason: String,
    },
    /// Valid envelope with an unknown `type`.
    Unclassified(Message),
}

impl RoutedEvent {
    /// Category this event is dispatched under.
    pub fn category(&self) -> MessageCategory {
        match self {
            RoutedEvent::ConnectionAck { .. } => MessageCategory::Connection,
            RoutedEvent::Pong { .. } => MessageCategory::Pong,
            RoutedEvent::Notification(_) => MessageCategory::Notification,
            RoutedEvent::ProgressUpdated(_) => MessageCategory::ProgressUpdate,
            RoutedEvent::InitialProgress(_) => MessageCategory::InitialProgress,
            RoutedEvent::SubscriptionConfirmed { .. } | RoutedEvent::UnsubscriptionConfirmed { .. } => {
                MessageCategory::Subscription
            }
            RoutedEvent::ServerError { .. } => MessageCategory::ServerError,
            RoutedEvent::ParseError { .. } => MessageCategory::ParseError,
            RoutedEvent::Unclassified(_) => MessageCategory::Unclassified,
        }
    }
}

/// Parses one text frame into a [`RoutedEvent`]. Pure; never panics.
pub fn classify(raw: &str) -> RoutedEvent {
    let message: Message = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            return RoutedEvent::ParseError {
                raw: raw.to_string(),
                reason: e.to_string(),
            }
        }
    };

    match message.kind.as_str() {
        "connection" => RoutedEvent::ConnectionAck {
            message: message.str_field("message").map(str::to_string),
            user_id: message.str_field("user_id").map(str::to_string),
        },
        "pong" => RoutedEvent::Pong {
            timestamp: message.timestamp.clone(),
        },
        "notification" | "course_notification" | "progress_notification" => {
            RoutedEvent::Notification(normalize_notification(&message))
        }
        "progress_updated" => typed(raw, &message, RoutedEvent::ProgressUpdated),
        "initial_progress" => typed(raw, &message, RoutedEvent::InitialProgress),
        "subscription_confirmed" | "unsubscription_confirmed" => {
            let Some(course_id) = message.str_field("course_id").map(str::to_string) else {
                return RoutedEvent::ParseError {
                    raw: raw.to_string(),
                    reason: format!("{} without course_id", message.kind),
                };
            };
            if message.kind == "subscription_confirmed" {
                RoutedEvent::SubscriptionConfirmed { course_id }
            } else {
                RoutedEvent::UnsubscriptionConfirmed { course_id }
            }
        }
        "error" => RoutedEvent::ServerError {
            message: message
                .str_field("message")
                .unwrap_or("unspecified server error")
                .to_string(),
        },
        _ => RoutedEvent::Unclassified(message),
    }
}

fn typed<T, F>(raw: &str, message: &Message, wrap: F) -> RoutedEvent
where
    T: DeserializeOwned,
    F: FnOnce(T) -> RoutedEvent,
{
    match serde_json::from_value::<T>(message.payload()) {
        Ok(payload) => wrap(payload),
        Err(e) => RoutedEvent::ParseError {
            raw: raw.to_string(),
            reason: format!("malformed {}: {}", message.kind, e),
        },
    }
}

/// Notification frames are loosely shaped: fields may sit under `data` or at
/// the top level, and `level` is often absent.
fn normalize_notification(message: &Message) -> NotificationPayload {
    NotificationPayload {
        source: message.kind.clone(),
        title: message.str_field("title").unwrap_or("Notification").to_string(),
        message: message.str_field("message").unwrap_or_default().to_string(),
        level: NotificationLevel::parse(message.str_field("level")),
        action_url: message.str_field("action_url").map(str::to_string),
        timestamp: message
            .timestamp
            .clone()
            .or_else(|| message.str_field("timestamp").map(str::to_string)),
    }
}

struct Listener {
    /// `None` receives every category.
    filter: Option<MessageCategory>,
    sender: mpsc::UnboundedSender<Arc<RoutedEvent>>,
}

/// # Message Router
///
/// Owns the listener table. Cheap to share behind an `Arc`; all methods take
/// `&self`.
#[derive(Default)]
pub struct MessageRouter {
    listeners: Mutex<Vec<Listener>>,
}

impl MessageRouter {
    /// Creates a router with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one category.
    pub fn subscribe(&self, category: MessageCategory) -> mpsc::UnboundedReceiver<Arc<RoutedEvent>> {
        self.register(Some(category))
    }

    /// Registers a listener for every category.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<Arc<RoutedEvent>> {
        self.register(None)
    }

    fn register(&self, filter: Option<MessageCategory>) -> mpsc::UnboundedReceiver<Arc<RoutedEvent>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener { filter, sender });
        receiver
    }

    /// Number of live listeners (pruned lazily on dispatch).
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Receive-path entry point: classify and dispatch one frame.
    ///
    /// Returns the category the frame was dispatched under.
    pub fn on_frame(&self, raw: &str) -> MessageCategory {
        let event = classify(raw);
        match &event {
            RoutedEvent::ParseError { reason, .. } => {
                log::warn!("MessageRouter: dropping malformed frame: {}", reason);
            }
            RoutedEvent::Unclassified(message) => {
                log::debug!("MessageRouter: unclassified message type '{}'", message.kind);
            }
            other => log::trace!("MessageRouter: routing {:?}", other.category()),
        }
        let category = event.category();
        self.dispatch(event);
        category
    }

    /// Delivers an already classified event.
    pub fn dispatch(&self, event: RoutedEvent) {
        let category = event.category();
        let event = Arc::new(event);
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|listener| {
            if listener.filter.is_some_and(|filter| filter != category) {
                return !listener.sender.is_closed();
            }
            match listener.sender.send(Arc::clone(&event)) {
                Ok(()) => true,
                Err(_) => {
                    log::debug!("MessageRouter: listener for {:?} went away, removing", listener.filter);
                    false
                }
            }
        });
    }
}
