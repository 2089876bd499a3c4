//! # Wire Protocol
//!
//! Frame shapes exchanged over the `/ws/notifications` socket and the progress
//! write endpoint. Every frame is a UTF-8 JSON object carrying a `type` field;
//! everything else is type specific.
//!
//! - **Outbound** (client -> server): [`ControlFrame`], a closed set of three
//!   control messages.
//! - **Inbound** (server -> client): [`Message`], an open envelope that keeps
//!   unknown fields so the router can classify frames it has never seen.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Close code sent on a deliberate, clean shutdown. Never triggers a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when no close frame was received (or the socket never opened).
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Server close code for a missing or invalid bearer token.
pub const CLOSE_AUTH_REQUIRED: u16 = 4001;
/// Server close code for a user that is not enrolled in the requested course.
pub const CLOSE_NOT_ENROLLED: u16 = 4003;

/// Returns true for close codes that mean "this token will never be accepted".
pub fn is_auth_close(code: u16) -> bool {
    matches!(code, CLOSE_AUTH_REQUIRED | CLOSE_NOT_ENROLLED)
}

/// # Control Frame
///
/// Frames the client sends to the server. Serialized with the variant name as
/// the `type` field, e.g. `{"type":"subscribe_course","course_id":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Ask for push updates scoped to a course.
    SubscribeCourse {
        /// Course identifier.
        course_id: String,
    },
    /// Stop push updates for a course.
    UnsubscribeCourse {
        /// Course identifier.
        course_id: String,
    },
    /// Liveness check; the server answers with `pong`.
    Ping {
        /// ISO-8601 send time.
        timestamp: String,
    },
}

impl ControlFrame {
    /// A ping stamped with the current UTC time.
    pub fn ping_now() -> Self {
        ControlFrame::Ping {
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Wire name of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlFrame::SubscribeCourse { .. } => "subscribe_course",
            ControlFrame::UnsubscribeCourse { .. } => "unsubscribe_course",
            ControlFrame::Ping { .. } => "ping",
        }
    }

    /// Serializes the frame to its JSON text form.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// # Message
///
/// The inbound envelope: `{ "type": string, "data"?: object, "timestamp"?: string, ... }`.
/// Type-specific fields that the server puts at the top level are kept in
/// `fields`, so lookups work regardless of whether a payload is nested under
/// `data` or flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Declared frame type used for routing.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional nested payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// ISO-8601 server time, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Every other top-level field.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    /// Looks a field up in `data` first, then at the top level.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|data| data.get(key))
            .or_else(|| self.fields.get(key))
    }

    /// String view of [`Message::field`]. Non-string values yield `None`.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Merges `data` over the top-level fields into one object, so typed
    /// payloads can be deserialized without caring where the server put them.
    pub fn payload(&self) -> Value {
        let mut merged = self.fields.clone();
        if let Some(Value::Object(data)) = &self.data {
            for (key, value) in data {
                merged.insert(key.clone(), value.clone());
            }
        }
        if let Some(ts) = &self.timestamp {
            merged
                .entry("timestamp".to_string())
                .or_insert_with(|| Value::String(ts.clone()));
        }
        Value::Object(merged)
    }
}

/// Severity of a notification as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Neutral information (default for anything unrecognized).
    #[default]
    Info,
    /// A completed action or achievement.
    Success,
    /// Something that needs attention.
    Warning,
    /// A failure.
    Error,
}

impl NotificationLevel {
    /// Lenient parse: unknown or missing levels fall back to `Info`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("success") => NotificationLevel::Success,
            Some("warning") | Some("warn") => NotificationLevel::Warning,
            Some("error") => NotificationLevel::Error,
            _ => NotificationLevel::Info,
        }
    }
}

/// Normalized body of the three notification-class frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Wire type the notification arrived as (`notification`, `course_notification`, ...).
    pub source: String,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Display severity.
    pub level: NotificationLevel,
    /// Optional in-app link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Server timestamp, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// `progress_updated` push: another session (or the server) stored progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// User whose progress changed.
    pub user_id: String,
    /// Course the content belongs to.
    pub course_id: String,
    /// Content item.
    pub content_id: String,
    /// Stored percentage, 0-100.
    pub progress_percentage: u8,
    /// Stored completion flag.
    pub completed: bool,
    /// Server timestamp, if any.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// One content row of an `initial_progress` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProgress {
    /// Content item.
    pub content_id: String,
    /// Stored percentage, 0-100.
    pub progress_percentage: u8,
    /// Stored completion flag.
    pub completed: bool,
    /// Last playback position in whole seconds.
    #[serde(default)]
    pub last_position: Option<u64>,
    /// Last server-side update.
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// `initial_progress`: per-course snapshot sent when a progress socket opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialProgress {
    /// Course the snapshot covers.
    pub course_id: String,
    /// Stored rows.
    #[serde(default)]
    pub progress: Vec<ContentProgress>,
}
