//! # lib_realtime
//!
//! Client side of the LMS real-time channel: one authenticated WebSocket that
//! survives network loss, a typed router for what the server pushes, a
//! bounded notification inbox, and debounced progress writes over HTTP.
//!
//! Start from [`RealtimeClient`].

pub mod client;
pub mod configs;
pub mod core;
pub mod notifications;
pub mod protocol;
pub mod retrieve;
pub mod sync;

pub use client::RealtimeClient;
pub use configs::{ConfigError, RealtimeConfig};
pub use crate::core::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionSettings, ConnectionState, Connector,
    MessageCategory, MessageRouter, RoutedEvent, SessionListener, SubscriptionRegistry, Transport,
    TransportError, WireEvent, WsConnector,
};
pub use notifications::{JsonFileCache, MemoryCache, NotificationCache, NotificationRecord, NotificationStore, Toast};
pub use protocol::{ControlFrame, Message, NotificationLevel, NotificationPayload};
pub use sync::{CompletionLedger, HttpProgressWriter, ProgressError, ProgressRecord, ProgressSync, ProgressTarget, ProgressWrite, ProgressWriter};
