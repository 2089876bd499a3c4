//! # Connection Core
//!
//! Everything needed to keep one authenticated real-time socket alive and to
//! turn its frames into typed events.
//!
//! ## Contained Modules:
//!
//! - **`transport`**: The `Connector`/`Transport` seam and its
//!   tokio-tungstenite implementation. Also builds the tokenized URL.
//!
//! - **`connection_manager`**: The lifecycle state machine. Runs a single
//!   driver task that connects, pumps frames, and reconnects at a fixed
//!   interval up to a cap.
//!
//! - **`keepalive`**: A per-session ping timer that dies with its session and
//!   can optionally expire a silent connection.
//!
//! - **`registry`**: The set of subscribed courses, replayed on every open.
//!
//! - **`dispatcher`**: The `MessageRouter` that classifies inbound frames and
//!   fans them out by category.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Socket seam and WebSocket implementation.
pub mod transport;
/// Connection lifecycle state machine.
pub mod connection_manager;
/// Per-session ping timer.
pub mod keepalive;
/// Subscribed courses, replayed on reconnect.
pub mod registry;
/// Inbound frame classification and fan-out.
pub mod dispatcher;

// --- Public API Re-exports ---
pub use connection_manager::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionSettings, ConnectionState,
    SessionListener,
};
pub use dispatcher::{classify, MessageCategory, MessageRouter, RoutedEvent};
pub use keepalive::KeepAlive;
pub use registry::SubscriptionRegistry;
pub use transport::{build_url, Connector, Transport, TransportError, WireEvent, WsConnector, WsTransport};
