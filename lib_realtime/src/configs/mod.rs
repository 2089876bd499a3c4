//! # Configuration Modules
//!
//! Tunables for the transport, loadable from JSON.

/// `RealtimeConfig` and its file loader.
pub mod config_realtime;

pub use config_realtime::{ConfigError, RealtimeConfig};
