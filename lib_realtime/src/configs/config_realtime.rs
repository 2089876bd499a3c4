//! # Real-time Configuration
//!
//! All tunables of the transport in one serde struct. Every field has a
//! default, so a partial JSON file (or `{}`) is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ConnectionSettings;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read config file {path}: {source}")]
    Read {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for this struct.
    #[error("could not parse config file {path}: {source}")]
    Parse {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RealtimeConfig {
    /// WebSocket endpoint without the token.
    pub ws_base_url: String,
    /// REST API base used for progress writes.
    pub api_base_url: String,
    /// Fixed wait between reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Ping period while connected.
    pub keepalive_interval_secs: u64,
    /// Abandon a session after this long without inbound traffic.
    pub pong_timeout_secs: Option<u64>,
    /// Stop retrying when the server rejects the token.
    pub fail_fast_on_auth: bool,
    /// Quiet period before a progress write.
    pub progress_debounce_ms: u64,
    /// Transient-failure retries for a progress write. 0 disables.
    pub progress_http_retries: u32,
    /// Notifications kept in the store.
    pub notification_capacity: usize,
    /// Toast lifetime.
    pub toast_duration_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://localhost:8000/api/v1/ws/notifications".to_string(),
            api_base_url: "http://localhost:8000/api/v1/".to_string(),
            reconnect_interval_ms: 3000,
            max_reconnect_attempts: 5,
            keepalive_interval_secs: 30,
            pong_timeout_secs: None,
            fail_fast_on_auth: true,
            progress_debounce_ms: 1000,
            progress_http_retries: 0,
            notification_capacity: 50,
            toast_duration_ms: 5000,
        }
    }
}

impl RealtimeConfig {
    /// Reads a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Settings for the connection manager.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            base_url: self.ws_base_url.clone(),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs.max(1)),
            pong_timeout: self.pong_timeout_secs.map(Duration::from_secs),
            fail_fast_on_auth: self.fail_fast_on_auth,
        }
    }

    /// Progress quiet period.
    pub fn progress_debounce(&self) -> Duration {
        Duration::from_millis(self.progress_debounce_ms)
    }

    /// Toast lifetime.
    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }
}
