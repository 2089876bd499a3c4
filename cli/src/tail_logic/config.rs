use clap::Parser;
use lib_realtime::RealtimeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Tails the LMS real-time notification channel", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RT_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RT_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RT_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RT_TOKEN", hide_env_values = true, help = "Bearer token for the real-time channel and the progress API.")]
    #[serde(skip_serializing)]
    pub token: Option<String>,

    #[clap(long, env = "RT_WS_URL", help = "WebSocket endpoint, without the token.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "RT_API_URL", help = "REST API base URL.")]
    pub api_url: Option<String>,

    #[clap(long = "course", env = "RT_COURSES", value_delimiter = ',', help = "Course id to subscribe to. Repeatable or comma separated.")]
    pub courses: Option<Vec<String>>,

    #[clap(long, env = "RT_RECONNECT_INTERVAL_MS", help = "Fixed delay in milliseconds between reconnect attempts.")]
    pub reconnect_interval_ms: Option<u64>,

    #[clap(long, env = "RT_MAX_RECONNECT_ATTEMPTS", help = "Reconnect attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "RT_KEEPALIVE_INTERVAL_SECS", help = "Seconds between keepalive pings.")]
    pub keepalive_interval_secs: Option<u64>,

    #[clap(long, env = "RT_PONG_TIMEOUT_SECS", help = "Reconnect after this many seconds without inbound traffic.")]
    pub pong_timeout_secs: Option<u64>,

    #[clap(long, env = "RT_FAIL_FAST_ON_AUTH", help = "Stop retrying when the server rejects the token (true/false).")]
    pub fail_fast_on_auth: Option<bool>,

    #[clap(long, env = "RT_CACHE_PATH", help = "Notification cache file. Defaults to the platform data directory.")]
    pub cache_path: Option<PathBuf>,
}

impl Config {
    // 'other' overrides 'self' wherever it has a value
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            token: other.token.or(self.token),
            ws_url: other.ws_url.or(self.ws_url),
            api_url: other.api_url.or(self.api_url),
            courses: other.courses.or(self.courses),
            reconnect_interval_ms: other.reconnect_interval_ms.or(self.reconnect_interval_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            keepalive_interval_secs: other.keepalive_interval_secs.or(self.keepalive_interval_secs),
            pong_timeout_secs: other.pong_timeout_secs.or(self.pong_timeout_secs),
            fail_fast_on_auth: other.fail_fast_on_auth.or(self.fail_fast_on_auth),
            cache_path: other.cache_path.or(self.cache_path),
        }
    }

    /// Library configuration with every unset field left at its default.
    pub fn realtime_config(&self) -> RealtimeConfig {
        let defaults = RealtimeConfig::default();
        RealtimeConfig {
            ws_base_url: self.ws_url.clone().unwrap_or(defaults.ws_base_url),
            api_base_url: self.api_url.clone().unwrap_or(defaults.api_base_url),
            reconnect_interval_ms: self.reconnect_interval_ms.unwrap_or(defaults.reconnect_interval_ms),
            max_reconnect_attempts: self.max_reconnect_attempts.unwrap_or(defaults.max_reconnect_attempts),
            keepalive_interval_secs: self.keepalive_interval_secs.unwrap_or(defaults.keepalive_interval_secs),
            pong_timeout_secs: self.pong_timeout_secs.or(defaults.pong_timeout_secs),
            fail_fast_on_auth: self.fail_fast_on_auth.unwrap_or(defaults.fail_fast_on_auth),
            ..defaults
        }
    }

    pub fn course_ids(&self) -> impl Iterator<Item = &str> {
        self.courses
            .iter()
            .flatten()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
    }
}

fn defaults() -> Config {
    let realtime = RealtimeConfig::default();
    Config {
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        ws_url: Some(realtime.ws_base_url),
        api_url: Some(realtime.api_base_url),
        reconnect_interval_ms: Some(realtime.reconnect_interval_ms),
        max_reconnect_attempts: Some(realtime.max_reconnect_attempts),
        keepalive_interval_secs: Some(realtime.keepalive_interval_secs),
        fail_fast_on_auth: Some(realtime.fail_fast_on_auth),
        ..Default::default()
    }
}

/// Defaults, then the JSON file, then environment and CLI.
pub fn load_config() -> Config {
    let _ = dotenvy::dotenv();
    resolve(Config::parse())
}

fn resolve(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("realtime_tail.conf"));

    let mut current_config = defaults();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    current_config.merge(cli_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime_tail.conf");
        fs::write(
            &path,
            r#"{"wsUrl":"wss://file.example/ws","maxReconnectAttempts":9,"courses":["a","b"]}"#,
        )
        .unwrap();

        let cli = Config {
            config_path: Some(path),
            max_reconnect_attempts: Some(2),
            ..Default::default()
        };
        let config = resolve(cli);

        assert_eq!(config.ws_url.as_deref(), Some("wss://file.example/ws"));
        assert_eq!(config.max_reconnect_attempts, Some(2));
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert_eq!(config.course_ids().collect::<Vec<_>>(), vec!["a", "b"]);

        let realtime = config.realtime_config();
        assert_eq!(realtime.ws_base_url, "wss://file.example/ws");
        assert_eq!(realtime.max_reconnect_attempts, 2);
        assert_eq!(realtime.reconnect_interval_ms, 3000);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "not json").unwrap();

        let config = resolve(Config {
            config_path: Some(path),
            ..Default::default()
        });
        assert_eq!(config.realtime_config(), RealtimeConfig::default());
    }
}
