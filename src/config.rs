//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `COURIER_*` environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::api::{AuthConfig, ServerConfig};
use crate::websocket::{HubConfig, SessionConfig, SessionPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid(format!("unknown log format '{}'", other))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("courier").join("config.toml")),
            Some(PathBuf::from("/etc/courier/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;

        if session.ping_interval_ms == 0 || session.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session timeouts must be greater than zero".to_string(),
            ));
        }
        if session.ping_interval_ms >= session.read_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "session.ping_interval_ms ({}) must be less than session.read_timeout_ms ({})",
                session.ping_interval_ms, session.read_timeout_ms
            )));
        }
        if session.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.write_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if session.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "session.max_frame_bytes must be greater than zero".to_string(),
            ));
        }
        if self.hub.queue_capacity == 0 || self.hub.command_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub capacities must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(host) = var("COURIER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("COURIER_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid COURIER_PORT '{}'", port),
            }
        }
        if let Some(grace) = var("COURIER_SHUTDOWN_GRACE_SECS").and_then(|v| v.parse().ok()) {
            self.server.shutdown_grace_secs = grace;
        }

        // Hub overrides
        if let Some(capacity) = var("COURIER_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.hub.queue_capacity = capacity;
        }
        if let Some(policy) = var("COURIER_SESSION_POLICY") {
            match policy.as_str() {
                "multiple" => self.hub.session_policy = SessionPolicy::Multiple,
                "last_connect_wins" => self.hub.session_policy = SessionPolicy::LastConnectWins,
                other => tracing::warn!("Ignoring unknown COURIER_SESSION_POLICY '{}'", other),
            }
        }

        // Auth overrides
        if let Some(token) = var("COURIER_PUSH_TOKEN") {
            self.auth.push_token = Some(token).filter(|t| !t.is_empty());
        }

        // Logging overrides
        if let Some(level) = var("COURIER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("COURIER_LOG_FORMAT") {
            match format.parse() {
                Ok(f) => self.logging.format = f,
                Err(e) => tracing::warn!("Ignoring COURIER_LOG_FORMAT: {}", e),
            }
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Courier Configuration
#
# Environment variables override these settings:
# - COURIER_HOST
# - COURIER_PORT
# - COURIER_SHUTDOWN_GRACE_SECS
# - COURIER_QUEUE_CAPACITY
# - COURIER_SESSION_POLICY
# - COURIER_PUSH_TOKEN
# - COURIER_LOG_LEVEL
# - COURIER_LOG_FORMAT

[server]
# Server host
host = "0.0.0.0"

# Server port
port = 8080

# Allowed CORS origins (empty allows any)
cors_origins = []

# Seconds to wait for sessions to close on shutdown
shutdown_grace_secs = 5

[hub]
# Outbound messages buffered per session before it is evicted
queue_capacity = 256

# Pending hub commands before producers wait
command_capacity = 1024

# "multiple" or "last_connect_wins"
session_policy = "multiple"

# Copy direct chat messages to the sender's other sessions
echo_direct_messages = true

# Event types clients may broadcast to everyone else
relayed_event_types = ["comment_added", "comment_updated", "comment_deleted", "post_reactions_updated"]

[session]
# Drop a connection after this long without any frame (ms)
read_timeout_ms = 60000

# Deadline for each outbound write (ms)
write_timeout_ms = 10000

# Heartbeat ping period, must be below read_timeout_ms (ms)
ping_interval_ms = 54000

# Largest inbound frame accepted (bytes)
max_frame_bytes = 512

[auth]
# Header carrying the user id verified by the upstream proxy
user_header = "x-user-id"

# Accept ?user_id= on the upgrade URL
allow_query_user_id = false

# Bearer token for the push API (unset leaves it open)
# push_token = "change-me"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty, json
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hub.queue_capacity, 256);
        assert_eq!(config.session.read_timeout_ms, 60_000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_config_round_trips() {
        let file = write_config(&generate_default_config());
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.shutdown_grace_secs, 5);
        assert_eq!(config.hub.session_policy, SessionPolicy::Multiple);
        assert_eq!(config.hub.relayed_event_types.len(), 4);
        assert_eq!(config.session.max_frame_bytes, 512);
        assert_eq!(config.auth.user_header, "x-user-id");
        assert!(config.auth.push_token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let file = write_config(
            r#"
[hub]
session_policy = "last_connect_wins"

[logging]
format = "json"
"#,
        );
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.hub.session_policy, SessionPolicy::LastConnectWins);
        assert_eq!(config.hub.queue_capacity, 256);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/courier.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let file = write_config("[hub]\nsession_policy = \"sometimes\"\n");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate_heartbeat_below_read_timeout() {
        let mut config = Config::default();
        config.session.ping_interval_ms = config.session.read_timeout_ms;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.hub.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COURIER_HOST", "127.0.0.1"),
            ("COURIER_PORT", "9000"),
            ("COURIER_SESSION_POLICY", "last_connect_wins"),
            ("COURIER_PUSH_TOKEN", "secret"),
            ("COURIER_LOG_FORMAT", "JSON"),
            ("COURIER_QUEUE_CAPACITY", "not a number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.addr(), "127.0.0.1:9000");
        assert_eq!(config.hub.session_policy, SessionPolicy::LastConnectWins);
        assert_eq!(config.auth.push_token.as_deref(), Some("secret"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.hub.queue_capacity, 256);
    }
}
