//! Configuration system for chat-probe
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (CHAT_PROBE_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

/// Endpoint the probe connects to when nothing else is configured
pub const DEFAULT_URL: &str = "ws://localhost:8070/start";

/// Main probe configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// WebSocket connection settings
    pub connection: ConnectionSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// WebSocket connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// WebSocket URL to connect to
    pub url: String,

    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Maximum time without any inbound frame before the peer is considered gone (0 = never)
    pub idle_timeout_ms: u64,

    /// Keepalive ping interval in milliseconds (0 = disabled)
    pub ping_interval_ms: u64,

    /// How long to wait for the server's close reply after we initiate a close
    pub close_grace_ms: u64,

    /// Upper bound on a single outbound frame write
    pub write_timeout_ms: u64,

    /// Largest message accepted from the server
    pub max_message_bytes: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (None = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout_ms: 10_000,
            idle_timeout_ms: 60_000,
            ping_interval_ms: 30_000,
            close_grace_ms: 2_000,
            write_timeout_ms: 10_000,
            max_message_bytes: 1024 * 1024,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.idle_timeout_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        non_zero_millis(self.ping_interval_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl ProbeConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with_url(config_path, None)
    }

    /// Like [`ProbeConfig::load`], with a URL from the command line taking
    /// precedence over the file and the environment before validation
    pub fn load_with_url(config_path: Option<&str>, url: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        if let Some(url) = url {
            config.connection.url = url.to_string();
        }
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("chat-probe.toml"),
            dirs::config_dir()
                .map(|p| p.join("chat-probe").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".chat-probe").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/chat-probe/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CHAT_PROBE_URL") {
            self.connection.url = val;
        }
        if let Ok(val) = std::env::var("CHAT_PROBE_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.connection.connect_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CHAT_PROBE_CLOSE_GRACE_MS") {
            if let Ok(n) = val.parse() {
                self.connection.close_grace_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CHAT_PROBE_WRITE_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.connection.write_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CHAT_PROBE_IDLE_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.connection.idle_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CHAT_PROBE_PING_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.connection.ping_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("CHAT_PROBE_MAX_MESSAGE_BYTES") {
            if let Ok(n) = val.parse() {
                self.connection.max_message_bytes = n;
            }
        }

        if let Ok(val) = std::env::var("CHAT_PROBE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CHAT_PROBE_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("CHAT_PROBE_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.connection.url)?;

        if self.connection.connect_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "connection.connect_timeout_ms",
                "connect_timeout_ms must be greater than 0",
            ));
        }

        if self.connection.write_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "connection.write_timeout_ms",
                "write_timeout_ms must be greater than 0",
            ));
        }

        if self.connection.max_message_bytes == 0 {
            return Err(Error::config_field_invalid(
                "connection.max_message_bytes",
                "max_message_bytes must be greater than 0",
            ));
        }

        if let (Some(ping), Some(idle)) = (
            self.connection.ping_interval(),
            self.connection.idle_timeout(),
        ) {
            if ping >= idle {
                return Err(Error::config_field_invalid(
                    "connection.ping_interval_ms",
                    "ping_interval_ms must be shorter than idle_timeout_ms",
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

/// Parse and check that a string is a usable WebSocket URL
pub fn validate_url(raw: &str) -> Result<Url> {
    if raw.is_empty() {
        return Err(Error::invalid_url(raw, "URL cannot be empty"));
    }

    let url = Url::parse(raw).map_err(|e| Error::invalid_url(raw, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::invalid_url(
                raw,
                format!("scheme must be ws or wss, got '{}'", other),
            ))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::invalid_url(raw, "URL has no host"));
    }

    Ok(url)
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or(std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chat-probe")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# chat-probe configuration

[connection]
# WebSocket URL of the chat server
url = "ws://localhost:8070/start"

# Handshake timeout in milliseconds
connect_timeout_ms = 10000

# Close the socket if nothing arrives for this long (0 = never)
idle_timeout_ms = 60000

# Keepalive ping interval in milliseconds (0 = disabled)
ping_interval_ms = 30000

# Wait this long for the server's close reply on Ctrl+C
close_grace_ms = 2000

# Give up on the connection if a single frame write takes longer than this
write_timeout_ms = 10000

# Largest message accepted from the server
max_message_bytes = 1048576

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.chat-probe/logs/probe.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
