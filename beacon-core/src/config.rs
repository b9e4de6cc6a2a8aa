//! Application configuration management.
//!
//! Handles loading, saving, and accessing application configuration including
//! the account API origin, realtime channel settings, and logging preferences.
//! Configuration is persisted as TOML on disk and may be overridden from the
//! environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{BeaconError, BeaconResult};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Account API connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Realtime channel settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Credential cache settings.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Account API connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Origin of the account API (e.g., "https://app.example.com").
    #[serde(default)]
    pub api_base: String,

    /// Session cookie for clients without a browser cookie store
    /// (e.g., "session=abc123").
    #[serde(default)]
    pub session_cookie: Option<String>,

    /// API request timeout in milliseconds.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_ms: u64,

    /// Whether to accept invalid TLS certificates from the server.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Realtime channel configuration.
///
/// The subsystem is inert unless `enabled` is set and `url` is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Feature flag for the realtime channel.
    #[serde(default)]
    pub enabled: bool,

    /// WebSocket base URL (e.g., "wss://realtime.example.com/").
    #[serde(default)]
    pub url: String,

    /// Path of the ticket endpoint, relative to `server.api_base`.
    #[serde(default = "default_ticket_path")]
    pub ticket_path: String,

    /// Fixed delay between a closure and the next connect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Consecutive failed attempts tolerated before giving up (0 = unlimited).
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Handshake time limit for one connect attempt.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Broadcast event names that revoke the cached bearer token.
    #[serde(default = "default_auth_invalidation_events")]
    pub auth_invalidation_events: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

/// Credential cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Path of the cached bearer token. If empty, uses the data directory.
    #[serde(default)]
    pub token_file: String,
}

// Default value functions for serde

fn default_api_timeout() -> u64 {
    constants::DEFAULT_API_TIMEOUT_MS
}

fn default_ticket_path() -> String {
    constants::DEFAULT_TICKET_PATH.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    constants::DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

fn default_handshake_timeout_ms() -> u64 {
    constants::DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64
}

fn default_auth_invalidation_events() -> Vec<String> {
    vec![constants::TOKEN_INVALIDATED_EVENT.to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            session_cookie: None,
            api_timeout_ms: default_api_timeout(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            ticket_path: default_ticket_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            auth_invalidation_events: default_auth_invalidation_events(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl RealtimeConfig {
    /// Whether a connection may ever be attempted with this configuration.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.url.trim().is_empty()
    }

    /// The fixed reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Parse the configured realtime URL.
    pub fn parsed_url(&self) -> BeaconResult<url::Url> {
        let trimmed = self.url.trim();
        if trimmed.is_empty() {
            return Err(BeaconError::MissingConfig("realtime.url".into()));
        }
        Ok(url::Url::parse(trimmed)?)
    }
}

impl AppConfig {
    /// Load the default config file, or defaults when there is none.
    ///
    /// Returns the path that was read alongside the config.
    pub fn load_default() -> BeaconResult<(Self, Option<PathBuf>)> {
        match Self::default_config_path() {
            Ok(path) if path.exists() => Ok((Self::load_from_file(&path)?, Some(path))),
            _ => Ok((Self::default(), None)),
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> BeaconResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> BeaconResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| BeaconError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> BeaconResult<PathBuf> {
        Ok(config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> BeaconResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Get the effective bearer token cache path.
    pub fn effective_token_path(&self) -> BeaconResult<PathBuf> {
        if self.auth.token_file.is_empty() {
            Ok(data_dir()?.join(constants::TOKEN_FILE_NAME))
        } else {
            Ok(PathBuf::from(&self.auth.token_file))
        }
    }

    /// Full URL of the ticket endpoint.
    pub fn ticket_url(&self) -> BeaconResult<String> {
        let base = Self::sanitize_api_base(&self.server.api_base);
        if base.is_empty() {
            return Err(BeaconError::MissingConfig("server.api_base".into()));
        }
        let path = self.realtime.ticket_path.trim();
        if path.starts_with('/') {
            Ok(format!("{base}{path}"))
        } else {
            Ok(format!("{base}/{path}"))
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable boolean values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(constants::env::REALTIME_ENABLED) {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.realtime.enabled = true,
                "0" | "false" | "no" | "off" => self.realtime.enabled = false,
                other => tracing::warn!("ignoring {}={other}", constants::env::REALTIME_ENABLED),
            }
        }
        if let Some(v) = lookup(constants::env::REALTIME_URL) {
            self.realtime.url = v.trim().to_string();
        }
        if let Some(v) = lookup(constants::env::API_BASE) {
            self.server.api_base = Self::sanitize_api_base(&v);
        }
        if let Some(v) = lookup(constants::env::LOG_LEVEL) {
            self.logging.level = v.trim().to_string();
        }
    }

    /// Normalize an API origin: trims whitespace and quotes, strips trailing
    /// slashes, and defaults to https when no scheme is given.
    pub fn sanitize_api_base(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Per-user data directory (`~/.local/share/Beacon` on Linux).
fn data_dir() -> BeaconResult<PathBuf> {
    dirs::data_dir()
        .map(|base| base.join(constants::APP_NAME))
        .ok_or_else(|| BeaconError::Config("could not determine data directory".into()))
}

/// Per-user config directory (`~/.config/Beacon` on Linux).
fn config_dir() -> BeaconResult<PathBuf> {
    dirs::config_dir()
        .map(|base| base.join(constants::APP_NAME))
        .ok_or_else(|| BeaconError::Config("could not determine config directory".into()))
}

/// Thread-safe configuration holder for shared access across services.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }
}
