//! Global error types for the Beacon workspace.
//!
//! All error categories are unified into a single `BeaconError` enum with
//! conversions from underlying library errors. The realtime manager itself
//! never surfaces these to its consumers; they cover setup paths (config,
//! client construction, logging) and internal plumbing.

use thiserror::Error;

/// Convenience type alias for Results using BeaconError.
pub type BeaconResult<T> = Result<T, BeaconError>;

/// Unified error type covering all error categories in Beacon.
#[derive(Error, Debug)]
pub enum BeaconError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A URL in the configuration could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    // -- Network errors --
    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// HTTP request timed out.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Server returned an error response.
    #[error("server error (status {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from server.
        message: String,
    },

    /// WebSocket transport error.
    #[error("socket error: {0}")]
    Socket(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Service errors --
    /// A service failed to initialize.
    #[error("service init error: {0}")]
    ServiceInit(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for BeaconError {
    fn from(e: serde_json::Error) -> Self {
        BeaconError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for BeaconError {
    fn from(e: toml::de::Error) -> Self {
        BeaconError::Config(e.to_string())
    }
}

impl From<url::ParseError> for BeaconError {
    fn from(e: url::ParseError) -> Self {
        BeaconError::InvalidUrl(e.to_string())
    }
}
