//! Application-wide constants.

use std::time::Duration;

/// Application name.
pub const APP_NAME: &str = "Beacon";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default account API timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 30_000;

/// Default path of the realtime ticket endpoint, relative to the API base.
pub const DEFAULT_TICKET_PATH: &str = "/api/realtime/ticket";

/// Fixed delay before a reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Longest wait for the WebSocket handshake of one attempt.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameter carrying the one-time ticket on the channel URL.
pub const TICKET_QUERY_PARAM: &str = "ws_ticket";

/// Query parameter carrying the organization id on the channel URL.
pub const ORGANIZATION_QUERY_PARAM: &str = "organizationId";

/// Broadcast event name that revokes the cached bearer token.
pub const TOKEN_INVALIDATED_EVENT: &str = "auth:token-invalidated";

/// File name of the persisted bearer token inside the data directory.
pub const TOKEN_FILE_NAME: &str = "access_token";

/// Environment variable overrides applied on top of the config file.
pub mod env {
    pub const REALTIME_ENABLED: &str = "BEACON_REALTIME_ENABLED";
    pub const REALTIME_URL: &str = "BEACON_REALTIME_URL";
    pub const API_BASE: &str = "BEACON_API_BASE";
    pub const LOG_LEVEL: &str = "BEACON_LOG_LEVEL";
}
