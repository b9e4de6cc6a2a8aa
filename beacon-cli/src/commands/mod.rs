//! CLI command implementations.

pub mod listen;
pub mod status;
pub mod token;

use std::sync::Arc;

use beacon_api::FileTokenStore;
use beacon_core::config::AppConfig;
use beacon_core::error::BeaconResult;

/// Open the on-disk bearer token cache named by the config.
pub fn open_token_store(config: &AppConfig) -> BeaconResult<Arc<FileTokenStore>> {
    let path = config.effective_token_path()?;
    Ok(Arc::new(FileTokenStore::open(path)?))
}

/// Truncate a string to a maximum number of characters, appending an
/// ellipsis if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Mask a secret for display, keeping only its last four characters.
pub fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{tail}", "*".repeat(count - 4))
}
