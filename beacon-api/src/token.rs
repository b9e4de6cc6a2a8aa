//! Local bearer token cache.
//!
//! The account client caches a long-lived bearer token next to the cookie
//! session. The ticket request attaches it when present, and the realtime
//! event router purges it when the backend signals that authorization
//! context changed, so later requests fall back to the cookie session.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

use beacon_core::error::BeaconResult;

/// Storage for the cached bearer token.
///
/// Implementations are synchronous and cheap so they can be called from
/// inside the event router's dispatch without suspending.
pub trait TokenStore: Send + Sync {
    /// Current token, if one is cached.
    fn get(&self) -> Option<String>;

    /// Replace the cached token.
    fn set(&self, token: String);

    /// Remove the cached token. A no-op if nothing is cached.
    fn clear(&self);
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, token: String) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
    }

    fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Token store persisted to a single file.
///
/// The file content is the raw token. Reads are served from memory; writes
/// go through to disk. Disk failures are logged and never propagated, so a
/// read-only data directory degrades to process-local caching.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    cached: RwLock<Option<String>>,
}

impl FileTokenStore {
    /// Open the store, loading any token already on disk.
    pub fn open(path: impl Into<PathBuf>) -> BeaconResult<Self> {
        let path = path.into();
        let cached = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let token = contents.trim().to_string();
                (!token.is_empty()).then_some(token)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), loaded = cached.is_some(), "token store opened");
        Ok(Self {
            path,
            cached: RwLock::new(cached),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, token: &str) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("failed to create token directory: {e}");
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, token) {
            warn!("failed to persist token: {e}");
        }
    }

    fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove token file: {e}"),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<String> {
        self.cached.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, token: String) {
        self.persist(&token);
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
    }

    fn clear(&self) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.remove();
    }
}
