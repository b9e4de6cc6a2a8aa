//! Service trait and lifecycle state.
//!
//! Long-lived components implement `Service` so the host can start and stop
//! them uniformly and ask whether they are healthy.

use beacon_core::error::BeaconResult;

/// Where a service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Stopped,
    /// `init` returned an error; the service holds no background work.
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle shared by long-lived Beacon components.
///
/// Both calls are synchronous. Background work is spawned onto the ambient
/// tokio runtime in `init` and must be stopped by `shutdown`. Calling `init`
/// on a running service is a no-op.
pub trait Service: Send + Sync {
    /// Human-readable name of this service.
    fn name(&self) -> &str;

    /// Current state of this service.
    fn state(&self) -> ServiceState;

    fn init(&mut self) -> BeaconResult<()>;

    fn shutdown(&mut self) -> BeaconResult<()>;

    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}
