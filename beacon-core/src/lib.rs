//! Beacon Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other Beacon crates:
//! - Application configuration (account API, realtime endpoint, logging, per-user paths)
//! - Global error type covering all error categories
//! - Structured logging with tracing
//! - Common constants

pub mod config;
pub mod error;
pub mod logging;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle, RealtimeConfig};
pub use error::{BeaconError, BeaconResult};
pub use logging::init_logging;
