//! Beacon Services - application-side wiring for the realtime channel.
//!
//! This crate provides:
//! - The `Service` lifecycle trait
//! - The session context (signed-in user and active organization)
//! - A tag-addressed query cache invalidated by change notifications
//! - The realtime service that binds the connection manager to the session

pub mod query_cache;
pub mod realtime;
pub mod service;
pub mod session;

// Re-export key types
pub use query_cache::{CachedQuery, QueryCache};
pub use realtime::RealtimeService;
pub use service::{Service, ServiceState};
pub use session::{Session, SessionContext};
