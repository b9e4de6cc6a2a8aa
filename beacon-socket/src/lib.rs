//! Beacon Socket - realtime channel client scoped to the active organization.
//!
//! This crate provides:
//! - The inbound message model (change notifications and broadcast events)
//! - A subscriber set with scoped, idempotent unsubscription
//! - The event router that applies cache/credential side effects before fanout
//! - A WebSocket transport behind the `Connector`/`Channel` seam
//! - The connection manager: one channel at a time, ticket-authenticated,
//!   torn down on scope change and reconnected after a fixed delay

pub mod events;
pub mod manager;
pub mod router;
pub mod subscribers;
pub mod transport;

// Re-export key types
pub use events::{
    BroadcastEvent, ChangeKind, ChangeNotification, ConnectionState, InboundMessage, Scope,
};
pub use manager::{ConnectionManager, ManagerConfig};
pub use router::{CacheInvalidator, EventRouter, NoopCache, RouteOutcome};
pub use subscribers::{SubscriberSet, Subscription};
pub use transport::{Channel, Connector, WsConnector};
