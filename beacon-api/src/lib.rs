//! Beacon API - HTTP access to the account backend for the realtime channel.
//!
//! This crate provides the HTTP client used to obtain one-time realtime
//! tickets, the `TicketFetcher` seam the connection manager depends on, and
//! the local bearer token cache shared by the client and the event router.

pub mod client;
pub mod ticket;
pub mod token;

// Re-export key types
pub use client::ApiClient;
pub use ticket::{HttpTicketFetcher, Ticket, TicketFetcher};
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore};
