//! One-time realtime tickets and the fetcher seam used by the connection manager.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ApiClient;

/// Opaque, short-lived, single-use connection credential.
///
/// A fresh ticket is obtained for every connection attempt. The value is
/// redacted from `Debug` output so it never lands in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Ticket(String);

impl Ticket {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Ticket(..)")
    }
}

/// Source of one-time realtime tickets.
///
/// Never fails loudly: every failure mode collapses to `None`, meaning
/// "no connection possible right now". Implementations should return
/// `None` promptly once `cancel` fires.
#[async_trait]
pub trait TicketFetcher: Send + Sync {
    async fn fetch_ticket(&self, cancel: &CancellationToken) -> Option<Ticket>;
}

/// Ticket fetcher backed by the account API's ticket endpoint.
#[derive(Clone)]
pub struct HttpTicketFetcher {
    client: ApiClient,
}

impl HttpTicketFetcher {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TicketFetcher for HttpTicketFetcher {
    async fn fetch_ticket(&self, cancel: &CancellationToken) -> Option<Ticket> {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("ticket request abandoned: attempt cancelled");
                None
            }
            result = self.client.request_ticket() => match result {
                Ok(ticket) => Some(ticket),
                Err(e) => {
                    warn!("ticket request failed: {e}");
                    None
                }
            },
        }
    }
}
