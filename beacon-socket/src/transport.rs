//! Channel transport.
//!
//! The connection manager talks to the network only through [`Connector`]
//! and [`Channel`], so tests can drive it with in-memory channels. The
//! production implementation is a plain WebSocket client.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use beacon_api::Ticket;
use beacon_core::constants;
use beacon_core::error::{BeaconError, BeaconResult};

/// Opens channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel and complete the transport handshake.
    async fn connect(&self, url: &Url) -> BeaconResult<Box<dyn Channel>>;
}

/// A live, receive-only channel.
#[async_trait]
pub trait Channel: Send {
    /// Next text frame, or `None` once the channel is closed for any reason.
    ///
    /// Must be cancel-safe: the manager races it against teardown.
    async fn recv(&mut self) -> Option<String>;

    /// Close the channel from our side.
    async fn close(&mut self);
}

/// Build the channel URL for one attempt: the base URL plus the one-time
/// ticket and the organization id as query parameters.
pub fn channel_url(base: &Url, ticket: &Ticket, organization_id: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair(constants::TICKET_QUERY_PARAM, ticket.as_str())
        .append_pair(constants::ORGANIZATION_QUERY_PARAM, organization_id);
    url
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> BeaconResult<Box<dyn Channel>> {
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| BeaconError::Socket(format!("websocket connect failed: {e}")))?;
        debug!("websocket handshake complete (status {})", response.status());
        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Channel for WsChannel {
    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Close(frame)) => {
                    debug!("websocket closed by server: {:?}", frame);
                    return None;
                }
                // Control frames are answered by tungstenite; binary is not part of the protocol.
                Ok(_) => continue,
                Err(e) => {
                    debug!("websocket read error: {e}");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("websocket close error: {e}");
        }
    }
}
