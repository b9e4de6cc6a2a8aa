//! Shared test utilities for service integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use beacon_api::{Ticket, TicketFetcher, TokenStore};
use beacon_core::config::RealtimeConfig;
use beacon_core::error::BeaconResult;
use beacon_services::{QueryCache, RealtimeService, SessionContext};
use beacon_socket::{Channel, Connector};

pub const WAIT: Duration = Duration::from_secs(30);

/// Hands out `tkt-1`, `tkt-2`, ... and counts requests.
#[derive(Default)]
pub struct CountingFetcher {
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketFetcher for CountingFetcher {
    async fn fetch_ticket(&self, _cancel: &CancellationToken) -> Option<Ticket> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Some(Ticket::new(format!("tkt-{n}")))
    }
}

/// Server side of a loopback channel. Dropping it closes the channel.
pub struct Peer {
    pub url: Url,
    frames: mpsc::UnboundedSender<String>,
}

impl Peer {
    pub fn push(&self, frame: &str) {
        let _ = self.frames.send(frame.to_string());
    }

    pub fn organization(&self) -> String {
        self.url
            .query_pairs()
            .find(|(k, _)| k == "organizationId")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }
}

struct LoopbackChannel {
    frames: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Channel for LoopbackChannel {
    async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}

pub struct LoopbackConnector {
    peers_tx: mpsc::UnboundedSender<Peer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Peer>>,
    connects: Mutex<Vec<Url>>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
            connects: Mutex::new(Vec::new()),
        }
    }
}

impl LoopbackConnector {
    pub async fn next_peer(&self) -> Peer {
        let mut peers = self.peers_rx.lock().await;
        tokio::time::timeout(WAIT, peers.recv())
            .await
            .expect("no channel opened in time")
            .expect("connector dropped")
    }

    pub fn connects(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &Url) -> BeaconResult<Box<dyn Channel>> {
        self.connects.lock().unwrap().push(url.clone());
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let _ = self.peers_tx.send(Peer {
            url: url.clone(),
            frames: frames_tx,
        });
        Ok(Box::new(LoopbackChannel { frames: frames_rx }))
    }
}

pub fn active_config() -> RealtimeConfig {
    RealtimeConfig {
        enabled: true,
        url: "wss://realtime".into(),
        ..RealtimeConfig::default()
    }
}

/// A realtime service over loopback collaborators.
pub struct Fixture {
    pub service: RealtimeService,
    pub session: SessionContext,
    pub cache: Arc<QueryCache>,
    pub fetcher: Arc<CountingFetcher>,
    pub connector: Arc<LoopbackConnector>,
}

impl Fixture {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self::with_config(active_config(), tokens)
    }

    pub fn with_config(config: RealtimeConfig, tokens: Arc<dyn TokenStore>) -> Self {
        let session = SessionContext::new();
        let cache = Arc::new(QueryCache::new());
        let fetcher = Arc::new(CountingFetcher::default());
        let connector = Arc::new(LoopbackConnector::default());
        let service = RealtimeService::new(
            config,
            session.clone(),
            cache.clone(),
            tokens,
            fetcher.clone(),
            connector.clone(),
        );
        Self {
            service,
            session,
            cache,
            fetcher,
            connector,
        }
    }

    pub async fn wait_connected(&self, want: bool) {
        let manager = self.service.manager().expect("service not started");
        let mut rx = manager.connected_receiver();
        tokio::time::timeout(WAIT, rx.wait_for(|c| *c == want))
            .await
            .expect("connected flag did not settle")
            .expect("manager dropped");
    }
}
