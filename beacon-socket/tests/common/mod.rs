//! Shared fixtures for manager integration tests: a scripted ticket fetcher,
//! an in-memory transport and a journaling cache.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use url::Url;

use beacon_api::{MemoryTokenStore, Ticket, TicketFetcher, TokenStore};
use beacon_core::error::{BeaconError, BeaconResult};
use beacon_socket::{
    CacheInvalidator, Channel, ConnectionManager, Connector, EventRouter, ManagerConfig, Scope,
};

pub const REALTIME_URL: &str = "wss://realtime";
pub const WAIT: Duration = Duration::from_secs(30);

pub fn acme() -> Scope {
    Scope::new("u-1", "acme")
}

pub fn globex() -> Scope {
    Scope::new("u-1", "globex")
}

/// Ticket fetcher that answers from a script.
///
/// Each call takes the next scripted answer; an exhausted script answers
/// `None`. In endless mode every call gets `tkt-<n>`. With a gate, every call
/// waits for a permit before answering.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Option<Ticket>>>,
    endless: bool,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    honor_cancel: bool,
}

impl ScriptedFetcher {
    pub fn new<I, S>(tickets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(tickets.into_iter().map(|t| Some(Ticket::new(t))).collect()),
            endless: false,
            calls: AtomicUsize::new(0),
            gate: None,
            honor_cancel: true,
        }
    }

    /// Fetcher whose every call fails.
    pub fn unavailable() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn endless() -> Self {
        Self {
            endless: true,
            ..Self::unavailable()
        }
    }

    /// Hold every call until [`ScriptedFetcher::release`]. A gated call
    /// ignores cancellation, like a request already on the wire.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self.honor_cancel = false;
        self
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_answer(&self, call: usize) -> Option<Ticket> {
        if self.endless {
            return Some(Ticket::new(format!("tkt-{call}")));
        }
        self.script.lock().unwrap().pop_front().flatten()
    }
}

#[async_trait]
impl TicketFetcher for ScriptedFetcher {
    async fn fetch_ticket(&self, cancel: &CancellationToken) -> Option<Ticket> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.acquire().await.ok()?.forget();
        }
        if self.honor_cancel && cancel.is_cancelled() {
            return None;
        }
        self.next_answer(call)
    }
}

/// The test's side of an in-memory channel.
///
/// Dropping it closes the channel from the remote side.
pub struct RemoteEnd {
    pub url: Url,
    frames: mpsc::UnboundedSender<String>,
    closed_by_client: Arc<AtomicBool>,
}

impl RemoteEnd {
    pub fn send(&self, frame: &str) {
        let _ = self.frames.send(frame.to_string());
    }

    pub fn organization(&self) -> Option<String> {
        query_param(&self.url, "organizationId")
    }

    pub fn ticket(&self) -> Option<String> {
        query_param(&self.url, "ws_ticket")
    }

    pub fn closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

struct MockChannel {
    frames: mpsc::UnboundedReceiver<String>,
    closed_by_client: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl Channel for MockChannel {
    async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    async fn close(&mut self) {
        self.closed_by_client.store(true, Ordering::SeqCst);
        self.frames.close();
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory connector. Every successful connect hands a [`RemoteEnd`] to
/// the test through [`MockConnector::accept`].
pub struct MockConnector {
    urls: Mutex<Vec<Url>>,
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
    fail_next: AtomicUsize,
    stall_next: AtomicUsize,
    remotes_tx: mpsc::UnboundedSender<RemoteEnd>,
    remotes_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RemoteEnd>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        Self {
            urls: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            stall_next: AtomicUsize::new(0),
            remotes_tx,
            remotes_rx: tokio::sync::Mutex::new(remotes_rx),
        }
    }
}

impl MockConnector {
    /// Refuse the next `count` handshakes.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Leave the next `count` handshakes unanswered, like a peer that
    /// accepts TCP and never replies to the upgrade.
    pub fn stall_next(&self, count: usize) {
        self.stall_next.store(count, Ordering::SeqCst);
    }

    /// Wait for the next opened channel.
    pub async fn accept(&self) -> RemoteEnd {
        let mut remotes = self.remotes_rx.lock().await;
        tokio::time::timeout(WAIT, remotes.recv())
            .await
            .expect("no channel opened in time")
            .expect("connector dropped")
    }

    /// Connection attempts that reached the transport, failed ones included.
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().clone()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> BeaconResult<Box<dyn Channel>> {
        self.urls.lock().unwrap().push(url.clone());
        let refuse = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(BeaconError::Socket("handshake refused".into()));
        }
        let stall = self
            .stall_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stall {
            std::future::pending::<()>().await;
        }

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let closed_by_client = Arc::new(AtomicBool::new(false));
        let _ = self.remotes_tx.send(RemoteEnd {
            url: url.clone(),
            frames: frames_tx,
            closed_by_client: Arc::clone(&closed_by_client),
        });
        Ok(Box::new(MockChannel {
            frames: frames_rx,
            closed_by_client,
            live: Arc::clone(&self.live),
        }))
    }
}

/// Ordered log shared by the cache and by test subscribers.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

pub struct JournalCache(pub Arc<Journal>);

impl CacheInvalidator for JournalCache {
    fn invalidate_tag(&self, tag: &str) {
        self.0.push(format!("invalidate:{tag}"));
    }
}

/// A manager wired to scripted collaborators.
pub struct Harness {
    pub manager: ConnectionManager,
    pub fetcher: Arc<ScriptedFetcher>,
    pub connector: Arc<MockConnector>,
    pub journal: Arc<Journal>,
    pub tokens: Arc<MemoryTokenStore>,
}

impl Harness {
    pub fn new(fetcher: ScriptedFetcher) -> Self {
        Self::with_config(fetcher, manager_config())
    }

    pub fn with_config(fetcher: ScriptedFetcher, config: ManagerConfig) -> Self {
        let fetcher = Arc::new(fetcher);
        let connector = Arc::new(MockConnector::default());
        let journal = Arc::new(Journal::default());
        let tokens = Arc::new(MemoryTokenStore::with_token("bearer-1"));
        let router = EventRouter::new(Arc::new(JournalCache(Arc::clone(&journal))), tokens.clone());
        let manager = ConnectionManager::spawn(config, fetcher.clone(), connector.clone(), router);
        Self {
            manager,
            fetcher,
            connector,
            journal,
            tokens,
        }
    }

    pub fn token(&self) -> Option<String> {
        self.tokens.get()
    }

    pub async fn wait_connected(&self, want: bool) {
        let mut rx = self.manager.connected_receiver();
        tokio::time::timeout(WAIT, rx.wait_for(|c| *c == want))
            .await
            .expect("connected flag did not settle")
            .expect("manager dropped");
    }
}

pub fn manager_config() -> ManagerConfig {
    ManagerConfig::new(Url::parse(REALTIME_URL).unwrap())
}

/// Poll `condition` until it holds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .expect("condition not reached in time");
}

/// Let spawned tasks run without moving the clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, fut).await.expect("timed out")
}
