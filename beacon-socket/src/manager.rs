//! Realtime connection manager.
//!
//! Maintains at most one channel, bound to the current [`Scope`]. Every
//! connection attempt authenticates with a freshly fetched one-time ticket.
//! A channel lost without being asked to close is reopened after a fixed
//! delay, for the same scope, with a new ticket.
//!
//! The manager is a single actor task. Commands from the
//! [`ConnectionManager`] handle, attempt results and timer fires all arrive
//! on channels and are processed one at a time, so channel state needs no
//! lock. Ticket fetches, handshakes and channel reads run in per-attempt
//! helper tasks that report back tagged with their attempt id; reports from
//! superseded attempts are discarded.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use beacon_api::TicketFetcher;
use beacon_core::config::RealtimeConfig;
use beacon_core::constants;
use beacon_core::error::{BeaconError, BeaconResult};

use crate::events::{ConnectionState, InboundMessage, Scope};
use crate::router::EventRouter;
use crate::subscribers::Subscription;
use crate::transport::{channel_url, Channel, Connector};

/// Upper bound on a graceful close before the channel is simply dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection parameters for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Realtime endpoint; ticket and organization are appended per attempt.
    pub url: Url,
    /// Fixed delay between a lost channel and the next attempt.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Longest wait for the transport handshake before the attempt fails.
    pub handshake_timeout: Duration,
}

impl ManagerConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_delay: constants::DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: 0,
            handshake_timeout: constants::DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Build from the `[realtime]` config section.
    ///
    /// Fails when the realtime URL is missing or unparseable. Callers check
    /// [`RealtimeConfig::is_active`] first.
    pub fn from_realtime(config: &RealtimeConfig) -> BeaconResult<Self> {
        Ok(Self {
            url: config.parsed_url()?,
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            handshake_timeout: config.handshake_timeout(),
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Why the handle asked the actor to retarget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reason {
    ScopeChanged,
    Disconnect,
    Reconnect,
}

/// Instruction from the handle: tear down, then connect to `scope` if any.
#[derive(Debug)]
struct Command {
    scope: Option<Scope>,
    generation: u64,
    reason: Reason,
}

/// Report from an attempt task or the reconnect timer.
#[derive(Debug)]
enum AttemptEvent {
    TicketUnavailable { id: u64 },
    ConnectFailed { id: u64, error: String },
    Opened { id: u64 },
    Frame { id: u64, text: String },
    Closed { id: u64 },
    ReconnectDue { seq: u64 },
}

/// State the handle and the actor both touch.
///
/// `generation` increases with every command. The handle cancels the live
/// attempt under this lock before queueing a command, so the cancellation is
/// visible before the caller returns.
struct Control {
    requested: Option<Scope>,
    generation: u64,
    attempt: Option<CancellationToken>,
}

struct Shared {
    control: Mutex<Control>,
    state_tx: watch::Sender<ConnectionState>,
    connected_tx: watch::Sender<bool>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to the realtime connection manager.
///
/// Cheap to clone. The actor shuts down, closing any open channel, once
/// every handle has been dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    router: EventRouter,
}

impl ConnectionManager {
    /// Spawn the manager actor. Must be called within a tokio runtime.
    ///
    /// The manager starts `Idle`; nothing connects until [`set_scope`] is
    /// called with a full scope.
    ///
    /// [`set_scope`]: ConnectionManager::set_scope
    pub fn spawn(
        config: ManagerConfig,
        fetcher: Arc<dyn TicketFetcher>,
        connector: Arc<dyn Connector>,
        router: EventRouter,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (connected_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                requested: None,
                generation: 0,
                attempt: None,
            }),
            state_tx,
            connected_tx,
        });

        let actor = Actor {
            config,
            fetcher,
            connector,
            router: router.clone(),
            shared: Arc::clone(&shared),
            commands: commands_rx,
            events_tx,
            events_rx,
            scope: None,
            generation: 0,
            next_attempt_id: 0,
            attempt: None,
            draining: Vec::new(),
            timer: None,
            next_timer_seq: 0,
            failures: 0,
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            shared,
            router,
        }
    }

    /// Point the manager at a new scope.
    ///
    /// A different scope tears down the current channel, in-flight attempt
    /// and pending reconnect before anything else happens; the in-flight
    /// attempt is cancelled before this returns. `None` leaves the manager
    /// idle. Passing the current scope again does nothing.
    pub fn set_scope(&self, scope: Option<Scope>) {
        let mut control = self.shared.control();
        if control.requested == scope {
            debug!("realtime scope unchanged");
            return;
        }
        control.requested = scope.clone();
        self.retarget(&mut control, scope, Reason::ScopeChanged);
    }

    /// Close the channel and stay idle. Idempotent.
    ///
    /// The scope is forgotten, so a later `set_scope` with the same scope
    /// connects again.
    pub fn disconnect(&self) {
        let mut control = self.shared.control();
        control.requested = None;
        self.retarget(&mut control, None, Reason::Disconnect);
    }

    /// Drop the current channel and start over with a fresh ticket.
    ///
    /// Also resets the retry ceiling. Does nothing beyond teardown when no
    /// scope is set.
    pub fn reconnect(&self) {
        let mut control = self.shared.control();
        let scope = control.requested.clone();
        self.retarget(&mut control, scope, Reason::Reconnect);
    }

    fn retarget(&self, control: &mut Control, scope: Option<Scope>, reason: Reason) {
        control.generation += 1;
        if let Some(attempt) = control.attempt.take() {
            attempt.cancel();
        }
        self.shared.connected_tx.send_replace(false);
        let command = Command {
            scope,
            generation: control.generation,
            reason,
        };
        if self.commands.send(command).is_err() {
            warn!("realtime manager has stopped, {reason:?} ignored");
        }
    }

    /// The scope most recently requested through this manager.
    pub fn scope(&self) -> Option<Scope> {
        self.shared.control().requested.clone()
    }

    /// True only while a channel is open.
    pub fn is_connected(&self) -> bool {
        *self.shared.connected_tx.borrow()
    }

    pub fn connected_receiver(&self) -> watch::Receiver<bool> {
        self.shared.connected_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Register a message callback. Subscriptions survive reconnects.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.router.subscribe(callback)
    }

    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<InboundMessage>) {
        self.router.subscribe_channel()
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }
}

struct Attempt {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    opened: bool,
}

struct Timer {
    seq: u64,
    handle: JoinHandle<()>,
}

struct Actor {
    config: ManagerConfig,
    fetcher: Arc<dyn TicketFetcher>,
    connector: Arc<dyn Connector>,
    router: EventRouter,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<AttemptEvent>,
    events_rx: mpsc::UnboundedReceiver<AttemptEvent>,
    scope: Option<Scope>,
    generation: u64,
    next_attempt_id: u64,
    attempt: Option<Attempt>,
    /// Cancelled attempts that may still hold a channel.
    draining: Vec<JoinHandle<()>>,
    timer: Option<Timer>,
    next_timer_seq: u64,
    failures: u32,
}

impl Actor {
    async fn run(mut self) {
        debug!("realtime manager started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
            }
        }

        self.teardown();
        self.scope = None;
        self.set_state(ConnectionState::Idle);
        debug!("realtime manager stopped");
    }

    fn on_command(&mut self, command: Command) {
        debug!(
            generation = command.generation,
            "realtime command: {:?}", command.reason
        );
        self.generation = command.generation;
        self.teardown();
        self.failures = 0;
        self.scope = command.scope;

        match self.scope.clone() {
            None => self.set_state(ConnectionState::Idle),
            Some(scope) => self.start_attempt(scope),
        }
    }

    fn on_event(&mut self, event: AttemptEvent) {
        match event {
            AttemptEvent::ReconnectDue { seq } => {
                if self.timer.as_ref().map(|t| t.seq) != Some(seq) {
                    return;
                }
                self.timer = None;
                if let Some(scope) = self.scope.clone() {
                    info!("reconnecting to {scope}");
                    self.start_attempt(scope);
                }
            }
            AttemptEvent::TicketUnavailable { id } => {
                if self.is_current(id) {
                    warn!("no realtime ticket, will retry");
                    self.attempt_failed();
                }
            }
            AttemptEvent::ConnectFailed { id, error } => {
                if self.is_current(id) {
                    warn!("realtime connect failed: {error}");
                    self.attempt_failed();
                }
            }
            AttemptEvent::Opened { id } => self.on_opened(id),
            AttemptEvent::Frame { id, text } => {
                if self.is_current(id) {
                    self.router.route(&text);
                }
            }
            AttemptEvent::Closed { id } => {
                if !self.is_current(id) {
                    return;
                }
                let opened = self.attempt.as_ref().map_or(false, |a| a.opened);
                if opened {
                    info!("realtime channel closed by remote");
                    self.retire_attempt();
                    self.schedule_reconnect();
                } else {
                    warn!("realtime channel closed before opening");
                    self.attempt_failed();
                }
            }
        }
    }

    /// Whether `id` names the live, uncancelled attempt.
    fn is_current(&self, id: u64) -> bool {
        self.attempt
            .as_ref()
            .map_or(false, |a| a.id == id && !a.cancel.is_cancelled())
    }

    fn on_opened(&mut self, id: u64) {
        if !self.is_current(id) {
            return;
        }
        let Some(scope) = self.scope.clone() else {
            return;
        };

        // Checked under the handle's lock so a concurrent teardown cannot
        // leave the flag raised.
        {
            let control = self.shared.control();
            let cancelled = self.attempt.as_ref().map_or(true, |a| a.cancel.is_cancelled());
            if control.generation != self.generation || cancelled {
                return;
            }
            self.shared.connected_tx.send_replace(true);
        }

        if let Some(attempt) = self.attempt.as_mut() {
            attempt.opened = true;
        }
        self.failures = 0;
        self.set_state(ConnectionState::Open(scope));
    }

    fn start_attempt(&mut self, scope: Scope) {
        let cancel = CancellationToken::new();
        {
            let mut control = self.shared.control();
            if control.generation != self.generation {
                // A newer command is queued and will decide what happens next.
                debug!("realtime attempt superseded before start");
                return;
            }
            control.attempt = Some(cancel.clone());
        }

        self.next_attempt_id += 1;
        let id = self.next_attempt_id;
        self.set_state(ConnectionState::Connecting(scope.clone()));

        let draining = std::mem::take(&mut self.draining);
        let task = tokio::spawn(run_attempt(
            AttemptContext {
                id,
                scope,
                url: self.config.url.clone(),
                handshake_timeout: self.config.handshake_timeout,
                fetcher: Arc::clone(&self.fetcher),
                connector: Arc::clone(&self.connector),
                events: self.events_tx.clone(),
                cancel: cancel.clone(),
            },
            draining,
        ));

        self.attempt = Some(Attempt {
            id,
            cancel,
            task,
            opened: false,
        });
    }

    /// Forget the current attempt after it ended on its own.
    fn retire_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            self.draining.push(attempt.task);
        }
        self.shared.connected_tx.send_replace(false);
        if let Some(scope) = self.scope.clone() {
            self.set_state(ConnectionState::Closed {
                scope,
                intentional: false,
            });
        }
    }

    fn attempt_failed(&mut self) {
        self.retire_attempt();
        self.failures += 1;

        let ceiling = self.config.max_reconnect_attempts;
        if ceiling > 0 && self.failures > ceiling {
            if let Some(scope) = self.scope.clone() {
                warn!(
                    "realtime gave up after {} consecutive failed attempts",
                    self.failures
                );
                self.set_state(ConnectionState::Failed(scope));
            }
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_timer();
        self.next_timer_seq += 1;
        let seq = self.next_timer_seq;
        let delay = self.config.reconnect_delay;
        let events = self.events_tx.clone();
        debug!("realtime reconnect in {delay:?}");
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(AttemptEvent::ReconnectDue { seq });
        });
        self.timer = Some(Timer { seq, handle });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }

    /// Cancel the timer and the live attempt. The attempt's channel, if any,
    /// is closed by its own task.
    fn teardown(&mut self) {
        self.cancel_timer();
        self.draining.retain(|task| !task.is_finished());
        self.shared.connected_tx.send_replace(false);

        if let Some(attempt) = self.attempt.take() {
            attempt.cancel.cancel();
            self.draining.push(attempt.task);
            if let Some(scope) = self.scope.clone() {
                self.set_state(ConnectionState::Closed {
                    scope,
                    intentional: true,
                });
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.shared.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("realtime state: {} -> {}", current, next);
            *current = next;
            true
        });
    }
}

struct AttemptContext {
    id: u64,
    scope: Scope,
    url: Url,
    handshake_timeout: Duration,
    fetcher: Arc<dyn TicketFetcher>,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<AttemptEvent>,
    cancel: CancellationToken,
}

impl AttemptContext {
    fn report(&self, event: AttemptEvent) {
        let _ = self.events.send(event);
    }
}

/// One connection attempt, from ticket to close.
async fn run_attempt(ctx: AttemptContext, draining: Vec<JoinHandle<()>>) {
    // Earlier attempts must have released their channel first.
    for task in draining {
        let _ = task.await;
    }
    if ctx.cancel.is_cancelled() {
        return;
    }

    let Some(ticket) = ctx.fetcher.fetch_ticket(&ctx.cancel).await else {
        if !ctx.cancel.is_cancelled() {
            ctx.report(AttemptEvent::TicketUnavailable { id: ctx.id });
        }
        return;
    };
    if ctx.cancel.is_cancelled() {
        debug!("discarding ticket for cancelled attempt {}", ctx.id);
        return;
    }

    let url = channel_url(&ctx.url, &ticket, &ctx.scope.organization_id);
    debug!(attempt = ctx.id, "opening realtime channel for {}", ctx.scope);

    let connected = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            debug!("realtime handshake abandoned for attempt {}", ctx.id);
            return;
        }
        result = timeout(ctx.handshake_timeout, ctx.connector.connect(&url)) => {
            result.unwrap_or_else(|_| {
                Err(BeaconError::Timeout(format!(
                    "handshake did not complete within {:?}",
                    ctx.handshake_timeout
                )))
            })
        }
    };
    let mut channel = match connected {
        Ok(channel) => channel,
        Err(e) => {
            if !ctx.cancel.is_cancelled() {
                ctx.report(AttemptEvent::ConnectFailed {
                    id: ctx.id,
                    error: e.to_string(),
                });
            }
            return;
        }
    };
    if ctx.cancel.is_cancelled() {
        close_channel(channel.as_mut()).await;
        return;
    }

    ctx.report(AttemptEvent::Opened { id: ctx.id });
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                close_channel(channel.as_mut()).await;
                return;
            }
            frame = channel.recv() => match frame {
                Some(text) => ctx.report(AttemptEvent::Frame { id: ctx.id, text }),
                None => {
                    ctx.report(AttemptEvent::Closed { id: ctx.id });
                    return;
                }
            },
        }
    }
}

async fn close_channel(channel: &mut dyn Channel) {
    if timeout(CLOSE_TIMEOUT, channel.close()).await.is_err() {
        debug!("realtime channel close timed out");
    }
}
