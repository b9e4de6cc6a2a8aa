//! Realtime service.
//!
//! Owns the event router and, once started, the connection manager. A small
//! driver task follows the [`SessionContext`] and re-scopes the manager on
//! every sign-in, sign-out and organization switch.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use beacon_api::{ApiClient, HttpTicketFetcher, Ticket, TicketFetcher, TokenStore};
use beacon_core::config::{AppConfig, RealtimeConfig};
use beacon_core::error::{BeaconError, BeaconResult};
use beacon_socket::{
    CacheInvalidator, ConnectionManager, ConnectionState, Connector, EventRouter, InboundMessage,
    ManagerConfig, Subscription, WsConnector,
};

use crate::service::{Service, ServiceState};
use crate::session::{Session, SessionContext};

pub struct RealtimeService {
    state: ServiceState,
    config: RealtimeConfig,
    session: SessionContext,
    router: EventRouter,
    fetcher: Arc<dyn TicketFetcher>,
    connector: Arc<dyn Connector>,
    manager: Option<ConnectionManager>,
    driver: Option<JoinHandle<()>>,
}

impl RealtimeService {
    /// Assemble the service from explicit collaborators.
    pub fn new(
        config: RealtimeConfig,
        session: SessionContext,
        cache: Arc<dyn CacheInvalidator>,
        tokens: Arc<dyn TokenStore>,
        fetcher: Arc<dyn TicketFetcher>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let router = EventRouter::new(cache, tokens)
            .with_auth_invalidation_events(config.auth_invalidation_events.iter().cloned());
        Self {
            state: ServiceState::Created,
            config,
            session,
            router,
            fetcher,
            connector,
            manager: None,
            driver: None,
        }
    }

    /// Assemble the production service: HTTP ticket fetcher and WebSocket
    /// transport.
    ///
    /// An inert realtime config needs no API client, so none is built.
    pub fn from_config(
        config: &AppConfig,
        session: SessionContext,
        cache: Arc<dyn CacheInvalidator>,
        tokens: Arc<dyn TokenStore>,
    ) -> BeaconResult<Self> {
        let fetcher: Arc<dyn TicketFetcher> = if config.realtime.is_active() {
            let client = ApiClient::new(config, Arc::clone(&tokens))?;
            Arc::new(HttpTicketFetcher::new(client))
        } else {
            Arc::new(NoTickets)
        };
        Ok(Self::new(
            config.realtime.clone(),
            session,
            cache,
            tokens,
            fetcher,
            Arc::new(WsConnector),
        ))
    }

    /// Whether this service will ever open a channel.
    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    /// The connection manager, present while the service runs with an
    /// active config.
    pub fn manager(&self) -> Option<&ConnectionManager> {
        self.manager.as_ref()
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Register a message callback. Works before `init` and survives
    /// restarts.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.router.subscribe(callback)
    }

    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<InboundMessage>) {
        self.router.subscribe_channel()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.as_ref().is_some_and(ConnectionManager::is_connected)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager
            .as_ref()
            .map_or(ConnectionState::Idle, ConnectionManager::state)
    }

    /// Watch connection state. `None` while no manager is running.
    pub fn state_receiver(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.manager.as_ref().map(ConnectionManager::state_receiver)
    }

    /// Force a fresh connection for the current session.
    pub fn reconnect(&self) {
        if let Some(manager) = &self.manager {
            manager.reconnect();
        }
    }
}

impl Service for RealtimeService {
    fn name(&self) -> &str {
        "realtime"
    }

    fn state(&self) -> ServiceState {
        self.state
    }

    fn init(&mut self) -> BeaconResult<()> {
        if self.state == ServiceState::Running {
            return Ok(());
        }
        if !self.config.is_active() {
            info!("realtime disabled, no channel will be opened");
            self.state = ServiceState::Running;
            return Ok(());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            self.state = ServiceState::Failed;
            return Err(BeaconError::ServiceInit(
                "realtime service requires a tokio runtime".into(),
            ));
        }

        let manager_config = ManagerConfig::from_realtime(&self.config).map_err(|e| {
            self.state = ServiceState::Failed;
            BeaconError::ServiceInit(format!("realtime: {e}"))
        })?;
        let manager = ConnectionManager::spawn(
            manager_config,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.connector),
            self.router.clone(),
        );

        let mut sessions = self.session.subscribe();
        manager.set_scope(sessions.borrow_and_update().scope());
        self.driver = Some(tokio::spawn(follow_session(manager.clone(), sessions)));
        self.manager = Some(manager);

        info!("realtime service started ({})", self.config.url);
        self.state = ServiceState::Running;
        Ok(())
    }

    fn shutdown(&mut self) -> BeaconResult<()> {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if let Some(manager) = self.manager.take() {
            manager.disconnect();
        }
        self.state = ServiceState::Stopped;
        info!("realtime service stopped");
        Ok(())
    }
}

/// Re-scope the manager on every session change.
async fn follow_session(manager: ConnectionManager, mut sessions: watch::Receiver<Session>) {
    while sessions.changed().await.is_ok() {
        let scope = sessions.borrow_and_update().scope();
        debug!("session changed, realtime scope: {:?}", scope.as_ref().map(ToString::to_string));
        manager.set_scope(scope);
    }
}

/// Stand-in fetcher for an inert config; never asked for a ticket.
struct NoTickets;

#[async_trait]
impl TicketFetcher for NoTickets {
    async fn fetch_ticket(&self, _cancel: &CancellationToken) -> Option<Ticket> {
        None
    }
}
