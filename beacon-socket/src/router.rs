//! Inbound frame routing.
//!
//! Each frame is decoded, its side effects (query cache invalidation and
//! bearer token purge) are applied, and only then is it handed to every
//! subscriber. All of this happens synchronously inside one `route` call.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use beacon_api::TokenStore;
use beacon_core::constants;

use crate::events::InboundMessage;
use crate::subscribers::{DispatchReport, SubscriberSet, Subscription};

/// Target of cache invalidation: a query cache addressed by tag.
pub trait CacheInvalidator: Send + Sync {
    /// Drop every cached result tagged with `tag`. A no-op for unknown tags.
    fn invalidate_tag(&self, tag: &str);
}

/// Cache that holds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl CacheInvalidator for NoopCache {
    fn invalidate_tag(&self, _tag: &str) {}
}

/// What happened to a routed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The frame was not a recognized message and was dropped.
    Dropped,
    /// The frame was decoded and fanned out.
    Delivered(DispatchReport),
}

/// Decodes frames, applies built-in side effects, and fans out to subscribers.
#[derive(Clone)]
pub struct EventRouter {
    cache: Arc<dyn CacheInvalidator>,
    tokens: Arc<dyn TokenStore>,
    auth_invalidation_events: Arc<HashSet<String>>,
    subscribers: SubscriberSet,
}

impl EventRouter {
    /// Create a router that purges the token on `auth:token-invalidated`.
    pub fn new(cache: Arc<dyn CacheInvalidator>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            cache,
            tokens,
            auth_invalidation_events: Arc::new(HashSet::from([
                constants::TOKEN_INVALIDATED_EVENT.to_string(),
            ])),
            subscribers: SubscriberSet::new(),
        }
    }

    /// Replace the set of broadcast event names that purge the token.
    pub fn with_auth_invalidation_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_invalidation_events = Arc::new(events.into_iter().map(Into::into).collect());
        self
    }

    /// The subscriber set owned by this router.
    pub fn subscribers(&self) -> &SubscriberSet {
        &self.subscribers
    }

    /// Register a message callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// Register a subscriber that forwards every message into a channel.
    ///
    /// Messages are dropped silently once the receiver is gone.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribers.subscribe(move |message| {
            let _ = tx.send(message.clone());
        });
        (sub, rx)
    }

    /// Route one raw text frame.
    pub fn route(&self, raw: &str) -> RouteOutcome {
        match InboundMessage::decode(raw) {
            Some(message) => RouteOutcome::Delivered(self.handle(&message)),
            None => {
                trace!("dropping unrecognized frame ({} bytes)", raw.len());
                RouteOutcome::Dropped
            }
        }
    }

    /// Apply side effects for a decoded message, then fan it out.
    pub fn handle(&self, message: &InboundMessage) -> DispatchReport {
        match message {
            InboundMessage::Change(change) => {
                debug!("invalidating queries tagged {}", change.table);
                self.cache.invalidate_tag(&change.table);
            }
            InboundMessage::Broadcast(event) => {
                if self.auth_invalidation_events.contains(&event.event) {
                    info!("authorization changed upstream ({}), purging cached token", event.event);
                    self.tokens.clear();
                }
            }
        }

        let report = self.subscribers.dispatch(message);
        debug!(
            "dispatched {} to {} subscriber(s)",
            message.label(),
            report.delivered + report.failed
        );
        report
    }
}
