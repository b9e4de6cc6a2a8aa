//! Session context: who is signed in and which organization is active.
//!
//! The realtime channel follows this context. Every change is published on a
//! watch channel; the realtime service turns each value into a [`Scope`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use beacon_socket::Scope;

/// Snapshot of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
}

impl Session {
    pub fn is_signed_in(&self) -> bool {
        self.user_id.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    /// The channel scope for this session, if both parts are present.
    pub fn scope(&self) -> Option<Scope> {
        Scope::from_session(self.user_id.as_deref(), self.organization_id.as_deref())
    }
}

/// Shared, observable session.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionContext {
    tx: Arc<watch::Sender<Session>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    /// Create a signed-out session.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Session::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn scope(&self) -> Option<Scope> {
        self.tx.borrow().scope()
    }

    /// Watch session changes. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn sign_in(&self, user_id: impl Into<String>, organization_id: Option<String>) {
        let user_id = user_id.into();
        info!("signed in (organization: {})", organization_id.as_deref().unwrap_or("none"));
        self.replace(Session {
            user_id: Some(user_id),
            organization_id,
        });
    }

    /// Clear the user and the active organization.
    pub fn sign_out(&self) {
        info!("signed out");
        self.replace(Session::default());
    }

    /// Make another organization active, or none.
    pub fn switch_organization(&self, organization_id: Option<String>) {
        info!(
            "active organization: {}",
            organization_id.as_deref().unwrap_or("none")
        );
        self.tx.send_if_modified(|session| {
            if session.organization_id == organization_id {
                return false;
            }
            session.organization_id = organization_id;
            true
        });
    }

    fn replace(&self, next: Session) {
        self.tx.send_if_modified(|session| {
            if *session == next {
                return false;
            }
            *session = next;
            true
        });
    }
}
