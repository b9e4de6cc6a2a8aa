//! Realtime message model, connection scope, and connection state.
//!
//! Inbound frames are JSON text with a `type` discriminator. Two shapes are
//! recognized; anything else (keep-alives, future message kinds, garbage)
//! decodes to nothing and is dropped by the router.

use serde::{Deserialize, Serialize};

/// Kind of row change carried by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A row was created (`INSERT`).
    #[serde(rename = "INSERT")]
    Created,
    /// A row was updated (`UPDATE`).
    #[serde(rename = "UPDATE")]
    Updated,
    /// A row was deleted (`DELETE`).
    #[serde(rename = "DELETE")]
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to a logical resource (database table) on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    /// Resource name; also the cache tag invalidated on receipt.
    pub table: String,
    /// Schema the resource lives in, when the server sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// What happened to the row.
    pub event_type: ChangeKind,
    /// Row data after the change (absent for deletes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
    /// Row data before the change (absent for inserts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<serde_json::Value>,
    /// Server commit time, passed through verbatim.
    #[serde(default, rename = "commit_timestamp", skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
}

/// A named application event pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    /// Event name (e.g. `auth:token-invalidated`).
    pub event: String,
    /// Arbitrary payload; `null` when the server sent none.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "postgres_changes")]
    Change(ChangeNotification),
    #[serde(rename = "broadcast")]
    Broadcast(BroadcastEvent),
}

/// Wire-level view of a frame, including the unrecognized fallthrough.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum Frame {
    #[serde(rename = "postgres_changes")]
    Change(ChangeNotification),
    #[serde(rename = "broadcast")]
    Broadcast(BroadcastEvent),
    #[serde(other)]
    Unrecognized,
}

impl InboundMessage {
    /// Decode a raw text frame.
    ///
    /// Returns `None` for anything that is not one of the two known shapes,
    /// including invalid JSON and known types with missing fields.
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Frame>(raw).ok()? {
            Frame::Change(change) => Some(Self::Change(change)),
            Frame::Broadcast(event) => Some(Self::Broadcast(event)),
            Frame::Unrecognized => None,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> String {
        match self {
            Self::Change(c) => format!("{}:{}", c.table, c.event_type),
            Self::Broadcast(b) => format!("broadcast:{}", b.event),
        }
    }

    pub fn as_change(&self) -> Option<&ChangeNotification> {
        match self {
            Self::Change(c) => Some(c),
            Self::Broadcast(_) => None,
        }
    }

    pub fn as_broadcast(&self) -> Option<&BroadcastEvent> {
        match self {
            Self::Broadcast(b) => Some(b),
            Self::Change(_) => None,
        }
    }
}

/// The signed-in user and active organization a channel is bound to.
///
/// A channel exists only when both are known; see [`Scope::from_session`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub user_id: String,
    pub organization_id: String,
}

impl Scope {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }

    /// Build a scope from optional session parts.
    ///
    /// Returns `None` when the user is signed out or no organization is
    /// active (missing or blank).
    pub fn from_session(user_id: Option<&str>, organization_id: Option<&str>) -> Option<Self> {
        let user = user_id.map(str::trim).filter(|u| !u.is_empty())?;
        let org = organization_id.map(str::trim).filter(|o| !o.is_empty())?;
        Some(Self::new(user, org))
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "org={}", self.organization_id)
    }
}

/// Connection state of the realtime manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No scope, no channel.
    Idle,
    /// Fetching a ticket or opening the channel.
    Connecting(Scope),
    /// Channel open and receiving events.
    Open(Scope),
    /// Channel gone. When not intentional, a reconnect is pending.
    Closed { scope: Scope, intentional: bool },
    /// Retry ceiling reached; waits for the next scope change or reconnect.
    Failed(Scope),
}

impl ConnectionState {
    pub fn scope(&self) -> Option<&Scope> {
        match self {
            Self::Idle => None,
            Self::Connecting(s) | Self::Open(s) | Self::Failed(s) => Some(s),
            Self::Closed { scope, .. } => Some(scope),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting(s) => write!(f, "connecting({s})"),
            Self::Open(s) => write!(f, "open({s})"),
            Self::Closed { scope, intentional: true } => write!(f, "closed({scope})"),
            Self::Closed { scope, intentional: false } => write!(f, "closed({scope}, reconnect pending)"),
            Self::Failed(s) => write!(f, "failed({s})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_change_notification() {
        let raw = r#"{
            "type": "postgres_changes",
            "table": "invoices",
            "schema": "public",
            "eventType": "UPDATE",
            "new": {"id": 7, "status": "paid"},
            "old": {"id": 7, "status": "open"},
            "commit_timestamp": "2024-05-01T10:00:00Z"
        }"#;
        let msg = InboundMessage::decode(raw).unwrap();
        let change = msg.as_change().unwrap();
        assert_eq!(change.table, "invoices");
        assert_eq!(change.schema.as_deref(), Some("public"));
        assert_eq!(change.event_type, ChangeKind::Updated);
        assert_eq!(change.new.as_ref().unwrap()["status"], "paid");
        assert_eq!(change.old.as_ref().unwrap()["status"], "open");
        assert_eq!(msg.label(), "invoices:updated");
    }

    #[test]
    fn test_decode_change_kinds() {
        for (wire, kind) in [
            ("INSERT", ChangeKind::Created),
            ("UPDATE", ChangeKind::Updated),
            ("DELETE", ChangeKind::Deleted),
        ] {
            let raw = format!(r#"{{"type":"postgres_changes","table":"orders","eventType":"{wire}"}}"#);
            let msg = InboundMessage::decode(&raw).unwrap();
            assert_eq!(msg.as_change().unwrap().event_type, kind);
        }
    }

    #[test]
    fn test_decode_broadcast() {
        let msg = InboundMessage::decode(r#"{"type":"broadcast","event":"auth:token-invalidated"}"#)
            .unwrap();
        let event = msg.as_broadcast().unwrap();
        assert_eq!(event.event, "auth:token-invalidated");
        assert!(event.payload.is_null());

        let msg = InboundMessage::decode(
            r#"{"type":"broadcast","event":"member:joined","payload":{"userId":"u-2"}}"#,
        )
        .unwrap();
        assert_eq!(msg.as_broadcast().unwrap().payload["userId"], "u-2");
    }

    #[test]
    fn test_decode_rejects_noise() {
        let frames = [
            "",
            "ping",
            "{}",
            "[1,2,3]",
            r#"{"type":"heartbeat"}"#,
            r#"{"type":"postgres_changes","eventType":"UPDATE"}"#,
            r#"{"type":"postgres_changes","table":"orders","eventType":"TRUNCATE"}"#,
            r#"{"type":"broadcast","payload":{}}"#,
            r#"{"event":"no-type"}"#,
        ];
        for frame in frames {
            assert!(InboundMessage::decode(frame).is_none(), "decoded {frame:?}");
        }
    }

    #[test]
    fn test_serialized_form_keeps_tag() {
        let msg = InboundMessage::Broadcast(BroadcastEvent {
            event: "x".into(),
            payload: serde_json::Value::Null,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "broadcast");
        assert_eq!(json["event"], "x");
    }

    #[test]
    fn test_scope_from_session() {
        assert_eq!(
            Scope::from_session(Some("u-1"), Some("acme")),
            Some(Scope::new("u-1", "acme"))
        );
        assert!(Scope::from_session(None, Some("acme")).is_none());
        assert!(Scope::from_session(Some("u-1"), None).is_none());
        assert!(Scope::from_session(Some("u-1"), Some("  ")).is_none());
        assert!(Scope::from_session(Some(""), Some("acme")).is_none());
    }

    #[test]
    fn test_connection_state_display() {
        let scope = Scope::new("u-1", "acme");
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
        assert_eq!(ConnectionState::Open(scope.clone()).to_string(), "open(org=acme)");
        assert_eq!(
            ConnectionState::Closed { scope: scope.clone(), intentional: false }.to_string(),
            "closed(org=acme, reconnect pending)"
        );
        assert_eq!(ConnectionState::Failed(scope.clone()).scope(), Some(&scope));
        assert!(ConnectionState::Open(scope).is_open());
        assert!(ConnectionState::Idle.scope().is_none());
    }
}
