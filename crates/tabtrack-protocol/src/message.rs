//! Adapter message types (newline-delimited JSON).
//!
//! The browser adapter writes one [`InboundMessage`] per line; the daemon
//! answers and streams lifecycle events as [`OutboundMessage`] lines.

use serde::{Deserialize, Serialize};

use tabtrack_core::{
    BrowsingEvent, BrowsingSession, IdleReason, SessionId, SessionStats, TabId, Timestamp,
    WindowId,
};

use crate::version::ProtocolVersion;

/// Requests the adapter can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundKind {
    /// Tab focus, navigation, or any other sign of life.
    Activity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_id: Option<WindowId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        /// Falls back to the daemon clock when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Timestamp>,
    },

    /// Idle state reported by the host (e.g. a native idle API).
    Idle {
        is_idle: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<IdleReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Timestamp>,
    },

    /// User-initiated session start.
    StartSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        purpose: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_session_id: Option<SessionId>,
    },

    /// User-initiated session end.
    EndSession,

    /// Label the current session.
    TagSession { tag: String },

    /// Replace the tracking config (same keys as the TOML config file).
    UpdateConfig { config: serde_json::Value },

    /// Ask for the current session, history, and stats.
    Snapshot,

    /// Liveness check.
    Ping { seq: u64 },
}

/// A message from the adapter to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: InboundKind,
}

impl InboundMessage {
    /// Creates a message at the current protocol version.
    pub fn new(message: InboundKind) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates an activity message for a domain.
    pub fn activity(domain: impl Into<String>, timestamp: Option<Timestamp>) -> Self {
        Self::new(InboundKind::Activity {
            tab_id: None,
            window_id: None,
            domain: Some(domain.into()),
            url: None,
            timestamp,
        })
    }

    /// Creates an idle message.
    pub fn idle(is_idle: bool, reason: Option<IdleReason>) -> Self {
        Self::new(InboundKind::Idle {
            is_idle,
            reason,
            timestamp: None,
        })
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(InboundKind::Ping { seq })
    }
}

/// Messages written by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    /// Written once at startup.
    Ready { protocol_version: ProtocolVersion },

    /// A lifecycle event. Boxed to keep the enum small.
    Event { event: Box<BrowsingEvent> },

    /// Reply to `start_session`.
    SessionStarted { session_id: SessionId },

    /// Reply to `snapshot`.
    Snapshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<BrowsingSession>,
        history: Vec<BrowsingSession>,
        stats: SessionStats,
    },

    /// Reply to `ping`.
    Pong { seq: u64 },

    /// A request could not be served.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl OutboundMessage {
    pub fn ready() -> Self {
        Self::Ready {
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn event(event: BrowsingEvent) -> Self {
        Self::Event {
            event: Box::new(event),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }

    /// Serializes as a single JSON line (without the trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabtrack_core::EventPayload;

    #[test]
    fn test_inbound_wire_shape() {
        let msg = InboundMessage::activity("docs.rs", Some(42));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "activity");
        assert_eq!(json["domain"], "docs.rs");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["protocolVersion"]["major"], 1);
    }

    #[test]
    fn test_outbound_event_line() {
        let event = BrowsingEvent::new(
            Some(SessionId::new("s-1")),
            9,
            EventPayload::IdleEnd {
                reason: IdleReason::UserActive,
                duration: 30,
            },
        );
        let line = OutboundMessage::event(event).to_line().unwrap();
        assert!(line.contains("\"kind\":\"event\""));
        assert!(line.contains("\"type\":\"idle_end\""));
        assert!(line.contains("\"duration\":30"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_outbound_error_roundtrip() {
        let original = OutboundMessage::error_with_code("bad config", "invalid_config");
        let json = serde_json::to_string(&original).unwrap();
        let parsed: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }
}
