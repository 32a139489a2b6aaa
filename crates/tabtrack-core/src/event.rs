//! Event model: activity signals coming in, lifecycle events going out.
//!
//! Plain data with no behaviour beyond small constructors. Producers are trusted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::idle::IdleReason;
use crate::productivity::ProductivityMetrics;
use crate::session::{
    BrowsingSession, CreatedBy, EndReason, SessionId, TabId, Timestamp, WindowId,
};

// ============================================================================
// Inbound Signals
// ============================================================================

/// One unit of user activity reported by the browser adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: Timestamp,
}

impl ActivitySignal {
    /// Creates a bare signal at `timestamp`.
    pub fn at(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Sets the domain of the signal.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the tab and window of the signal.
    #[must_use]
    pub fn with_tab(mut self, tab_id: TabId, window_id: WindowId) -> Self {
        self.tab_id = Some(tab_id);
        self.window_id = Some(window_id);
        self
    }

    /// Domain of the signal: the explicit domain, else the host of the URL.
    pub fn effective_domain(&self) -> Option<String> {
        self.domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_ascii_lowercase)
            .or_else(|| self.url.as_deref().and_then(crate::domain::host_from_url))
    }
}

// ============================================================================
// Session Boundaries
// ============================================================================

/// Whether a boundary opens or closes a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    Start,
    End,
}

/// Boundary-specific details.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tab_ids: Vec<TabId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub window_ids: Vec<WindowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_to: Option<String>,
    /// Domain-change significance score, for `domain_change` boundaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<f64>,
    /// Gap that triggered a `navigation_gap` boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_ms: Option<u64>,
    /// Rolling mean of long gaps at the time of a `navigation_gap` boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_gap_ms: Option<u64>,
}

/// A decision that delimits sessions. Ephemeral: applied, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBoundary {
    #[serde(rename = "type")]
    pub boundary_type: BoundaryType,
    pub reason: EndReason,
    pub timestamp: Timestamp,
    /// For `end`: the session to close. For `start`: the session it succeeds.
    pub session_id: SessionId,
    #[serde(default)]
    pub metadata: BoundaryMetadata,
}

impl SessionBoundary {
    /// Creates an `end` boundary for `session_id`.
    pub fn end(
        session_id: SessionId,
        reason: EndReason,
        timestamp: Timestamp,
        metadata: BoundaryMetadata,
    ) -> Self {
        Self {
            boundary_type: BoundaryType::End,
            reason,
            timestamp,
            session_id,
            metadata,
        }
    }

    /// Creates a `start` boundary succeeding `session_id`.
    pub fn start(
        session_id: SessionId,
        reason: EndReason,
        timestamp: Timestamp,
        metadata: BoundaryMetadata,
    ) -> Self {
        Self {
            boundary_type: BoundaryType::Start,
            reason,
            timestamp,
            session_id,
            metadata,
        }
    }
}

// ============================================================================
// Outbound Events
// ============================================================================

/// Closed set of event kinds emitted by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStarted,
    SessionEnded,
    IdleStart,
    IdleEnd,
    BoundaryDetected,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SessionStarted => "session_started",
            Self::SessionEnded => "session_ended",
            Self::IdleStart => "idle_start",
            Self::IdleEnd => "idle_end",
            Self::BoundaryDetected => "boundary_detected",
        };
        f.write_str(label)
    }
}

/// Event-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventPayload {
    SessionStarted {
        created_by: CreatedBy,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        purpose: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_session_id: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    },
    /// Full summary of the closed session. Boxed to keep the enum small.
    SessionEnded {
        reason: EndReason,
        session: Box<BrowsingSession>,
        metrics: ProductivityMetrics,
    },
    IdleStart {
        reason: IdleReason,
    },
    IdleEnd {
        reason: IdleReason,
        /// Length of the idle interval in ms.
        duration: u64,
    },
    BoundaryDetected {
        boundary: SessionBoundary,
    },
}

/// A lifecycle event published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowsingEvent {
    /// Session the event belongs to; `None` for idle changes with no session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl BrowsingEvent {
    /// Creates a new event.
    pub fn new(session_id: Option<SessionId>, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            session_id,
            timestamp,
            payload,
        }
    }

    /// Returns the kind of this event.
    pub fn event_type(&self) -> EventType {
        match self.payload {
            EventPayload::SessionStarted { .. } => EventType::SessionStarted,
            EventPayload::SessionEnded { .. } => EventType::SessionEnded,
            EventPayload::IdleStart { .. } => EventType::IdleStart,
            EventPayload::IdleEnd { .. } => EventType::IdleEnd,
            EventPayload::BoundaryDetected { .. } => EventType::BoundaryDetected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_domain_prefers_explicit_domain() {
        let signal = ActivitySignal {
            domain: Some(" Docs.RS ".to_string()),
            url: Some("https://github.com/tokio-rs".to_string()),
            ..ActivitySignal::at(1)
        };
        assert_eq!(signal.effective_domain().as_deref(), Some("docs.rs"));
    }

    #[test]
    fn test_effective_domain_falls_back_to_url() {
        let signal = ActivitySignal {
            url: Some("https://github.com/tokio-rs".to_string()),
            ..ActivitySignal::at(1)
        };
        assert_eq!(signal.effective_domain().as_deref(), Some("github.com"));
        assert_eq!(ActivitySignal::at(1).effective_domain(), None);
    }

    #[test]
    fn test_event_type_mapping_and_wire_shape() {
        let event = BrowsingEvent::new(
            Some(SessionId::new("s-1")),
            42,
            EventPayload::IdleStart {
                reason: IdleReason::UserInactive,
            },
        );
        assert_eq!(event.event_type(), EventType::IdleStart);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "idle_start");
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["reason"], "user_inactive");
    }

    #[test]
    fn test_boundary_wire_shape() {
        let boundary = SessionBoundary::end(
            SessionId::new("s-1"),
            EndReason::DomainChange,
            7,
            BoundaryMetadata {
                domain_from: Some("app.work.com".to_string()),
                domain_to: Some("feed.social.com".to_string()),
                ..BoundaryMetadata::default()
            },
        );
        let json = serde_json::to_value(&boundary).unwrap();
        assert_eq!(json["type"], "end");
        assert_eq!(json["reason"], "domain_change");
        assert_eq!(json["metadata"]["domainFrom"], "app.work.com");
        assert_eq!(json["metadata"]["domainTo"], "feed.social.com");
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::SessionEnded.to_string(), "session_ended");
        assert_eq!(EventType::BoundaryDetected.to_string(), "boundary_detected");
    }
}
