//! Browsing session entity and its identifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Primitive Aliases
// ============================================================================

/// Milliseconds since the Unix epoch, as produced by the tracker clock.
pub type Timestamp = u64;

/// Browser tab identifier (as reported by the browser adapter).
pub type TabId = i64;

/// Browser window identifier (as reported by the browser adapter).
pub type WindowId = i64;

/// Longest single gap between two activity signals that may be credited as
/// active time (5 minutes).
pub const MAX_ACTIVE_GAP_MS: u64 = 5 * 60 * 1000;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a browsing session.
///
/// Generated sessions use a random UUID so identifiers never repeat within
/// (or across) process lifetimes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a SessionId from an existing string (e.g. a persisted record).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 16 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..16).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session Metadata
// ============================================================================

/// Who created a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatedBy {
    /// Explicit start from the UI or a keyboard shortcut.
    User,
    /// Started by the tracker itself (startup, boundary, grace restart).
    #[default]
    Automatic,
}

impl fmt::Display for CreatedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Automatic => write!(f, "automatic"),
        }
    }
}

/// Why a session ended. Also used as the reason carried by boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The user explicitly ended or replaced the session.
    UserInitiated,
    /// Idle persisted for a full idle threshold after going idle.
    IdleTimeout,
    /// The rolling mean of long navigation gaps crossed its threshold.
    NavigationGap,
    /// A significant switch between unrelated domains.
    DomainChange,
    /// Tracking was switched off through a config update.
    TrackingDisabled,
}

impl EndReason {
    /// Returns true if ending with this reason schedules an automatic successor.
    #[must_use]
    pub fn restarts_automatically(&self) -> bool {
        !matches!(self, Self::UserInitiated)
    }

    /// Returns the wire label for this reason.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserInitiated => "user_initiated",
            Self::IdleTimeout => "idle_timeout",
            Self::NavigationGap => "navigation_gap",
            Self::DomainChange => "domain_change",
            Self::TrackingDisabled => "tracking_disabled",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub created_by: CreatedBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_session_ids: Vec<SessionId>,
}

// ============================================================================
// Browsing Session
// ============================================================================

/// A contiguous period of browsing activity.
///
/// Mutable while it is the tracker's current session; once closed it is
/// moved into history and only its child links may still change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowsingSession {
    pub id: SessionId,
    pub start_time: Timestamp,
    pub last_activity: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    pub is_active: bool,
    #[serde(default)]
    pub tab_ids: BTreeSet<TabId>,
    #[serde(default)]
    pub window_ids: BTreeSet<WindowId>,
    #[serde(default)]
    pub domains: BTreeSet<String>,
    #[serde(default)]
    pub event_count: u64,
    /// Accumulated idle time in ms.
    #[serde(default)]
    pub idle_time: u64,
    /// Accumulated active time in ms.
    #[serde(default)]
    pub active_time: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl BrowsingSession {
    /// Creates a new active session starting at `now`.
    pub fn new(created_by: CreatedBy, now: Timestamp) -> Self {
        Self::with_id(SessionId::generate(), created_by, now)
    }

    /// Creates a new active session with a caller-chosen identifier.
    pub fn with_id(id: SessionId, created_by: CreatedBy, now: Timestamp) -> Self {
        Self {
            id,
            start_time: now,
            last_activity: now,
            end_time: None,
            is_active: true,
            tab_ids: BTreeSet::new(),
            window_ids: BTreeSet::new(),
            domains: BTreeSet::new(),
            event_count: 0,
            idle_time: 0,
            active_time: 0,
            tags: Vec::new(),
            metadata: SessionMetadata {
                created_by,
                ..SessionMetadata::default()
            },
        }
    }

    /// Records one activity signal.
    ///
    /// `idle_since` is the start of the idle interval the signal ends, if the
    /// user was idle: only the time before going idle is credited as active.
    /// Any single gap contributes at most [`MAX_ACTIVE_GAP_MS`].
    pub fn record_activity(
        &mut self,
        at: Timestamp,
        idle_since: Option<Timestamp>,
        tab_id: Option<TabId>,
        window_id: Option<WindowId>,
        domain: Option<&str>,
    ) {
        let active_until = idle_since.map_or(at, |idle| idle.min(at));
        let gap = active_until.saturating_sub(self.last_activity);
        self.active_time = self.active_time.saturating_add(gap.min(MAX_ACTIVE_GAP_MS));
        self.last_activity = self.last_activity.max(at);
        self.event_count = self.event_count.saturating_add(1);

        if let Some(tab) = tab_id {
            self.tab_ids.insert(tab);
        }
        if let Some(window) = window_id {
            self.window_ids.insert(window);
        }
        if let Some(domain) = domain.filter(|d| !d.is_empty()) {
            self.domains.insert(domain.to_ascii_lowercase());
        }
    }

    /// Adds an idle interval, clipped to the part that overlaps this session.
    pub fn add_idle_interval(&mut self, idle_start: Timestamp, idle_end: Timestamp) {
        let from = idle_start.max(self.start_time);
        self.idle_time = self.idle_time.saturating_add(idle_end.saturating_sub(from));
    }

    /// Appends a tag, ignoring empty and duplicate labels.
    ///
    /// Returns true if the tag was added.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    /// Closes the session at `at` with the given reason.
    ///
    /// Counters are trimmed so that `idle_time + active_time` never exceeds
    /// the wall-clock span of the session.
    pub fn close(&mut self, reason: EndReason, at: Timestamp) {
        let end = at.max(self.last_activity).max(self.start_time);
        self.is_active = false;
        self.end_time = Some(end);
        self.metadata.end_reason = Some(reason);

        let total = end.saturating_sub(self.start_time);
        self.idle_time = self.idle_time.min(total);
        self.active_time = self.active_time.min(total.saturating_sub(self.idle_time));
    }

    /// Wall-clock span of the session: up to `end_time` if closed, else up to `now`.
    pub fn total_time(&self, now: Timestamp) -> u64 {
        self.end_time
            .unwrap_or(now)
            .saturating_sub(self.start_time)
    }

    /// Returns true if the session was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

// ============================================================================
// Aggregate Statistics
// ============================================================================

/// Aggregate statistics over the current session and history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Number of closed sessions in history.
    pub total_sessions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session_id: Option<SessionId>,
    /// Wall-clock age of the current session (0 without one).
    pub current_session_duration: u64,
    /// Active time summed over history and the current session.
    pub total_active_time: u64,
    /// Idle time summed over history and the current session.
    pub total_idle_time: u64,
    /// Mean focus score over closed sessions (0 when there are none).
    pub average_focus_score: f64,
    pub is_idle: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session-"));
    }

    #[test]
    fn test_record_activity_caps_gap() {
        let mut session = BrowsingSession::new(CreatedBy::Automatic, 0);
        session.record_activity(1_000, None, Some(1), Some(10), Some("Docs.Rs"));
        assert_eq!(session.active_time, 1_000);

        // An hour-long gap only counts 5 minutes.
        session.record_activity(3_601_000, None, Some(2), Some(10), None);
        assert_eq!(session.active_time, 1_000 + MAX_ACTIVE_GAP_MS);
        assert_eq!(session.last_activity, 3_601_000);
        assert_eq!(session.event_count, 2);
        assert_eq!(session.tab_ids.len(), 2);
        assert_eq!(session.window_ids.len(), 1);
        assert!(session.domains.contains("docs.rs"));
    }

    #[test]
    fn test_record_activity_after_idle_credits_only_pre_idle_time() {
        let mut session = BrowsingSession::new(CreatedBy::Automatic, 0);
        session.record_activity(10_000, None, None, None, None);
        // went idle at 70s, came back at 200s
        session.record_activity(200_000, Some(70_000), None, None, None);
        session.add_idle_interval(70_000, 200_000);
        assert_eq!(session.active_time, 70_000);
        assert_eq!(session.idle_time, 130_000);
        assert!(session.active_time + session.idle_time <= session.total_time(200_000));
    }

    #[test]
    fn test_idle_interval_clipped_to_session_start() {
        let mut session = BrowsingSession::new(CreatedBy::Automatic, 50_000);
        session.add_idle_interval(10_000, 60_000);
        assert_eq!(session.idle_time, 10_000);
    }

    #[test]
    fn test_close_trims_counters() {
        let mut session = BrowsingSession::new(CreatedBy::User, 0);
        session.active_time = 80_000;
        session.idle_time = 50_000;
        session.close(EndReason::NavigationGap, 100_000);

        assert!(!session.is_active);
        assert_eq!(session.end_time, Some(100_000));
        assert_eq!(session.metadata.end_reason, Some(EndReason::NavigationGap));
        assert_eq!(session.idle_time, 50_000);
        assert_eq!(session.active_time, 50_000);
    }

    #[test]
    fn test_add_tag_dedupes() {
        let mut session = BrowsingSession::new(CreatedBy::User, 0);
        assert!(session.add_tag("research"));
        assert!(!session.add_tag("research"));
        assert!(!session.add_tag("  "));
        assert!(session.add_tag("writing"));
        assert_eq!(session.tags, vec!["research", "writing"]);
    }

    #[test]
    fn test_end_reason_restart_rule() {
        assert!(!EndReason::UserInitiated.restarts_automatically());
        assert!(EndReason::IdleTimeout.restarts_automatically());
        assert!(EndReason::DomainChange.restarts_automatically());
        assert_eq!(EndReason::NavigationGap.to_string(), "navigation_gap");
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let mut session = BrowsingSession::with_id(SessionId::new("s-1"), CreatedBy::User, 5);
        session.add_tag("focus");
        session.domains.insert("example.com".to_string());

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["id"], "s-1");
        assert_eq!(json["startTime"], 5);
        assert_eq!(json["isActive"], true);
        assert_eq!(json["metadata"]["createdBy"], "user");
        assert_eq!(json["tags"][0], "focus");

        let back: BrowsingSession = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }
}
