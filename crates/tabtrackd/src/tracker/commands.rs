//! Tracker actor commands and errors.
//!
//! - `TrackerCommand`: messages sent to the actor
//! - `TrackerError`: failures surfaced to callers
//! - `ActivityUpdate`: one activity signal, optionally without a timestamp

use thiserror::Error;
use tokio::sync::oneshot;

use tabtrack_core::{
    ActivitySignal, BrowsingSession, ConfigError, EndReason, IdleReason, IdleState,
    ProductivityMetrics, SessionBoundary, SessionId, SessionStats, TabId, Timestamp,
    TrackingConfig, WindowId,
};

// ============================================================================
// Tracker Commands
// ============================================================================

/// Commands sent to the tracker actor.
///
/// Requests carry a oneshot channel for the reply. `TimerFired` is sent by
/// the actor's own timers.
#[derive(Debug)]
pub enum TrackerCommand {
    /// Restore persisted state and open the first session.
    Initialize {
        respond_to: oneshot::Sender<Result<Option<SessionId>, TrackerError>>,
    },

    /// Start a user session, ending the current one first.
    StartSession {
        tag: Option<String>,
        purpose: Option<String>,
        parent_session_id: Option<SessionId>,
        respond_to: oneshot::Sender<Result<SessionId, TrackerError>>,
    },

    /// End the current session. Replies `None` when nothing was active.
    EndSession {
        reason: EndReason,
        respond_to: oneshot::Sender<Result<Option<ProductivityMetrics>, TrackerError>>,
    },

    /// Record activity. Acknowledged once fully processed.
    UpdateActivity {
        update: ActivityUpdate,
        respond_to: oneshot::Sender<()>,
    },

    /// Force the idle state.
    SetIdle {
        is_idle: bool,
        reason: Option<IdleReason>,
        timestamp: Option<Timestamp>,
        respond_to: oneshot::Sender<()>,
    },

    /// Apply a boundary from outside the tracker. Replies whether it applied.
    ProcessBoundary {
        boundary: SessionBoundary,
        respond_to: oneshot::Sender<Result<bool, TrackerError>>,
    },

    /// Label the current session. Replies whether the tag was added.
    TagSession {
        tag: String,
        respond_to: oneshot::Sender<Result<bool, TrackerError>>,
    },

    /// Replace the tracking config.
    UpdateConfig {
        config: Box<TrackingConfig>,
        respond_to: oneshot::Sender<Result<(), TrackerError>>,
    },

    GetCurrentSession {
        respond_to: oneshot::Sender<Option<BrowsingSession>>,
    },

    /// Closed sessions ordered by start time.
    GetSessionHistory {
        respond_to: oneshot::Sender<Vec<BrowsingSession>>,
    },

    GetSessionStats {
        respond_to: oneshot::Sender<SessionStats>,
    },

    GetIdleState {
        respond_to: oneshot::Sender<IdleState>,
    },

    /// A timer armed by the actor elapsed.
    TimerFired { kind: TimerKind, ticket: u64 },

    /// Write a final snapshot and stop the actor.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Timers owned by the tracker actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// No activity for the idle threshold.
    IdleCountdown,
    /// Idle has lasted a full threshold; the session closes.
    IdleTimeout,
    /// Grace period before an automatic successor session.
    AutoRestart,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdleCountdown => write!(f, "idle_countdown"),
            Self::IdleTimeout => write!(f, "idle_timeout"),
            Self::AutoRestart => write!(f, "auto_restart"),
        }
    }
}

// ============================================================================
// Activity Update
// ============================================================================

/// An activity signal as received from the adapter.
///
/// A missing timestamp is filled from the tracker clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityUpdate {
    pub tab_id: Option<TabId>,
    pub window_id: Option<WindowId>,
    pub domain: Option<String>,
    pub url: Option<String>,
    pub timestamp: Option<Timestamp>,
}

impl ActivityUpdate {
    /// Activity on a domain, stamped by the tracker.
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            ..Self::default()
        }
    }

    /// Activity with no details beyond "the user is here".
    pub fn heartbeat() -> Self {
        Self::default()
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn in_tab(mut self, tab_id: TabId, window_id: WindowId) -> Self {
        self.tab_id = Some(tab_id);
        self.window_id = Some(window_id);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Resolves into a signal, stamping `now` if no timestamp was given.
    pub fn into_signal(self, now: Timestamp) -> ActivitySignal {
        ActivitySignal {
            tab_id: self.tab_id,
            window_id: self.window_id,
            domain: self.domain,
            url: self.url,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

// ============================================================================
// Tracker Errors
// ============================================================================

/// Errors returned by tracker operations.
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    /// A lifecycle operation ran before `initialize`.
    #[error("tracker is not initialized")]
    NotInitialized,

    /// Session tracking is switched off in the config.
    #[error("session tracking is disabled")]
    TrackingDisabled,

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl TrackerError {
    /// Stable machine-readable code for the adapter.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::TrackingDisabled => "tracking_disabled",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ChannelClosed => "channel_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_update_stamps_missing_time() {
        let signal = ActivityUpdate::domain("docs.rs").in_tab(3, 1).into_signal(500);
        assert_eq!(signal.timestamp, 500);
        assert_eq!(signal.tab_id, Some(3));

        let signal = ActivityUpdate::heartbeat().at(42).into_signal(500);
        assert_eq!(signal.timestamp, 42);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(TrackerError::NotInitialized.code(), "not_initialized");
        let err = TrackerError::from(ConfigError::Parse("bad".into()));
        assert_eq!(err.code(), "invalid_config");
        assert!(err.to_string().starts_with("invalid config"));
    }
}
