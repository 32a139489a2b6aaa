//! Idle detector state machine.
//!
//! The detector is clock-free: callers report activity and countdown expiry
//! with explicit timestamps, and schedule the countdown timer themselves using
//! [`IdleDetector::countdown_deadline`]. Every transition it returns carries
//! exact boundaries, so idle intervals of any length can be accounted for.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::Timestamp;

/// Why the user went idle or came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleReason {
    /// The idle countdown elapsed without activity.
    UserInactive,
    /// Activity arrived (or the host reported the user active again).
    UserActive,
    /// The host's native idle detection reported idle.
    SystemIdle,
    /// The screen was locked.
    ScreenLocked,
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::UserInactive => "user_inactive",
            Self::UserActive => "user_active",
            Self::SystemIdle => "system_idle",
            Self::ScreenLocked => "screen_locked",
        };
        f.write_str(label)
    }
}

/// Current idle state. `idle_start` is set iff `is_idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleState {
    pub is_idle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_start: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<IdleReason>,
}

impl IdleState {
    fn enter(at: Timestamp, reason: IdleReason) -> Self {
        Self {
            is_idle: true,
            idle_start: Some(at),
            reason: Some(reason),
        }
    }
}

/// A change of idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTransition {
    Started {
        at: Timestamp,
        reason: IdleReason,
    },
    Ended {
        started_at: Timestamp,
        at: Timestamp,
        duration: u64,
        reason: IdleReason,
    },
}

/// Converts activity signals and an idle threshold into idle transitions.
#[derive(Debug, Clone)]
pub struct IdleDetector {
    threshold_ms: u64,
    state: IdleState,
    last_activity: Option<Timestamp>,
}

impl IdleDetector {
    /// Creates a detector. A threshold of 0 disables idle detection.
    pub fn new(threshold_ms: u64) -> Self {
        Self {
            threshold_ms,
            state: IdleState::default(),
            last_activity: None,
        }
    }

    /// Returns true unless the threshold is 0.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.threshold_ms > 0
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }

    /// Changes the threshold; the countdown restarts from the last activity.
    pub fn set_threshold(&mut self, threshold_ms: u64) {
        self.threshold_ms = threshold_ms;
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.is_idle
    }

    /// Reports activity at `at`, resetting the countdown.
    ///
    /// Ends the current idle interval first if the user was idle.
    pub fn on_activity(&mut self, at: Timestamp) -> Option<IdleTransition> {
        let transition = self.leave(at, IdleReason::UserActive);
        self.last_activity = Some(self.last_activity.map_or(at, |last| last.max(at)));
        transition
    }

    /// Forces the idle state, bypassing the countdown.
    ///
    /// An idle start earlier than the last activity is moved up to it, so an
    /// interval never overlaps time already credited as active. Ignored
    /// entirely while idle detection is disabled.
    pub fn set_idle(
        &mut self,
        idle: bool,
        reason: Option<IdleReason>,
        at: Timestamp,
    ) -> Option<IdleTransition> {
        if !self.is_enabled() {
            return None;
        }
        if idle {
            let at = self.last_activity.map_or(at, |last| last.max(at));
            self.enter(at, reason.unwrap_or(IdleReason::SystemIdle))
        } else {
            let transition = self.leave(at, reason.unwrap_or(IdleReason::UserActive));
            if let Some(IdleTransition::Ended { at, .. }) = transition {
                self.last_activity = Some(self.last_activity.map_or(at, |last| last.max(at)));
            }
            transition
        }
    }

    /// When the countdown elapses if no activity arrives, or `None` if no
    /// countdown is running (disabled, already idle, or no activity yet).
    pub fn countdown_deadline(&self) -> Option<Timestamp> {
        if !self.is_enabled() || self.state.is_idle {
            return None;
        }
        self.last_activity
            .map(|last| last.saturating_add(self.threshold_ms))
    }

    /// Called when the countdown timer fires at `now`.
    ///
    /// Returns `Started` (stamped at the deadline) if the deadline has really
    /// passed; a timer that raced with fresh activity yields `None`.
    pub fn on_countdown_elapsed(&mut self, now: Timestamp) -> Option<IdleTransition> {
        let deadline = self.countdown_deadline()?;
        if now < deadline {
            return None;
        }
        self.enter(deadline, IdleReason::UserInactive)
    }

    fn enter(&mut self, at: Timestamp, reason: IdleReason) -> Option<IdleTransition> {
        if self.state.is_idle {
            return None;
        }
        self.state = IdleState::enter(at, reason);
        Some(IdleTransition::Started { at, reason })
    }

    fn leave(&mut self, at: Timestamp, reason: IdleReason) -> Option<IdleTransition> {
        let started_at = self.state.idle_start.filter(|_| self.state.is_idle)?;
        self.state = IdleState::default();
        let at = at.max(started_at);
        Some(IdleTransition::Ended {
            started_at,
            at,
            duration: at - started_at,
            reason,
        })
    }
}
