//! Boundary policy: decides when activity means a new session should begin.
//!
//! Two independent heuristics run on every activity update:
//!
//! - **Navigation gap.** Gaps longer than `sessionGapThreshold` are pushed
//!   into a rolling window of the last [`GAP_WINDOW_CAPACITY`] long gaps. When
//!   the window mean exceeds `1.5 x sessionGapThreshold` the session ends.
//!   Pauses just over the threshold only end a session as a pattern.
//! - **Domain change.** A switch between unrelated root domains is scored in
//!   `[0, 1]`; scores above `domainChangeThreshold` end the session.
//!
//! Each heuristic yields an `end`/`start` boundary pair. Both may fire for
//! the same update; the caller applies them in order and stale ones are no-ops.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::TrackingConfig;
use crate::domain::{is_related, DomainClassifier};
use crate::event::{ActivitySignal, BoundaryMetadata, SessionBoundary};
use crate::session::{BrowsingSession, EndReason, SessionId, Timestamp};

/// Number of long gaps kept in the rolling window.
pub const GAP_WINDOW_CAPACITY: usize = 10;

/// The window mean must exceed this multiple of the gap threshold.
pub const GAP_MEAN_FACTOR: f64 = 1.5;

/// Significance of a change within one root domain.
pub const RELATED_DOMAIN_SIGNIFICANCE: f64 = 0.2;

/// Significance of a change between the social and work domain sets.
pub const SOCIAL_WORK_SIGNIFICANCE: f64 = 0.8;

// ============================================================================
// Gap Window
// ============================================================================

/// Fixed-capacity FIFO of recent long gaps (ms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapWindow {
    gaps: VecDeque<u64>,
    capacity: usize,
}

impl Default for GapWindow {
    fn default() -> Self {
        Self::new(GAP_WINDOW_CAPACITY)
    }
}

impl GapWindow {
    /// Creates an empty window. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            gaps: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a gap, evicting the oldest when full.
    pub fn push(&mut self, gap_ms: u64) {
        if self.gaps.len() == self.capacity {
            self.gaps.pop_front();
        }
        self.gaps.push_back(gap_ms);
    }

    /// Arithmetic mean of the window, or `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.gaps.is_empty() {
            return None;
        }
        let sum: f64 = self.gaps.iter().map(|&g| g as f64).sum();
        Some(sum / self.gaps.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn clear(&mut self) {
        self.gaps.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.gaps.iter()
    }
}

// ============================================================================
// Boundary Decision
// ============================================================================

/// An `end` boundary for the current session followed by a `start` boundary
/// for its automatic successor, one millisecond later.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryDecision {
    pub end: SessionBoundary,
    pub start: SessionBoundary,
}

impl BoundaryDecision {
    fn pair(
        session_id: SessionId,
        reason: EndReason,
        at: Timestamp,
        metadata: BoundaryMetadata,
    ) -> Self {
        Self {
            end: SessionBoundary::end(session_id.clone(), reason, at, metadata.clone()),
            start: SessionBoundary::start(session_id, reason, at.saturating_add(1), metadata),
        }
    }

    pub fn reason(&self) -> EndReason {
        self.end.reason
    }
}

// ============================================================================
// Boundary Policy
// ============================================================================

/// Stateful decision logic for session boundaries.
///
/// Holds the gap window and the last observed domain; never touches the
/// session it is asked about.
#[derive(Debug, Clone)]
pub struct BoundaryPolicy {
    gap_threshold_ms: u64,
    domain_change_enabled: bool,
    domain_change_threshold: f64,
    unclassified_significance: f64,
    classifier: DomainClassifier,
    window: GapWindow,
    last_domain: Option<String>,
}

impl BoundaryPolicy {
    /// Builds a policy from the tracking config.
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            gap_threshold_ms: config.session_gap_threshold,
            domain_change_enabled: config.domain_change_session_boundary,
            domain_change_threshold: config.domain_change_threshold,
            unclassified_significance: config.unclassified_domain_significance,
            classifier: config.classifier(),
            window: GapWindow::default(),
            last_domain: None,
        }
    }

    /// Applies a new config, keeping the gap window and last domain.
    pub fn reconfigure(&mut self, config: &TrackingConfig) {
        let window = std::mem::take(&mut self.window);
        let last_domain = self.last_domain.take();
        *self = Self {
            window,
            last_domain,
            ..Self::from_config(config)
        };
    }

    pub fn gap_window(&self) -> &GapWindow {
        &self.window
    }

    pub fn last_domain(&self) -> Option<&str> {
        self.last_domain.as_deref()
    }

    /// Evaluates one activity signal against the session it would extend.
    ///
    /// Must be called before the signal is recorded on the session, since the
    /// gap is measured from `session.last_activity`.
    pub fn evaluate(
        &mut self,
        session: &BrowsingSession,
        signal: &ActivitySignal,
    ) -> Vec<BoundaryDecision> {
        let mut decisions = Vec::new();

        if let Some(decision) = self.check_navigation_gap(session, signal) {
            decisions.push(decision);
        }
        if let Some(decision) = self.check_domain_change(session, signal) {
            decisions.push(decision);
        }

        decisions
    }

    /// Scores a domain transition in `[0, 1]`.
    pub fn domain_change_significance(&self, from: &str, to: &str) -> f64 {
        if is_related(from, to) {
            RELATED_DOMAIN_SIGNIFICANCE
        } else if self.classifier.crosses_social_work(from, to) {
            SOCIAL_WORK_SIGNIFICANCE
        } else {
            self.unclassified_significance
        }
    }

    fn check_navigation_gap(
        &mut self,
        session: &BrowsingSession,
        signal: &ActivitySignal,
    ) -> Option<BoundaryDecision> {
        if self.gap_threshold_ms == 0 {
            return None;
        }

        let gap = signal.timestamp.saturating_sub(session.last_activity);
        if gap <= self.gap_threshold_ms {
            return None;
        }

        self.window.push(gap);
        let mean = self.window.mean()?;
        let limit = self.gap_threshold_ms as f64 * GAP_MEAN_FACTOR;

        debug!(
            session_id = %session.id,
            gap_ms = gap,
            mean_gap_ms = mean,
            limit_ms = limit,
            window = self.window.len(),
            "Long navigation gap recorded"
        );

        if mean <= limit {
            return None;
        }

        // The successor starts a fresh pattern.
        self.window.clear();

        let metadata = BoundaryMetadata {
            tab_ids: session.tab_ids.iter().copied().collect(),
            window_ids: session.window_ids.iter().copied().collect(),
            gap_ms: Some(gap),
            mean_gap_ms: Some(mean.round() as u64),
            ..BoundaryMetadata::default()
        };
        Some(BoundaryDecision::pair(
            session.id.clone(),
            EndReason::NavigationGap,
            signal.timestamp,
            metadata,
        ))
    }

    fn check_domain_change(
        &mut self,
        session: &BrowsingSession,
        signal: &ActivitySignal,
    ) -> Option<BoundaryDecision> {
        let to = signal.effective_domain()?;
        let from = self.last_domain.replace(to.clone());

        if !self.domain_change_enabled {
            return None;
        }
        let from = from.filter(|f| *f != to)?;
        if is_related(&from, &to) {
            return None;
        }

        let significance = self.domain_change_significance(&from, &to);
        if significance <= self.domain_change_threshold {
            debug!(
                session_id = %session.id,
                from = %from,
                to = %to,
                significance,
                "Domain change below boundary threshold"
            );
            return None;
        }

        let metadata = BoundaryMetadata {
            tab_ids: session.tab_ids.iter().copied().collect(),
            window_ids: session.window_ids.iter().copied().collect(),
            domain_from: Some(from),
            domain_to: Some(to),
            significance: Some(significance),
            ..BoundaryMetadata::default()
        };
        Some(BoundaryDecision::pair(
            session.id.clone(),
            EndReason::DomainChange,
            signal.timestamp,
            metadata,
        ))
    }
}
