//! Productivity metrics for closed sessions.

use serde::{Deserialize, Serialize};

use crate::session::{BrowsingSession, SessionId, Timestamp};

/// Domain count at which the diversity factor saturates.
pub const FULL_DIVERSITY_DOMAINS: usize = 5;

/// Derived, immutable metrics for one session.
///
/// `tab_switches`, `window_switches` and `interaction_count` are reserved for
/// collaborators that enrich the record; the tracker leaves them at zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityMetrics {
    pub session_id: SessionId,
    /// Wall-clock span in ms.
    pub total_time: u64,
    pub active_time: u64,
    pub idle_time: u64,
    pub unique_domains: usize,
    /// Normalized focus score, 0-100.
    pub focus_score: f64,
    #[serde(default)]
    pub tab_switches: u64,
    #[serde(default)]
    pub window_switches: u64,
    #[serde(default)]
    pub interaction_count: u64,
}

impl ProductivityMetrics {
    /// Computes metrics for `session` as of `now`.
    ///
    /// Closed sessions use their recorded end time, so the result is stable.
    pub fn calculate(session: &BrowsingSession, now: Timestamp) -> Self {
        let total_time = session.total_time(now);
        let idle_time = session.idle_time.min(total_time);
        let active_time = session.active_time.min(total_time.saturating_sub(idle_time));
        let unique_domains = session.domains.len();

        Self {
            session_id: session.id.clone(),
            total_time,
            active_time,
            idle_time,
            unique_domains,
            focus_score: focus_score(total_time, active_time, idle_time, unique_domains),
            ..Self::default()
        }
    }
}

/// `activeRatio * 100 * (1 - idleRatio) * min(domains / 5, 1)`, clamped to 0-100.
///
/// A zero-length session scores 0.
pub fn focus_score(total_time: u64, active_time: u64, idle_time: u64, domains: usize) -> f64 {
    if total_time == 0 {
        return 0.0;
    }
    let total = total_time as f64;
    let active_ratio = active_time as f64 / total;
    let idle_penalty = 1.0 - idle_time as f64 / total;
    let diversity = (domains as f64 / FULL_DIVERSITY_DOMAINS as f64).min(1.0);

    (active_ratio * 100.0 * idle_penalty * diversity).clamp(0.0, 100.0)
}
