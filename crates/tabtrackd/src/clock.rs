//! Millisecond clock for the tracker.
//!
//! Timestamps are Unix epoch milliseconds, anchored once from the wall
//! clock and then advanced by the tokio monotonic clock. Wall-clock jumps
//! after startup therefore never move session timestamps backwards, and
//! tests running on a paused tokio clock get deterministic time.

use chrono::Utc;
use tokio::time::{Duration, Instant};

use tabtrack_core::Timestamp;

/// Monotonic epoch-ms clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
    origin_ms: Timestamp,
}

impl Clock {
    /// Anchors the clock at the current wall-clock time.
    pub fn system() -> Self {
        let now_ms = Utc::now().timestamp_millis().max(0) as Timestamp;
        Self::starting_at(now_ms)
    }

    /// Anchors the clock so that "now" reads `origin_ms`.
    pub fn starting_at(origin_ms: Timestamp) -> Self {
        Self {
            origin: Instant::now(),
            origin_ms,
        }
    }

    /// Current time in epoch ms.
    pub fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_millis();
        self.origin_ms
            .saturating_add(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }

    /// How long until `deadline`; zero if it already passed.
    pub fn until(&self, deadline: Timestamp) -> Duration {
        Duration::from_millis(deadline.saturating_sub(self.now()))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = Clock::starting_at(1_000);
        assert_eq!(clock.now(), 1_000);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now(), 1_250);
        assert_eq!(clock.until(2_000), Duration::from_millis(750));
        assert_eq!(clock.until(10), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_system_clock_is_recent() {
        // 2020-01-01 in epoch ms.
        assert!(Clock::system().now() > 1_577_836_800_000);
    }
}
