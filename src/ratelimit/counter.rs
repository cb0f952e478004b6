//! Fixed-window counter state.

use std::time::Duration;

/// The observable result of counting a request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Time until the current window ends.
    pub reset_after: Duration,
}

/// A fixed-window counter for a single rate key.
///
/// `count` covers requests inside `[window_start_ms, window_end_ms)`. Once the
/// clock reaches `window_end_ms` the next hit opens a fresh window rather than
/// adding to the stale one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    /// Requests counted in this window
    pub count: u64,
    /// When the window opened (epoch ms)
    pub window_start_ms: u64,
    /// When the window closes (epoch ms, exclusive)
    pub window_end_ms: u64,
}

impl WindowCounter {
    /// Open an empty window starting at `now_ms`.
    pub fn open(now_ms: u64, window: Duration) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
            window_end_ms: now_ms.saturating_add(window_ms(window)),
        }
    }

    /// Whether the window has closed at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.window_end_ms
    }

    /// Count `hits` requests at `now_ms`, rolling the window over first if it
    /// has closed. Returns the count after the increment.
    pub fn hit(&mut self, now_ms: u64, window: Duration, hits: u64) -> u64 {
        if self.is_expired(now_ms) {
            *self = Self::open(now_ms, window);
        }
        self.count = self.count.saturating_add(hits);
        self.count
    }

    /// Give back one counted request. A closed window is left alone.
    /// Returns the count afterwards.
    pub fn refund(&mut self, now_ms: u64) -> u64 {
        if self.is_expired(now_ms) {
            return 0;
        }
        self.count = self.count.saturating_sub(1);
        self.count
    }

    /// Time left in the window at `now_ms`.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.window_end_ms.saturating_sub(now_ms))
    }

    /// Snapshot this counter as a [`Hit`].
    pub fn snapshot(&self, now_ms: u64) -> Hit {
        Hit {
            count: self.count,
            reset_after: self.remaining(now_ms),
        }
    }
}

/// Window length in whole milliseconds, saturating.
pub(crate) fn window_ms(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_open_window_bounds() {
        let counter = WindowCounter::open(1_000, MINUTE);
        assert_eq!(counter.count, 0);
        assert_eq!(counter.window_start_ms, 1_000);
        assert_eq!(counter.window_end_ms, 61_000);
    }

    #[test]
    fn test_hit_within_window_accumulates() {
        let mut counter = WindowCounter::open(0, MINUTE);

        assert_eq!(counter.hit(0, MINUTE, 1), 1);
        assert_eq!(counter.hit(10, MINUTE, 1), 2);
        assert_eq!(counter.hit(59_999, MINUTE, 3), 5);
    }

    #[test]
    fn test_hit_after_window_end_starts_fresh() {
        let mut counter = WindowCounter::open(0, MINUTE);
        counter.hit(0, MINUTE, 4);

        // The end bound is exclusive.
        assert_eq!(counter.hit(60_000, MINUTE, 1), 1);
        assert_eq!(counter.window_start_ms, 60_000);
        assert_eq!(counter.window_end_ms, 120_000);
    }

    #[test]
    fn test_remaining_counts_down() {
        let counter = WindowCounter::open(0, MINUTE);
        assert_eq!(counter.remaining(30), Duration::from_millis(59_970));
        assert_eq!(counter.remaining(90_000), Duration::ZERO);
    }

    #[test]
    fn test_refund_stays_in_window() {
        let mut counter = WindowCounter::open(0, MINUTE);
        counter.hit(0, MINUTE, 2);

        assert_eq!(counter.refund(10), 1);
        assert_eq!(counter.refund(20), 0);
        assert_eq!(counter.refund(30), 0);

        counter.hit(40, MINUTE, 1);
        assert_eq!(counter.refund(60_000), 0);
        assert_eq!(counter.count, 1);
    }
}
