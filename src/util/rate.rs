//! A small token-bucket rate limiter for noisy packet-path log lines.
//!
//! Used to implement the `log_ecn_error` tunable: ECN decap
//! errors are common under sustained congestion and must not be logged at
//! line rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Allows up to `burst` events per `interval`, then drops until the
/// interval has elapsed again.
///
/// # Example
///
/// ```
/// use vxlan_core::util::rate::RateLimiter;
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new(2, Duration::from_secs(1));
/// assert!(limiter.allow());
/// assert!(limiter.allow());
/// assert!(!limiter.allow()); // burst exhausted
/// ```
pub struct RateLimiter {
    burst: u64,
    interval: Duration,
    window_start: AtomicU64,
    count_in_window: AtomicU64,
    epoch: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `burst` events per `interval`.
    pub fn new(burst: u64, interval: Duration) -> Self {
        Self {
            burst,
            interval,
            window_start: AtomicU64::new(0),
            count_in_window: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Returns `true` if the caller may proceed (e.g. emit a log line).
    pub fn allow(&self) -> bool {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let interval_ms = self.interval.as_millis().max(1) as u64;
        let window_start = self.window_start.load(Ordering::Relaxed);

        if now_ms.saturating_sub(window_start) >= interval_ms {
            // Roll to a new window. Racing threads may both reset; that is
            // fine, this is a best-effort limiter, not an exact one.
            self.window_start.store(now_ms, Ordering::Relaxed);
            self.count_in_window.store(1, Ordering::Relaxed);
            return self.burst > 0;
        }

        let prev = self.count_in_window.fetch_add(1, Ordering::Relaxed);
        prev < self.burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_burst_then_blocks() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn zero_burst_never_allows() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert!(!limiter.allow());
    }
}
