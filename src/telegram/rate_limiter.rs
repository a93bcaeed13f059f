//! Rate limiter for Telegram API calls.
//!
//! Implements a fixed request window to avoid triggering Telegram's
//! flood wait errors when the queue dispatches outgoing actions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Counters of the current rate window.
#[derive(Debug)]
struct RateWindow {
    /// When the current window opened.
    started_at: Instant,

    /// Wall-clock counterpart of `started_at`, for reporting.
    started_at_wall: DateTime<Utc>,

    /// Dispatches admitted in the current window.
    request_count: u32,

    /// Admissions are refused until this instant (flood wait).
    held_until: Option<Instant>,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            started_at_wall: Utc::now(),
            request_count: 0,
            held_until: None,
        }
    }
}

/// Point-in-time view of the rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    /// Dispatches admitted in the current window.
    pub request_count: u32,

    /// Maximum dispatches per window.
    pub max_requests: u32,

    /// When the current window opened.
    pub window_start: DateTime<Utc>,
}

/// Fixed-window rate limiter that caps dispatches per time window.
#[derive(Debug)]
pub struct RateLimiter {
    /// Length of one window.
    window_size: Duration,

    /// Maximum admissions per window.
    max_requests: u32,

    window: Mutex<RateWindow>,
}

impl RateLimiter {
    /// Creates a new rate limiter admitting `max_requests` per `window_size`.
    #[must_use]
    pub fn new(window_size: Duration, max_requests: u32) -> Self {
        Self {
            window_size,
            max_requests,
            window: Mutex::new(RateWindow::new()),
        }
    }

    /// Creates a rate limiter from a window length in seconds.
    #[must_use]
    pub fn from_secs(secs: u64, max_requests: u32) -> Self {
        Self::new(Duration::from_secs(secs), max_requests)
    }

    /// Tries to admit one dispatch.
    ///
    /// Opens a fresh window when the current one has elapsed. A denied call
    /// leaves the counters untouched.
    pub async fn admit(&self) -> bool {
        let mut window = self.window.lock().await;
        let now = Instant::now();

        if let Some(until) = window.held_until {
            if now < until {
                debug!("Rate limiter: flood hold active for {:?}", until - now);
                return false;
            }
            window.held_until = None;
        }

        if now.duration_since(window.started_at) >= self.window_size {
            window.started_at = now;
            window.started_at_wall = Utc::now();
            window.request_count = 0;
        }

        if window.request_count < self.max_requests {
            window.request_count += 1;
            true
        } else {
            debug!(
                "Rate limiter: window exhausted ({}/{})",
                window.request_count, self.max_requests
            );
            false
        }
    }

    /// Refuses every admission for the given duration.
    ///
    /// Used when Telegram answers with a flood wait.
    pub async fn hold_for(&self, duration: Duration) {
        warn!("Holding outgoing requests for {:?} (flood wait)", duration);
        let mut window = self.window.lock().await;
        let until = Instant::now() + duration;
        if window.held_until.is_none_or(|current| current < until) {
            window.held_until = Some(until);
        }
    }

    /// Returns the current window counters.
    pub async fn snapshot(&self) -> RateSnapshot {
        let window = self.window.lock().await;
        RateSnapshot {
            request_count: window.request_count,
            max_requests: self.max_requests,
            window_start: window.started_at_wall,
        }
    }

    /// Time left until the current window closes.
    pub async fn time_until_reset(&self) -> Duration {
        let window = self.window.lock().await;
        self.window_size
            .saturating_sub(window.started_at.elapsed())
    }

    /// Resets the rate limiter, opening a fresh window.
    pub async fn reset(&self) {
        let mut window = self.window.lock().await;
        *window = RateWindow::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_max_then_denies() {
        let limiter = RateLimiter::from_secs(60, 3);

        for _ in 0..3 {
            assert!(limiter.admit().await);
        }
        assert!(!limiter.admit().await);

        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.max_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_has_no_side_effects() {
        let limiter = RateLimiter::from_secs(60, 1);
        assert!(limiter.admit().await);

        for _ in 0..5 {
            assert!(!limiter.admit().await);
        }
        assert_eq!(limiter.snapshot().await.request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_elapsed() {
        let limiter = RateLimiter::from_secs(60, 2);
        assert!(limiter.admit().await);
        assert!(limiter.admit().await);
        assert!(!limiter.admit().await);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!limiter.admit().await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.admit().await);
        assert_eq!(limiter.snapshot().await.request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_blocks_until_expired() {
        let limiter = RateLimiter::from_secs(60, 10);
        limiter.hold_for(Duration::from_secs(30)).await;
        assert!(!limiter.admit().await);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.admit().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_reset() {
        let limiter = RateLimiter::from_secs(60, 1);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.time_until_reset().await, Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_reset() {
        let limiter = RateLimiter::from_secs(60, 1);

        assert!(limiter.admit().await);
        assert!(!limiter.admit().await);

        limiter.reset().await;
        assert!(limiter.admit().await);
    }
}
