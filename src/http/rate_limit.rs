//! Rate limiting implementation
//!
//! Uses the governor crate for the pacing itself. A single [`RateLimiter`] is created per
//! upstream API and cloned into every collection pipeline that talks to it; clones share
//! the same bucket, so the cap is global across collections.
//!
//! Waiters are admitted in FIFO order: a tokio mutex (which is fair) serializes callers
//! in front of the governor so no caller can overtake one that arrived earlier.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Minimum time between two grants
    pub interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl RateLimiterConfig {
    /// Create a config with the given minimum interval
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Create a config allowing `requests_per_second` requests
    pub fn per_second(requests_per_second: u32) -> Self {
        let rps = requests_per_second.max(1);
        Self::new(Duration::from_secs(1) / rps)
    }

    /// Derive a config from the upstream's published ceiling, keeping `headroom`
    /// (a fraction between 0 and 1) in reserve.
    ///
    /// `from_ceiling(50, 0.6)` paces at 20 requests per second (50 ms apart).
    pub fn from_ceiling(ceiling_rps: u32, headroom: f64) -> Self {
        let headroom = headroom.clamp(0.0, 0.95);
        let effective = (f64::from(ceiling_rps.max(1)) * (1.0 - headroom)).max(0.001);
        Self::new(Duration::from_secs_f64(1.0 / effective))
    }
}

/// Shared, FIFO-fair minimum-interval rate limiter
///
/// The governor bucket holds a single cell, so in any window `W` at most
/// `W / interval + 1` grants are handed out.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
    queue: Arc<Mutex<()>>,
    interval: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config
    pub fn new(config: &RateLimiterConfig) -> Self {
        let quota = Quota::with_period(config.interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(NonZeroU32::MIN);

        Self {
            limiter: Arc::new(Governor::direct(quota)),
            queue: Arc::new(Mutex::new(())),
            interval: config.interval,
        }
    }

    /// Create a rate limiter with default settings
    pub fn default_limiter() -> Self {
        Self::new(&RateLimiterConfig::default())
    }

    /// Wait for this caller's turn. Callers are released in arrival order.
    pub async fn acquire(&self) {
        let _turn = self.queue.lock().await;
        self.limiter.until_ready().await;
    }

    /// Try to take a grant without waiting
    pub fn try_acquire(&self) -> bool {
        match self.queue.try_lock() {
            Ok(_turn) => self.limiter.check().is_ok(),
            Err(_) => false,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::default_limiter()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
