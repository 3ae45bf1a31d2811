//! Process-wide request spacing.
//!
//! Both portals share one host, so the pipeline uses a single limiter: one
//! mutex-guarded `last_request` timestamp shared by every worker. Acquiring
//! sleeps until the configured spacing has elapsed since the previous
//! request started, then stamps the clock. This serializes the first
//! instant of each request, not its duration - concurrent downloads still
//! overlap.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use deedpull_core::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
//!
//! // First request proceeds immediately
//! limiter.acquire().await;
//!
//! // Second request waits out the remaining spacing
//! limiter.acquire().await;
//! # }
//! ```

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Shared minimum spacing between request starts.
///
/// Designed to be wrapped in `Arc` and cloned into every worker task.
/// `tokio::sync::Mutex` is required (not `std`) because the lock is held
/// across the sleep so concurrent acquirers queue up fairly.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum delay between request starts.
    delay: Duration,

    /// Whether limiting is disabled (`--rate-limit 0`).
    disabled: bool,

    /// Start time of the most recent request.
    /// `None` until the first acquire; the first request is never delayed.
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given minimum spacing.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = delay.as_millis()))]
    pub fn new(delay: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            delay,
            disabled: false,
            last_request: Mutex::new(None),
        }
    }

    /// Creates a disabled limiter that applies no delays.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            delay: Duration::ZERO,
            disabled: true,
            last_request: Mutex::new(None),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured spacing.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until the spacing since the last request start has elapsed,
    /// then stamps the clock.
    #[instrument(skip(self))]
    pub async fn acquire(&self) {
        if self.disabled {
            return;
        }

        let mut last_request = self.last_request.lock().await;

        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                let wait = self.delay.saturating_sub(elapsed);
                debug!(wait_ms = wait.as_millis(), "applying rate limit delay");
                tokio::time::sleep(wait).await;
            }
        } else {
            debug!("first request - no delay");
        }

        *last_request = Some(Instant::now());
    }
}
