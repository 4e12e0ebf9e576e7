//! Rate limiting for command-driven mutations.
//!
//! A fixed window per (user, action), stored in the cache with a TTL of
//! one window so abandoned counters evaporate on their own. Exceeding
//! the window is a user-facing refusal; the action is not performed.

use crate::cache::{CacheError, CacheHandle, RateWindow, keys};
use crate::config::RateLimitConfig;
use crate::platform::UserId;
use chrono::{TimeDelta, Utc};
use std::time::Duration;
use tracing::debug;

pub struct RateLimiter {
    cache: CacheHandle,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: CacheHandle, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    /// Record one action for the user; `true` means allowed.
    pub async fn check(&self, user: UserId, action: &str) -> Result<bool, CacheError> {
        let key = keys::rate_limit(user, action);
        let now = Utc::now();
        let window = TimeDelta::milliseconds(self.config.time_window_ms as i64);

        let current = self
            .cache
            .get::<RateWindow>(&key)
            .await?
            .filter(|w| now - w.window_start < window);

        let updated = match current {
            Some(w) if w.count >= self.config.max_actions => {
                debug!(user_id = %user, action = %action, "Rate limit exceeded");
                crate::metrics::RATE_LIMITED.inc();
                return Ok(false);
            }
            Some(w) => RateWindow {
                count: w.count + 1,
                window_start: w.window_start,
            },
            None => RateWindow {
                count: 1,
                window_start: now,
            },
        };

        let remaining = (updated.window_start + window - now)
            .to_std()
            .unwrap_or(Duration::from_millis(self.config.time_window_ms));
        self.cache.set(&key, &updated, Some(remaining)).await?;
        Ok(true)
    }
}
