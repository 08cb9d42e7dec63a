use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use thiserror::Error;

use crate::config::RouteQuota;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit exceeded. Try again in {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },
}

/// In-memory per-client rate limiter backed by the `governor` crate (GCRA).
///
/// Each key (usually a client IP) gets its own bucket refilled at
/// `per_minute` cells per minute and holding at most `burst` cells.
pub struct RateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    quota: RouteQuota,
}

impl RateLimiter {
    #[must_use]
    pub fn new(quota: RouteQuota) -> Self {
        let per_minute = NonZeroU32::new(quota.per_minute).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(quota.burst).unwrap_or(nonzero!(1u32));
        let governor_quota = Quota::per_minute(per_minute).allow_burst(burst);

        Self {
            limiter: GovernorRateLimiter::keyed(governor_quota),
            quota,
        }
    }

    #[must_use]
    pub const fn quota(&self) -> RouteQuota {
        self.quota
    }

    /// Consume one cell for `key`
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(RateLimitError::RateLimitExceeded {
                    retry_after_seconds: wait.as_secs().max(1),
                })
            }
        }
    }

    /// Forget keys whose buckets are full again
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}
