//! Token-bucket admission control in front of the broker gateway.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::{BrokerError, BrokerResult};

/// Token bucket with a burst capacity and a sustained refill rate.
///
/// Holds its own internal lock so callers on the read-mostly paths are
/// never serialized behind ledger contention.
pub struct TokenBucket {
    limiter: DefaultDirectRateLimiter,
    per_second: u32,
    burst: u32,
}

impl TokenBucket {
    /// Build a bucket refilled at `per_second` tokens with room for
    /// `burst` tokens of instantaneous demand. Zero values are clamped
    /// to one.
    #[must_use]
    pub fn new(per_second: u32, burst: u32) -> Self {
        let per_second = per_second.max(1);
        let burst = burst.max(1);
        let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct(quota),
            per_second,
            burst,
        }
    }

    /// Take a token without waiting. Returns `false` when the bucket is
    /// empty.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Wait up to `timeout` for a token, failing with
    /// [`BrokerError::RateLimited`] once the deadline passes.
    pub async fn acquire(&self, timeout: Duration) -> BrokerResult<()> {
        tokio::time::timeout(timeout, self.limiter.until_ready())
            .await
            .map_err(|_| BrokerError::RateLimited)
    }

    /// Sustained refill rate in tokens per second.
    #[must_use]
    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    /// Burst capacity of the bucket.
    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }
}
