//! Shared outbound-call throttle

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Token-bucket permit gate shared by every component that crosses a
/// process boundary (DNS, HTTPS, directory RPC, persistence I/O).
///
/// Acquisition suspends the caller until capacity frees. This is the
/// pipeline's only backpressure mechanism during large batch runs.
pub struct CallLimiter {
    inner: DefaultDirectRateLimiter,
}

impl CallLimiter {
    /// Limiter allowing `per_second` sustained calls with `burst` headroom.
    /// Zero values are clamped to one.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            inner: RateLimiter::direct(quota),
        }
    }

    /// Wait for one outbound-call permit.
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn burst_permits_are_immediate() {
        let limiter = CallLimiter::new(10, 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed().as_millis() < 50);
    }

    #[tokio::test]
    async fn exhausted_bucket_suspends_the_caller() {
        let limiter = CallLimiter::new(50, 1);
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        // Refill at 50/s means the second permit waits roughly 20ms.
        assert!(start.elapsed().as_millis() >= 10);
    }

    #[tokio::test]
    async fn zero_quota_is_clamped() {
        let limiter = CallLimiter::new(0, 0);
        limiter.acquire().await;
    }
}
