//! Rate limiting for the credential endpoint.
//!
//! Every credential request costs a signature verification and a database
//! lookup before it can be rejected, so the endpoint is throttled as a whole.

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;
use tonic::{Request, Status};

pub const DEFAULT_PER_SECOND: u32 = 2;
pub const DEFAULT_BURST: u32 = 10;

/// Shared token bucket for credential requests.
#[derive(Clone)]
pub struct EnrollmentRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl EnrollmentRateLimiter {
    /// Allow `per_second` sustained requests with bursts of `burst_size`.
    ///
    /// Zero values are raised to one.
    pub fn new(per_second: u32, burst_size: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst_size = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::MIN);

        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// `Err(ResourceExhausted)` once the bucket is empty.
    pub fn check(&self) -> Result<(), Status> {
        self.limiter.check().map_err(|_| {
            tracing::warn!("Rate limit exceeded for credential requests");
            Status::resource_exhausted("Rate limit exceeded. Please try again later.")
        })
    }
}

impl Default for EnrollmentRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PER_SECOND, DEFAULT_BURST)
    }
}

/// Applies an [`EnrollmentRateLimiter`] to every call of a tonic service.
#[derive(Clone)]
pub struct RateLimitInterceptor {
    limiter: EnrollmentRateLimiter,
}

impl RateLimitInterceptor {
    pub fn new(limiter: EnrollmentRateLimiter) -> Self {
        Self { limiter }
    }
}

impl tonic::service::Interceptor for RateLimitInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.limiter.check()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tonic::service::Interceptor;

    #[test]
    fn test_rate_limiter_allows_burst() {
        let limiter = EnrollmentRateLimiter::new(1, 5);

        for i in 0..5 {
            assert!(limiter.check().is_ok(), "request {} should fit the burst", i);
        }
        let err = limiter.check().unwrap_err();
        assert_eq!(err.code(), tonic::Code::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_rate_limiter_refills() {
        let limiter = EnrollmentRateLimiter::new(10, 1);

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        // 10 per second = 100ms per token
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_clones_share_bucket() {
        let limiter = EnrollmentRateLimiter::new(1, 2);
        let other = limiter.clone();

        assert!(limiter.check().is_ok());
        assert!(other.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_zero_values_still_allow_one() {
        let limiter = EnrollmentRateLimiter::new(0, 0);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_interceptor_rejects_after_burst() {
        let mut interceptor = RateLimitInterceptor::new(EnrollmentRateLimiter::new(1, 1));
        assert!(interceptor.call(Request::new(())).is_ok());
        let err = interceptor.call(Request::new(())).unwrap_err();
        assert_eq!(err.code(), tonic::Code::ResourceExhausted);
    }
}
