//! Token-bucket rate limiting, keyed per client IP for the gateway.
//!
//! Built on `governor`'s keyed limiter, the same crate and quota shape the
//! teacher's own `KeyedRateLimiter<K>` uses for per-entity limits — the
//! gateway's per-IP case is exactly that shape with `K = IpAddr`.

use governor::clock::{Clock as GovernorClock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;

/// Rate limit configuration: `max_requests_per_minute` sustained, with burst
/// capacity equal to `max_requests_per_minute` (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Sustained requests allowed per minute.
    pub max_requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 120,
        }
    }
}

/// Outcome of a rate-limit check, carrying the headers the gateway must
/// attach to the response either way.
pub struct CheckResult {
    /// Whether the request is allowed.
    pub allowed: bool,
    /// Nominal requests-per-minute quota, surfaced as `X-RateLimit-Remaining`
    /// on success; `governor` does not expose exact remaining capacity per
    /// key, so this is the configured ceiling rather than a live count.
    pub remaining: u32,
    /// Seconds to wait before retrying, set when `allowed` is false.
    pub retry_after_secs: u64,
}

/// Per-IP keyed rate limiter over `governor`'s in-memory keyed state store.
pub struct TokenBucket {
    config: RateLimitConfig,
    limiter: GovernorRateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>,
    clock: DefaultClock,
}

impl TokenBucket {
    /// Build a limiter from `config`. Burst equals the sustained rate, same
    /// as the teacher's `KeyedRateLimiter::new` when no explicit burst is
    /// configured.
    pub fn new(config: RateLimitConfig) -> Self {
        let max_requests = NonZeroU32::new(config.max_requests_per_minute).unwrap_or_else(|| NonZeroU32::new(1).unwrap());
        let quota = Quota::per_minute(max_requests);
        Self {
            config,
            limiter: GovernorRateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Check and consume one token for `ip`.
    pub fn check(&self, ip: IpAddr) -> CheckResult {
        match self.limiter.check_key(&ip) {
            Ok(_) => CheckResult {
                allowed: true,
                remaining: self.config.max_requests_per_minute,
                retry_after_secs: 0,
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                CheckResult {
                    allowed: false,
                    remaining: 0,
                    retry_after_secs: wait.as_secs().max(1),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn allows_burst_then_rejects() {
        let limiter = TokenBucket::new(RateLimitConfig {
            max_requests_per_minute: 5,
        });
        for _ in 0..5 {
            assert!(limiter.check(ip()).allowed);
        }
        let rejected = limiter.check(ip());
        assert!(!rejected.allowed);
        assert!(rejected.retry_after_secs > 0);
    }

    #[test]
    fn refills_over_time() {
        let limiter = TokenBucket::new(RateLimitConfig {
            max_requests_per_minute: 60,
        });
        for _ in 0..60 {
            assert!(limiter.check(ip()).allowed);
        }
        assert!(!limiter.check(ip()).allowed);
        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.check(ip()).allowed);
    }

    #[test]
    fn different_ips_have_independent_buckets() {
        let limiter = TokenBucket::new(RateLimitConfig {
            max_requests_per_minute: 1,
        });
        assert!(limiter.check(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).allowed);
        assert!(limiter.check(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))).allowed);
    }
}
