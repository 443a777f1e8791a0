//! Per (channel, user) token buckets for inbound messages.

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use warden_types::{RateLimitConfig, WardenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    burst: u32,
    /// Tokens per second.
    refill_rate: f64,
    buckets: HashMap<(String, String), Bucket>,
}

impl RateLimiter {
    /// Zero burst or zero refill is rejected: limiting cannot be switched
    /// off through configuration.
    pub fn new(config: RateLimitConfig) -> Result<Self, WardenError> {
        if config.burst == 0 {
            return Err(WardenError::ConfigError(
                "rate_limit.burst must be at least 1".into(),
            ));
        }
        if config.per_minute == 0 {
            return Err(WardenError::ConfigError(
                "rate_limit.per_minute must be at least 1".into(),
            ));
        }
        Ok(Self {
            burst: config.burst,
            refill_rate: f64::from(config.per_minute) / 60.0,
            buckets: HashMap::new(),
        })
    }

    /// Take one token for `(channel, user)` at `now`.
    pub fn check(&mut self, channel: &str, user: &str, now: Instant) -> RateDecision {
        let burst = f64::from(self.burst);
        let bucket = self
            .buckets
            .entry((channel.to_string(), user.to_string()))
            .or_insert(Bucket {
                tokens: burst,
                last_refill: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(burst);
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return RateDecision::Allowed;
        }
        let retry_after_secs = ((1.0 - bucket.tokens) / self.refill_rate).ceil() as u64;
        debug!(channel, user, retry_after_secs, "rate limited");
        RateDecision::Limited {
            retry_after_secs: retry_after_secs.max(1),
        }
    }

    /// Drop buckets that have refilled completely by `now`.
    pub fn prune(&mut self, now: Instant) {
        let burst = f64::from(self.burst);
        let rate = self.refill_rate;
        self.buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.last_refill).as_secs_f64();
            b.tokens + elapsed * rate < burst
        });
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(burst: u32, per_minute: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig { burst, per_minute }).unwrap()
    }

    #[test]
    fn zero_settings_are_rejected() {
        for (burst, per_minute) in [(0, 30), (5, 0)] {
            assert!(matches!(
                RateLimiter::new(RateLimitConfig { burst, per_minute }),
                Err(WardenError::ConfigError(_))
            ));
        }
    }

    #[test]
    fn burst_then_limited() {
        let mut rl = limiter(3, 60);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(rl.check("telegram", "42", now).is_allowed());
        }
        assert_eq!(
            rl.check("telegram", "42", now),
            RateDecision::Limited { retry_after_secs: 1 }
        );
    }

    #[test]
    fn tokens_refill_over_time() {
        let mut rl = limiter(1, 6);
        let start = Instant::now();
        assert!(rl.check("slack", "u", start).is_allowed());
        assert_eq!(
            rl.check("slack", "u", start),
            RateDecision::Limited { retry_after_secs: 10 }
        );
        assert!(rl.check("slack", "u", start + Duration::from_secs(10)).is_allowed());
    }

    #[test]
    fn buckets_are_per_channel_and_user() {
        let mut rl = limiter(1, 1);
        let now = Instant::now();
        assert!(rl.check("telegram", "a", now).is_allowed());
        assert!(rl.check("telegram", "b", now).is_allowed());
        assert!(rl.check("slack", "a", now).is_allowed());
        assert!(!rl.check("telegram", "a", now).is_allowed());
    }

    #[test]
    fn prune_drops_full_buckets() {
        let mut rl = limiter(2, 60);
        let now = Instant::now();
        rl.check("log", "a", now);
        assert_eq!(rl.tracked(), 1);
        rl.prune(now);
        assert_eq!(rl.tracked(), 1);
        rl.prune(now + Duration::from_secs(5));
        assert_eq!(rl.tracked(), 0);
    }
}
