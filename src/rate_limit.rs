//! Fixed-period rate limiting.
//!
//! Each policy owns a [`RateLimiterBucket`] holding the quota left in the
//! current period. Periods are aligned to the bucket's first period start, so
//! a bucket that sat idle across several periods starts the one `now` falls in.

use crate::error::ConfigError;
use std::time::Duration;

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Number of permits remaining in this period after this acquisition.
        remaining: u32,
    },
    /// The request is denied.
    Denied {
        /// How long until the next period refills the quota.
        wait: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Quota per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    quota: u32,
    period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { quota: 50, period: Duration::from_secs(1) }
    }
}

impl RateLimitConfig {
    pub fn new(quota: u32, period: Duration) -> Result<Self, ConfigError> {
        let cfg = Self { quota, period };
        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.quota == 0 {
            return Err(ConfigError::InvalidRateLimitQuota);
        }
        if self.period.as_millis() == 0 {
            return Err(ConfigError::ZeroDuration { field: "rate_limit_period" });
        }
        Ok(())
    }

    /// Calls admitted per period.
    pub fn quota(&self) -> u32 {
        self.quota
    }

    /// Length of one period.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub(crate) fn set_quota(&mut self, quota: u32) {
        self.quota = quota;
    }

    pub(crate) fn set_period(&mut self, period: Duration) {
        self.period = period;
    }
}

/// Remaining quota and period start for one policy.
#[derive(Debug, Clone)]
pub struct RateLimiterBucket {
    quota: u32,
    period_millis: u64,
    remaining: u32,
    period_start_millis: Option<u64>,
}

impl RateLimiterBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            quota: config.quota,
            // Sub-millisecond periods are rejected by validation; clamp anyway.
            period_millis: u64::try_from(config.period.as_millis()).unwrap_or(u64::MAX).max(1),
            remaining: config.quota,
            period_start_millis: None,
        }
    }

    /// Refill if the current period has elapsed, then take one unit of quota.
    pub fn try_admit(&mut self, now_millis: u64) -> Decision {
        let start = self.roll(now_millis);
        if self.remaining > 0 {
            self.remaining -= 1;
            Decision::Allowed { remaining: self.remaining }
        } else {
            let next = start.saturating_add(self.period_millis);
            Decision::Denied { wait: Duration::from_millis(next.saturating_sub(now_millis)) }
        }
    }

    /// Quota left in the period `now_millis` falls in, without consuming any.
    pub fn remaining(&mut self, now_millis: u64) -> u32 {
        self.roll(now_millis);
        self.remaining
    }

    fn roll(&mut self, now_millis: u64) -> u64 {
        let start = *self.period_start_millis.get_or_insert(now_millis);
        let elapsed = now_millis.saturating_sub(start);
        if elapsed < self.period_millis {
            return start;
        }
        let periods = elapsed / self.period_millis;
        let new_start = start.saturating_add(periods.saturating_mul(self.period_millis));
        self.period_start_millis = Some(new_start);
        self.remaining = self.quota;
        new_start
    }
}
