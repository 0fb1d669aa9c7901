//! Per-policy resilience configuration.
//!
//! A [`PolicyConfig`] bundles everything one named policy needs: circuit
//! breaker window and threshold, timeout, bulkhead size and rate limit.
//! Builders validate on [`build`](PolicyConfigBuilder::build); an invalid
//! policy is a [`ConfigError`], never a silent default.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::rate_limit::RateLimitConfig;
use crate::timeout::TimeoutPolicy;
use std::time::Duration;

/// Complete, validated configuration for one named policy.
///
/// Defaults: 3 minimum calls over a 10-call window, 20 % failure threshold,
/// 60 s open-state wait, 4 s timeout, 25 concurrent calls, 50 calls per second.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    circuit_breaker: CircuitBreakerConfig,
    timeout: Duration,
    bulkhead_max_concurrent: usize,
    rate_limit: RateLimitConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            timeout: TimeoutPolicy::default().duration(),
            bulkhead_max_concurrent: 25,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl PolicyConfig {
    /// Builder starting from the library defaults.
    pub fn builder() -> PolicyConfigBuilder {
        PolicyConfigBuilder { config: PolicyConfig::default() }
    }

    /// Builder starting from this config's values.
    pub fn to_builder(&self) -> PolicyConfigBuilder {
        PolicyConfigBuilder { config: self.clone() }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreakerConfig {
        &self.circuit_breaker
    }

    pub fn timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::from_validated(self.timeout)
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    pub fn bulkhead_max_concurrent(&self) -> usize {
        self.bulkhead_max_concurrent
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        self.rate_limit
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()?;
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "timeout_duration" });
        }
        if self.bulkhead_max_concurrent == 0 {
            return Err(ConfigError::InvalidBulkheadLimit);
        }
        self.rate_limit.validate()
    }
}

/// Builder for [`PolicyConfig`].
#[derive(Debug, Clone)]
pub struct PolicyConfigBuilder {
    config: PolicyConfig,
}

impl PolicyConfigBuilder {
    pub fn minimum_calls(mut self, n: usize) -> Self {
        self.config.circuit_breaker.set_minimum_calls(n);
        self
    }

    pub fn sliding_window_size(mut self, n: usize) -> Self {
        self.config.circuit_breaker.set_sliding_window_size(n);
        self
    }

    /// Percentage in `(0, 100]`.
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.config.circuit_breaker.set_failure_rate_threshold(percent);
        self
    }

    pub fn wait_duration_in_open_state(mut self, d: Duration) -> Self {
        self.config.circuit_breaker.set_wait_duration_in_open_state(d);
        self
    }

    pub fn timeout_duration(mut self, d: Duration) -> Self {
        self.config.timeout = d;
        self
    }

    pub fn bulkhead_max_concurrent(mut self, n: usize) -> Self {
        self.config.bulkhead_max_concurrent = n;
        self
    }

    pub fn rate_limit(mut self, quota: u32, period: Duration) -> Self {
        self.config.rate_limit.set_quota(quota);
        self.config.rate_limit.set_period(period);
        self
    }

    pub(crate) fn current_rate_limit(&self) -> RateLimitConfig {
        self.config.rate_limit
    }

    pub fn build(self) -> Result<PolicyConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
