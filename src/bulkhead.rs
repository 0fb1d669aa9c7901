//! Bulkhead permits for concurrency limiting.
//!
//! The counter lives inside a policy's state cell; callers hold a
//! `BulkheadPermit` guard from the registry so every successful acquire is
//! paired with exactly one release, whatever way the call ends.

use crate::error::ConfigError;

/// Counting permit pool bounded to `[0, max_concurrent]`.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    available: usize,
    max_concurrent: usize,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize) -> Result<Self, ConfigError> {
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidBulkheadLimit);
        }
        Ok(Self { available: max_concurrent, max_concurrent })
    }

    pub(crate) fn from_validated(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self { available: max_concurrent, max_concurrent }
    }

    /// Take a permit if one is available.
    pub fn try_acquire(&mut self) -> bool {
        if self.available == 0 {
            return false;
        }
        self.available -= 1;
        true
    }

    /// Return a permit. Extra releases are ignored rather than growing the pool.
    pub fn release(&mut self) {
        if self.available < self.max_concurrent {
            self.available += 1;
        } else {
            tracing::warn!(
                target: "lifeline::bulkhead",
                max = self.max_concurrent,
                "bulkhead release without matching acquire ignored"
            );
        }
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.available
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
