//! Count-based sliding window of call outcomes.

use crate::error::CallOutcome;
use std::collections::VecDeque;

/// The last `capacity` outcomes recorded for one policy.
///
/// Invariant: `len() <= capacity()`. The failure rate is undefined (`None`)
/// until `minimum_calls` outcomes have been recorded.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    outcomes: VecDeque<CallOutcome>,
    capacity: usize,
    minimum_calls: usize,
    failures: usize,
}

impl SlidingWindow {
    /// Create an empty window. `capacity` and `minimum_calls` are expected to be
    /// validated already (see [`crate::PolicyConfig`]); both are clamped to at least 1.
    pub fn new(capacity: usize, minimum_calls: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            minimum_calls: minimum_calls.clamp(1, capacity),
            failures: 0,
        }
    }

    /// Append an outcome, evicting the oldest one when the window is full.
    pub fn record(&mut self, outcome: CallOutcome) {
        if self.outcomes.len() == self.capacity {
            if let Some(evicted) = self.outcomes.pop_front() {
                if evicted.is_failure() {
                    self.failures -= 1;
                }
            }
        }
        if outcome.is_failure() {
            self.failures += 1;
        }
        self.outcomes.push_back(outcome);
    }

    /// Fraction of failed outcomes in `[0, 1]`, or `None` while fewer than
    /// `minimum_calls` outcomes are present.
    pub fn failure_rate(&self) -> Option<f64> {
        let total = self.outcomes.len();
        if total < self.minimum_calls {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.failures as f64 / total as f64;
        Some(rate)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn minimum_calls(&self) -> usize {
        self.minimum_calls
    }

    /// Number of non-success outcomes currently in the window.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Oldest-first view of the recorded outcomes.
    pub fn outcomes(&self) -> impl Iterator<Item = CallOutcome> + '_ {
        self.outcomes.iter().copied()
    }

    /// Forget every recorded outcome.
    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}
