//! Failure-rate circuit breaker driven by a count-based sliding window.
//!
//! The breaker is a plain state machine: it never locks anything itself and is
//! only mutated by the policy cell that owns it (see [`crate::registry`]), which
//! serializes admission checks and outcome recording behind one mutex.

use crate::error::{CallOutcome, ConfigError};
use crate::window::SlidingWindow;
use std::sync::Arc;
use std::time::Duration;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the wait duration elapses.
    Open,
    /// Probe mode: exactly one call is let through to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    minimum_calls: usize,
    sliding_window_size: usize,
    failure_rate_threshold: f64,
    wait_duration_in_open_state: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            minimum_calls: 3,
            sliding_window_size: 10,
            failure_rate_threshold: 20.0,
            wait_duration_in_open_state: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config with validation.
    ///
    /// `failure_rate_threshold` is a percentage in `(0, 100]`.
    pub fn new(
        minimum_calls: usize,
        sliding_window_size: usize,
        failure_rate_threshold: f64,
        wait_duration_in_open_state: Duration,
    ) -> Result<Self, ConfigError> {
        let cfg = Self {
            minimum_calls,
            sliding_window_size,
            failure_rate_threshold,
            wait_duration_in_open_state,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.minimum_calls == 0 {
            return Err(ConfigError::InvalidMinimumCalls { provided: 0 });
        }
        if self.sliding_window_size < self.minimum_calls {
            return Err(ConfigError::WindowSmallerThanMinimum {
                window: self.sliding_window_size,
                minimum: self.minimum_calls,
            });
        }
        let threshold = self.failure_rate_threshold;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(ConfigError::InvalidFailureRateThreshold { provided: threshold });
        }
        if self.wait_duration_in_open_state.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "wait_duration_in_open_state" });
        }
        Ok(())
    }

    /// Outcomes required before the failure rate is evaluated.
    pub fn minimum_calls(&self) -> usize {
        self.minimum_calls
    }

    /// Number of most recent outcomes the failure rate is computed over.
    pub fn sliding_window_size(&self) -> usize {
        self.sliding_window_size
    }

    /// Failure rate (percent) at or above which the circuit opens.
    pub fn failure_rate_threshold(&self) -> f64 {
        self.failure_rate_threshold
    }

    /// Cool-down before an open circuit lets a probe through.
    pub fn wait_duration_in_open_state(&self) -> Duration {
        self.wait_duration_in_open_state
    }

    pub(crate) fn set_minimum_calls(&mut self, v: usize) {
        self.minimum_calls = v;
    }

    pub(crate) fn set_sliding_window_size(&mut self, v: usize) {
        self.sliding_window_size = v;
    }

    pub(crate) fn set_failure_rate_threshold(&mut self, v: f64) {
        self.failure_rate_threshold = v;
    }

    pub(crate) fn set_wait_duration_in_open_state(&mut self, v: Duration) {
        self.wait_duration_in_open_state = v;
    }
}

/// Result of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// Closed circuit; the call proceeds normally.
    Permitted,
    /// Half-open circuit; this call is the single recovery probe.
    Probe,
    /// The call must not run.
    Rejected {
        /// Failure rate of the window at rejection time, if defined.
        failure_rate: Option<f64>,
        /// Time since the circuit last opened.
        open_duration: Duration,
    },
}

impl Admission {
    pub fn is_permitted(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

/// Circuit breaker state for one policy, including its sliding window.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: Arc<str>,
    state: CircuitState,
    window: SlidingWindow,
    threshold: f64,
    wait_millis: u64,
    opened_at_millis: u64,
    probe_in_flight: bool,
    probe_epoch: u64,
}

// Rounded up so a sub-millisecond wait never collapses to zero.
fn wait_millis(wait: Duration) -> u64 {
    u64::try_from(wait.as_micros().div_ceil(1000)).unwrap_or(u64::MAX)
}

impl CircuitBreaker {
    /// Create a closed breaker; `name` is only used in log events.
    pub fn new(name: impl Into<Arc<str>>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            window: SlidingWindow::new(config.sliding_window_size, config.minimum_calls),
            threshold: config.failure_rate_threshold / 100.0,
            wait_millis: wait_millis(config.wait_duration_in_open_state),
            opened_at_millis: 0,
            probe_in_flight: false,
            probe_epoch: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_rate(&self) -> Option<f64> {
        self.window.failure_rate()
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Whether the half-open probe slot is currently taken.
    pub fn probe_in_flight(&self) -> bool {
        self.probe_in_flight
    }

    /// Identifies the most recent probe grant. Bumped on every grant, open and reset.
    pub fn probe_epoch(&self) -> u64 {
        self.probe_epoch
    }

    /// True if the probe granted at `epoch` still holds the half-open slot.
    pub fn holds_probe(&self, epoch: u64) -> bool {
        self.state == CircuitState::HalfOpen && self.probe_in_flight && self.probe_epoch == epoch
    }

    fn grant_probe(&mut self) -> Admission {
        self.probe_in_flight = true;
        self.probe_epoch = self.probe_epoch.wrapping_add(1);
        Admission::Probe
    }

    /// Decide whether a call may proceed at `now_millis`.
    ///
    /// An open circuit whose wait duration has elapsed moves to half-open here,
    /// and the caller that triggers the move becomes the probe.
    pub fn check_admission(&mut self, now_millis: u64) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Permitted,
            CircuitState::Open => {
                let elapsed = now_millis.saturating_sub(self.opened_at_millis);
                if elapsed >= self.wait_millis {
                    self.state = CircuitState::HalfOpen;
                    tracing::info!(
                        target: "lifeline::circuit_breaker",
                        policy = %self.name,
                        "circuit breaker → half-open"
                    );
                    self.grant_probe()
                } else {
                    self.rejected(now_millis)
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    tracing::debug!(
                        target: "lifeline::circuit_breaker",
                        policy = %self.name,
                        "half-open probe already in flight; rejecting"
                    );
                    self.rejected(now_millis)
                } else {
                    self.grant_probe()
                }
            }
        }
    }

    fn rejected(&self, now_millis: u64) -> Admission {
        Admission::Rejected {
            failure_rate: self.window.failure_rate(),
            open_duration: Duration::from_millis(now_millis.saturating_sub(self.opened_at_millis)),
        }
    }

    /// Record an outcome and apply the resulting transition, if any.
    ///
    /// `probe` carries the [`probe_epoch`](Self::probe_epoch) read when the call
    /// received [`Admission::Probe`]. Only the probe still holding the half-open
    /// slot decides the transition; every other outcome is added to the window,
    /// and only trips the breaker while it is closed.
    pub fn record(
        &mut self,
        outcome: CallOutcome,
        probe: Option<u64>,
        now_millis: u64,
    ) -> Option<CircuitState> {
        self.window.record(outcome);

        if probe.is_some_and(|epoch| self.holds_probe(epoch)) {
            self.probe_in_flight = false;
            return if outcome.is_failure() {
                self.open(now_millis);
                tracing::warn!(
                    target: "lifeline::circuit_breaker",
                    policy = %self.name,
                    outcome = %outcome,
                    "circuit breaker: probe failed → open"
                );
                Some(CircuitState::Open)
            } else {
                self.state = CircuitState::Closed;
                self.window.clear();
                tracing::info!(
                    target: "lifeline::circuit_breaker",
                    policy = %self.name,
                    "circuit breaker → closed"
                );
                Some(CircuitState::Closed)
            };
        }

        if self.state != CircuitState::Closed {
            return None;
        }
        match self.window.failure_rate() {
            Some(rate) if rate >= self.threshold => {
                self.open(now_millis);
                tracing::error!(
                    target: "lifeline::circuit_breaker",
                    policy = %self.name,
                    failure_rate = rate,
                    threshold = self.threshold,
                    calls = self.window.len(),
                    "circuit breaker → open"
                );
                Some(CircuitState::Open)
            }
            _ => None,
        }
    }

    /// Give the probe slot back when the probe granted at `epoch` was abandoned
    /// before producing an outcome, so the next caller can probe instead.
    /// A probe from an earlier cycle releases nothing.
    pub fn release_probe(&mut self, epoch: u64) {
        if self.holds_probe(epoch) {
            self.probe_in_flight = false;
            tracing::debug!(
                target: "lifeline::circuit_breaker",
                policy = %self.name,
                "half-open probe abandoned; slot released"
            );
        }
    }

    /// Force the breaker closed and forget all recorded outcomes.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.window.clear();
        self.opened_at_millis = 0;
        self.probe_in_flight = false;
        self.probe_epoch = self.probe_epoch.wrapping_add(1);
    }

    fn open(&mut self, now_millis: u64) {
        self.state = CircuitState::Open;
        self.opened_at_millis = now_millis;
        self.probe_in_flight = false;
        self.probe_epoch = self.probe_epoch.wrapping_add(1);
    }
}
