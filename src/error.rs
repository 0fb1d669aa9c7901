//! Error types for resilience policies and configuration.
use std::fmt;
use std::time::Duration;

/// Outcome of a single pass through a resilience policy.
///
/// Every outcome, including admission rejections, is recorded into the policy's
/// sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOutcome {
    /// The underlying call returned `Ok`.
    Success,
    /// The underlying call returned `Err`.
    Failure,
    /// The call did not complete before the policy's deadline.
    Timeout,
    /// No bulkhead permit was available.
    RejectedBulkhead,
    /// The rate limiter's quota for the current period was exhausted.
    RejectedRateLimit,
    /// The circuit breaker refused admission.
    RejectedCircuitOpen,
}

impl CallOutcome {
    /// True for everything except [`CallOutcome::Success`].
    pub fn is_failure(self) -> bool {
        !matches!(self, CallOutcome::Success)
    }

    /// True for the three admission rejections (the call body never ran).
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            CallOutcome::RejectedBulkhead
                | CallOutcome::RejectedRateLimit
                | CallOutcome::RejectedCircuitOpen
        )
    }

    /// Stable snake_case label used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Timeout => "timeout",
            CallOutcome::RejectedBulkhead => "rejected_bulkhead",
            CallOutcome::RejectedRateLimit => "rejected_rate_limit",
            CallOutcome::RejectedCircuitOpen => "rejected_circuit_open",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for calls made through a resilience policy.
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The operation exceeded the timeout duration
    Timeout { elapsed: Duration, timeout: Duration },
    /// The bulkhead rejected the operation due to capacity
    Bulkhead { in_flight: usize, max: usize },
    /// The rate limiter's quota is exhausted; `wait` is the time left in the current period
    RateLimited { wait: Duration },
    /// The circuit breaker is open, or half-open with its probe already in flight
    CircuitOpen { failure_rate: Option<f64>, open_duration: Duration },
    /// The underlying operation failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Bulkhead { in_flight, max } => {
                write!(f, "bulkhead rejected request ({} in-flight, max {})", in_flight, max)
            }
            Self::RateLimited { wait } => {
                write!(f, "rate limit exceeded; next period starts in {:?}", wait)
            }
            Self::CircuitOpen { failure_rate: Some(rate), open_duration } => {
                write!(
                    f,
                    "circuit breaker open ({:.1}% failure rate, open for {:?})",
                    rate * 100.0,
                    open_duration
                )
            }
            Self::CircuitOpen { failure_rate: None, open_duration } => {
                write!(f, "circuit breaker open (open for {:?})", open_duration)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// The outcome this error is recorded as.
    pub fn outcome(&self) -> CallOutcome {
        match self {
            Self::Timeout { .. } => CallOutcome::Timeout,
            Self::Bulkhead { .. } => CallOutcome::RejectedBulkhead,
            Self::RateLimited { .. } => CallOutcome::RejectedRateLimit,
            Self::CircuitOpen { .. } => CallOutcome::RejectedCircuitOpen,
            Self::Inner(_) => CallOutcome::Failure,
        }
    }

    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is due to circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error is due to bulkhead rejection
    pub fn is_bulkhead(&self) -> bool {
        matches!(self, Self::Bulkhead { .. })
    }

    /// Check if this error is due to rate limiting
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Access timeout details as (elapsed, limit).
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }

    /// Access bulkhead capacity info as (in_flight, max).
    pub fn bulkhead_capacity(&self) -> Option<(usize, usize)> {
        match self {
            Self::Bulkhead { in_flight, max } => Some((*in_flight, *max)),
            _ => None,
        }
    }

    /// Time until the rate limiter's next period, if rate limited.
    pub fn rate_limit_wait(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { wait } => Some(*wait),
            _ => None,
        }
    }

    /// How long the circuit has been open, if rejected by the breaker.
    pub fn circuit_open_duration(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { open_duration, .. } => Some(*open_duration),
            _ => None,
        }
    }

    /// Map the inner error, keeping every policy variant as is.
    pub fn map_inner<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Timeout { elapsed, timeout } => ResilienceError::Timeout { elapsed, timeout },
            Self::Bulkhead { in_flight, max } => ResilienceError::Bulkhead { in_flight, max },
            Self::RateLimited { wait } => ResilienceError::RateLimited { wait },
            Self::CircuitOpen { failure_rate, open_duration } => {
                ResilienceError::CircuitOpen { failure_rate, open_duration }
            }
            Self::Inner(e) => ResilienceError::Inner(f(e)),
        }
    }
}

/// Invalid policy or route configuration.
///
/// Raised when a policy or route is constructed, never while a call is in flight.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// `minimum_calls` must be at least 1.
    #[error("minimum_calls must be >= 1 (got {provided})")]
    InvalidMinimumCalls {
        /// Value provided by caller.
        provided: usize,
    },
    /// The window must be able to hold `minimum_calls` outcomes.
    #[error("sliding_window_size ({window}) must be >= minimum_calls ({minimum})")]
    WindowSmallerThanMinimum {
        /// Configured window size.
        window: usize,
        /// Configured minimum number of calls.
        minimum: usize,
    },
    /// Threshold is a percentage in (0, 100].
    #[error("failure_rate_threshold must be in (0, 100] (got {provided})")]
    InvalidFailureRateThreshold {
        /// Value provided by caller.
        provided: f64,
    },
    /// A duration that must be strictly positive was zero.
    #[error("{field} must be > 0")]
    ZeroDuration {
        /// Name of the offending option.
        field: &'static str,
    },
    /// `bulkhead_max_concurrent` must be at least 1.
    #[error("bulkhead_max_concurrent must be >= 1")]
    InvalidBulkheadLimit,
    /// `rate_limit_quota` must be at least 1.
    #[error("rate_limit_quota must be >= 1")]
    InvalidRateLimitQuota,
    /// Route predicates need a header name to look up.
    #[error("route header_key must not be empty")]
    EmptyHeaderKey,
    /// A route shortcut string did not have the `key, value` form.
    #[error("malformed route shortcut {input:?}: expected \"header_key, header_value\"")]
    MalformedShortcut {
        /// The string that failed to parse.
        input: String,
    },
    /// Routes need an id.
    #[error("route id must not be empty")]
    EmptyRouteId,
    /// A named policy's configuration was invalid.
    #[error("policy '{name}': {source}")]
    InPolicy {
        /// Policy whose configuration failed validation.
        name: String,
        /// The underlying validation failure.
        source: Box<ConfigError>,
    },
}
