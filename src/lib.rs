#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Lifeline
//!
//! Per-name resilience policies for remote calls, plus the header routing and
//! identity-scoped clients that sit around them.
//!
//! ## Features
//!
//! - **Circuit breakers** over a count-based sliding window, with a single
//!   half-open probe
//! - **Bulkheads** bounding concurrent calls per policy
//! - **Rate limiting** with fixed, aligned refresh periods
//! - **Timeouts** with cooperative cancellation
//! - **Fallbacks** from a fixed value or from the failure cause
//! - **Header route predicates** and ordered route tables
//! - **Identity-scoped clients** that never share credentials
//! - **Tower middleware** and JSON settings
//!
//! Each policy name owns independent state. A call is admitted by the
//! bulkhead, the rate limiter and the circuit breaker in that order, runs
//! under the policy's timeout, and its outcome (including every rejection) is
//! recorded in the breaker's window.
//!
//! ## Quick Start
//!
//! ```rust
//! use lifeline::{Fallback, PolicyRegistry, ResilienceError};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = PolicyRegistry::builder()
//!         .policy("rateA", |b| b.rate_limit(1, Duration::from_secs(1)))
//!         .build()
//!         .expect("valid policies");
//!
//!     let guarded = registry.policy("rateA").with_fallback(Fallback::from_cause(
//!         |cause: &ResilienceError<std::io::Error>| match cause {
//!             ResilienceError::RateLimited { .. } => "Fail".to_string(),
//!             _ => "error".to_string(),
//!         },
//!     ));
//!
//!     let first = guarded.execute(|| async { Ok("hello".to_string()) }).await;
//!     let second = guarded.execute(|| async { Ok("hello".to_string()) }).await;
//!     assert_eq!((first.as_str(), second.as_str()), ("hello", "Fail"));
//! }
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod fallback;
pub mod layer;
pub mod policy;
pub mod prelude;
pub mod rate_limit;
pub mod registry;
pub mod route;
pub mod settings;
pub mod timeout;
pub mod window;

// Re-exports
pub use bulkhead::Bulkhead;
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{
    ClientFactory, ClientHandle, Credential, IdentityBinding, OutboundRequest, Response, Transport,
    TransportError,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{PolicyConfig, PolicyConfigBuilder};
pub use error::{CallOutcome, ConfigError, ResilienceError};
pub use fallback::Fallback;
pub use layer::{ResilienceLayer, ResilienceService};
pub use policy::{Guarded, PolicyHandle};
pub use rate_limit::{Decision, RateLimitConfig, RateLimiterBucket};
pub use registry::{PolicyRegistry, PolicySnapshot, RegistryBuilder, RegistryError, DEFAULT_POLICY};
pub use route::{
    HeaderRoutePredicate, HeaderSource, RequestHeaders, Route, RouteConfig, RoutePredicate,
    RouteTable,
};
pub use settings::{PolicySettings, Settings, SettingsError};
pub use timeout::TimeoutPolicy;
pub use window::SlidingWindow;
