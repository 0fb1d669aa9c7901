//! Convenient re-exports for common Lifeline types.
pub use crate::{
    client::{ClientFactory, ClientHandle, Credential, IdentityBinding, Transport},
    fallback::Fallback,
    layer::ResilienceLayer,
    policy::{Guarded, PolicyHandle},
    registry::PolicyRegistry,
    route::{HeaderRoutePredicate, RequestHeaders, RouteConfig, RouteTable},
    CallOutcome, CircuitState, ConfigError, PolicyConfig, ResilienceError,
};
