//! Declarative policy and route settings.
//!
//! Settings are JSON documents of the form
//!
//! ```json
//! {
//!   "default":   { "timeout_ms": 4000, "failure_rate_threshold": 20.0 },
//!   "instances": { "backendA": { "bulkhead_max_concurrent": 1 } },
//!   "routes":    [ { "id": "wolfman", "target": "http://wolfman", "predicates": ["zone, us"] } ]
//! }
//! ```
//!
//! Every field is optional. `default` overrides the library defaults, each
//! instance overrides `default`. Durations are integer milliseconds. Unknown
//! fields are rejected so a typo never silently falls back to a default.

use crate::config::PolicyConfigBuilder;
use crate::error::ConfigError;
use crate::registry::{PolicyRegistry, RegistryBuilder, DEFAULT_POLICY};
use crate::route::{RouteDefinition, RouteTable};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Errors raised while loading settings.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("invalid settings document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("route '{id}': {source}")]
    Route {
        id: String,
        #[source]
        source: ConfigError,
    },
}

/// Optional overrides for one policy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySettings {
    pub minimum_calls: Option<usize>,
    pub sliding_window_size: Option<usize>,
    pub failure_rate_threshold: Option<f64>,
    pub wait_duration_in_open_state_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub bulkhead_max_concurrent: Option<usize>,
    pub rate_limit_quota: Option<u32>,
    pub rate_limit_period_ms: Option<u64>,
}

impl PolicySettings {
    /// Apply the fields that are set on top of `builder`.
    pub fn apply(&self, mut builder: PolicyConfigBuilder) -> PolicyConfigBuilder {
        if let Some(n) = self.minimum_calls {
            builder = builder.minimum_calls(n);
        }
        if let Some(n) = self.sliding_window_size {
            builder = builder.sliding_window_size(n);
        }
        if let Some(p) = self.failure_rate_threshold {
            builder = builder.failure_rate_threshold(p);
        }
        if let Some(ms) = self.wait_duration_in_open_state_ms {
            builder = builder.wait_duration_in_open_state(Duration::from_millis(ms));
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout_duration(Duration::from_millis(ms));
        }
        if let Some(n) = self.bulkhead_max_concurrent {
            builder = builder.bulkhead_max_concurrent(n);
        }
        if self.rate_limit_quota.is_some() || self.rate_limit_period_ms.is_some() {
            let current = builder.current_rate_limit();
            let quota = self.rate_limit_quota.unwrap_or(current.quota());
            let period =
                self.rate_limit_period_ms.map(Duration::from_millis).unwrap_or(current.period());
            builder = builder.rate_limit(quota, period);
        }
        builder
    }
}

/// A full settings document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub default: PolicySettings,
    #[serde(default)]
    pub instances: BTreeMap<String, PolicySettings>,
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
}

impl Settings {
    pub fn from_json(input: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_slice(input: &[u8]) -> Result<Self, SettingsError> {
        Ok(serde_json::from_slice(input)?)
    }

    /// Registry builder with every policy registered; add a clock before building if needed.
    pub fn registry_builder(&self) -> RegistryBuilder {
        let default = self.default.clone();
        let mut builder = PolicyRegistry::builder().policy(DEFAULT_POLICY, move |b| default.apply(b));
        for (name, overrides) in &self.instances {
            let overrides = overrides.clone();
            builder = builder.policy(name.clone(), move |b| overrides.apply(b));
        }
        builder
    }

    /// Build and validate every policy. One invalid policy fails the whole load.
    pub fn into_registry(self) -> Result<PolicyRegistry, SettingsError> {
        let registry = self.registry_builder().build()?;
        tracing::info!(
            target: "lifeline::settings",
            instances = self.instances.len(),
            "policy settings loaded"
        );
        Ok(registry)
    }

    pub fn route_table(&self) -> Result<RouteTable, SettingsError> {
        self.routes
            .iter()
            .cloned()
            .map(|def| {
                let id = def.id.clone();
                def.into_route().map_err(|source| SettingsError::Route { id, source })
            })
            .collect()
    }
}
