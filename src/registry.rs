//! Registry of named resilience policies.
//!
//! Each policy name maps to one [`PolicyCell`]: the policy's configuration plus
//! its circuit breaker, bulkhead and rate-limit state behind a single mutex.
//! Cells are created lazily on first use and live as long as the registry.
//! Different names never share a lock.
//!
//! # Configuration precedence
//!
//! The registry holds one complete default [`PolicyConfig`]. Named policies are
//! registered either as a complete config ([`RegistryBuilder::policy_config`])
//! or as overrides applied to the final default when the registry is built
//! ([`RegistryBuilder::policy`]). Once built, a named policy never consults the
//! default again. Names that were never registered use the default config
//! verbatim but still get their own, independent state.

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitState};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{PolicyConfig, PolicyConfigBuilder};
use crate::error::{CallOutcome, ConfigError, ResilienceError};
use crate::policy::PolicyHandle;
use crate::rate_limit::{Decision, RateLimiterBucket};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

/// Name of the policy whose configuration applies to unregistered names.
pub const DEFAULT_POLICY: &str = "default";

/// Errors from registry lookups.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No state exists yet for this policy name.
    #[error("policy '{name}' not found")]
    NotFound {
        /// Name that could not be located.
        name: String,
    },
}

/// Point-in-time view of one policy's state.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    /// Policy name.
    pub name: String,
    /// Circuit breaker state.
    pub state: CircuitState,
    /// Failure rate of the sliding window, once it holds `minimum_calls` outcomes.
    pub failure_rate: Option<f64>,
    /// Outcomes currently held in the sliding window.
    pub buffered_calls: usize,
    /// Bulkhead permits not currently taken.
    pub available_permits: usize,
}

#[derive(Debug)]
struct PolicyState {
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    bucket: RateLimiterBucket,
}

/// Configuration and mutable state of one named policy.
pub(crate) struct PolicyCell {
    name: Arc<str>,
    config: PolicyConfig,
    state: Mutex<PolicyState>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for PolicyCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyCell").field("name", &self.name).field("config", &self.config).finish()
    }
}

impl PolicyCell {
    fn new(name: &str, config: PolicyConfig, clock: Arc<dyn Clock>) -> Self {
        let name: Arc<str> = Arc::from(name);
        let state = PolicyState {
            breaker: CircuitBreaker::new(Arc::clone(&name), config.circuit_breaker()),
            bulkhead: Bulkhead::from_validated(config.bulkhead_max_concurrent()),
            bucket: RateLimiterBucket::new(config.rate_limit()),
        };
        Self { name, config, state: Mutex::new(state), clock }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn config(&self) -> &PolicyConfig {
        &self.config
    }

    // State is plain counters that are consistent between statements, so a
    // panic elsewhere cannot leave it half-updated.
    fn lock(&self) -> MutexGuard<'_, PolicyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bulkhead, then rate limit, then circuit breaker, under one lock.
    ///
    /// Rejections are recorded into the window before returning.
    pub(crate) fn admit<E>(self: &Arc<Self>) -> Result<BulkheadPermit, ResilienceError<E>> {
        let now = self.clock.now_millis();
        let mut state = self.lock();

        if !state.bulkhead.try_acquire() {
            let err = ResilienceError::Bulkhead {
                in_flight: state.bulkhead.in_flight(),
                max: state.bulkhead.max_concurrent(),
            };
            return Err(self.reject(&mut state, err, now));
        }

        if let Decision::Denied { wait } = state.bucket.try_admit(now) {
            state.bulkhead.release();
            return Err(self.reject(&mut state, ResilienceError::RateLimited { wait }, now));
        }

        let probe = match state.breaker.check_admission(now) {
            Admission::Permitted => None,
            Admission::Probe => Some(state.breaker.probe_epoch()),
            Admission::Rejected { failure_rate, open_duration } => {
                state.bulkhead.release();
                let err = ResilienceError::CircuitOpen { failure_rate, open_duration };
                return Err(self.reject(&mut state, err, now));
            }
        };

        Ok(BulkheadPermit { cell: Arc::clone(self), probe, settled: false })
    }

    fn reject<E>(
        &self,
        state: &mut PolicyState,
        err: ResilienceError<E>,
        now: u64,
    ) -> ResilienceError<E> {
        let outcome = err.outcome();
        state.breaker.record(outcome, None, now);
        debug!(target: "lifeline::registry", policy = %self.name, outcome = %outcome, "call rejected");
        err
    }

    fn snapshot(&self) -> PolicySnapshot {
        let state = self.lock();
        PolicySnapshot {
            name: self.name.to_string(),
            state: state.breaker.state(),
            failure_rate: state.breaker.failure_rate(),
            buffered_calls: state.breaker.window().len(),
            available_permits: state.bulkhead.available(),
        }
    }

    pub(crate) fn circuit_state(&self) -> CircuitState {
        self.lock().breaker.state()
    }

    pub(crate) fn failure_rate(&self) -> Option<f64> {
        self.lock().breaker.failure_rate()
    }

    pub(crate) fn available_permits(&self) -> usize {
        self.lock().bulkhead.available()
    }

    pub(crate) fn reset(&self) {
        self.lock().breaker.reset();
        info!(target: "lifeline::registry", policy = %self.name, "circuit breaker reset");
    }
}

/// A bulkhead permit held for the duration of one admitted call.
///
/// [`complete`](Self::complete) records the call's outcome and returns the
/// permit. If the guard is dropped without completing (the caller's future was
/// cancelled), the permit is still returned and a half-open probe slot freed.
/// A probe permit remembers the breaker's probe epoch, so a permit left over
/// from an earlier half-open cycle (for example across a reset) is treated as
/// an ordinary call.
#[derive(Debug)]
pub(crate) struct BulkheadPermit {
    cell: Arc<PolicyCell>,
    probe: Option<u64>,
    settled: bool,
}

impl BulkheadPermit {
    /// True if this call was granted the circuit breaker's half-open probe.
    #[cfg(test)]
    pub(crate) fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    /// Record `outcome` and release the permit.
    pub(crate) fn complete(mut self, outcome: CallOutcome) {
        let now = self.cell.clock.now_millis();
        let mut state = self.cell.lock();
        state.breaker.record(outcome, self.probe, now);
        state.bulkhead.release();
        self.settled = true;
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.cell.lock();
        state.bulkhead.release();
        if let Some(epoch) = self.probe {
            state.breaker.release_probe(epoch);
        }
        debug!(target: "lifeline::registry", policy = %self.cell.name, "call abandoned before completion");
    }
}

type Override = Box<dyn FnOnce(PolicyConfigBuilder) -> PolicyConfigBuilder + Send>;

enum NamedConfig {
    Complete(PolicyConfig),
    Overrides(Override),
}

/// Builder for [`PolicyRegistry`].
pub struct RegistryBuilder {
    default: PolicyConfig,
    default_overrides: Vec<Override>,
    named: Vec<(String, NamedConfig)>,
    clock: Option<Arc<dyn Clock>>,
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.named.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("RegistryBuilder")
            .field("default", &self.default)
            .field("named", &names)
            .finish()
    }
}

impl RegistryBuilder {
    /// Replace the default policy configuration.
    pub fn default_config(mut self, config: PolicyConfig) -> Self {
        self.default = config;
        self
    }

    /// Register `name` with overrides applied on top of the default config.
    ///
    /// Registering [`DEFAULT_POLICY`] this way adjusts the default itself.
    pub fn policy<F>(mut self, name: impl Into<String>, overrides: F) -> Self
    where
        F: FnOnce(PolicyConfigBuilder) -> PolicyConfigBuilder + Send + 'static,
    {
        let name = name.into();
        if name == DEFAULT_POLICY {
            self.default_overrides.push(Box::new(overrides));
        } else {
            self.named.push((name, NamedConfig::Overrides(Box::new(overrides))));
        }
        self
    }

    /// Register `name` with a complete configuration that ignores the default.
    pub fn policy_config(mut self, name: impl Into<String>, config: PolicyConfig) -> Self {
        let name = name.into();
        if name == DEFAULT_POLICY {
            self.default = config;
        } else {
            self.named.push((name, NamedConfig::Complete(config)));
        }
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Resolve and validate every policy. A single invalid policy fails the build.
    pub fn build(self) -> Result<PolicyRegistry, ConfigError> {
        let mut default = self.default;
        if !self.default_overrides.is_empty() {
            let mut builder = default.to_builder();
            for f in self.default_overrides {
                builder = f(builder);
            }
            default = builder.build().map_err(|e| in_policy(DEFAULT_POLICY, e))?;
        }

        let mut configs = HashMap::with_capacity(self.named.len());
        for (name, named) in self.named {
            let config = match named {
                NamedConfig::Complete(config) => config,
                NamedConfig::Overrides(f) => {
                    f(default.to_builder()).build().map_err(|e| in_policy(&name, e))?
                }
            };
            configs.insert(name, config);
        }

        Ok(PolicyRegistry {
            inner: Arc::new(RegistryInner {
                default,
                configs,
                cells: RwLock::new(HashMap::new()),
                clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::default())),
            }),
        })
    }
}

fn in_policy(name: &str, source: ConfigError) -> ConfigError {
    ConfigError::InPolicy { name: name.to_string(), source: Box::new(source) }
}

struct RegistryInner {
    default: PolicyConfig,
    configs: HashMap<String, PolicyConfig>,
    cells: RwLock<HashMap<String, Arc<PolicyCell>>>,
    clock: Arc<dyn Clock>,
}

/// Process-wide set of named policies. Clones share the same state.
#[derive(Clone)]
pub struct PolicyRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.inner.configs.keys().collect();
        names.sort();
        f.debug_struct("PolicyRegistry")
            .field("default", &self.inner.default)
            .field("configured", &names)
            .finish()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                default: PolicyConfig::default(),
                configs: HashMap::new(),
                cells: RwLock::new(HashMap::new()),
                clock: Arc::new(MonotonicClock::default()),
            }),
        }
    }
}

impl PolicyRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            default: PolicyConfig::default(),
            default_overrides: Vec::new(),
            named: Vec::new(),
            clock: None,
        }
    }

    /// The configuration `name` resolves to.
    pub fn config_for(&self, name: &str) -> &PolicyConfig {
        self.inner.configs.get(name).unwrap_or(&self.inner.default)
    }

    /// True if `name` was registered explicitly (rather than using the default).
    pub fn is_configured(&self, name: &str) -> bool {
        self.inner.configs.contains_key(name)
    }

    /// Handle for `name`, creating its state on first use.
    pub fn policy(&self, name: &str) -> PolicyHandle {
        PolicyHandle::new(self.cell(name))
    }

    fn cell(&self, name: &str) -> Arc<PolicyCell> {
        {
            let cells = self.inner.cells.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cell) = cells.get(name) {
                return Arc::clone(cell);
            }
        }
        let mut cells = self.inner.cells.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(cell) = cells.get(name) {
            return Arc::clone(cell);
        }
        let config = self.config_for(name).clone();
        let cell = Arc::new(PolicyCell::new(name, config, Arc::clone(&self.inner.clock)));
        debug!(
            target: "lifeline::registry",
            policy = %name,
            configured = self.is_configured(name),
            "policy state created"
        );
        cells.insert(name.to_string(), Arc::clone(&cell));
        cell
    }

    /// Circuit state for `name`, if it has been used.
    pub fn state(&self, name: &str) -> Option<CircuitState> {
        let cells = self.inner.cells.read().unwrap_or_else(PoisonError::into_inner);
        cells.get(name).map(|cell| cell.circuit_state())
    }

    /// Force `name`'s breaker closed and clear its window.
    pub fn reset(&self, name: &str) -> Result<(), RegistryError> {
        let cells = self.inner.cells.read().unwrap_or_else(PoisonError::into_inner);
        match cells.get(name) {
            Some(cell) => {
                cell.reset();
                Ok(())
            }
            None => Err(RegistryError::NotFound { name: name.to_string() }),
        }
    }

    /// Snapshot every live policy, sorted by name.
    pub fn snapshot(&self) -> Vec<PolicySnapshot> {
        let cells: Vec<Arc<PolicyCell>> = {
            let cells = self.inner.cells.read().unwrap_or_else(PoisonError::into_inner);
            cells.values().cloned().collect()
        };
        let mut entries: Vec<PolicySnapshot> = cells.iter().map(|c| c.snapshot()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}
