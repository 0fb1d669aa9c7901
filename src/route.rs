//! Header-based route selection.
//!
//! A [`HeaderRoutePredicate`] matches a request when a configured header is
//! present and one of its values equals the configured value exactly. A
//! [`RouteTable`] holds routes in order and picks the first whose predicates
//! all match; when none does, nothing is selected.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Read-only view of an inbound request's headers.
pub trait HeaderSource {
    /// Every value bound to `name`, or `None` when the header is absent.
    fn header_values(&self, name: &str) -> Option<&[String]>;
}

impl HeaderSource for HashMap<String, Vec<String>> {
    fn header_values(&self, name: &str) -> Option<&[String]> {
        self.get(name).map(Vec::as_slice)
    }
}

impl HeaderSource for BTreeMap<String, Vec<String>> {
    fn header_values(&self, name: &str) -> Option<&[String]> {
        self.get(name).map(Vec::as_slice)
    }
}

/// Multi-valued header map with case-insensitive names.
///
/// Values keep their case and order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    entries: BTreeMap<String, Vec<String>>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value to `name`, keeping any existing values.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace every value of `name` with `value`.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries.insert(name.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.header_values(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }
}

impl HeaderSource for RequestHeaders {
    fn header_values(&self, name: &str) -> Option<&[String]> {
        self.entries.get(&name.to_ascii_lowercase()).map(Vec::as_slice)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = RequestHeaders::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

/// Header name and the exact value a request must carry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRouteConfig")]
pub struct RouteConfig {
    header_key: String,
    header_value: String,
}

#[derive(Deserialize)]
struct RawRouteConfig {
    header_key: String,
    #[serde(default)]
    header_value: String,
}

impl TryFrom<RawRouteConfig> for RouteConfig {
    type Error = ConfigError;

    fn try_from(raw: RawRouteConfig) -> Result<Self, Self::Error> {
        RouteConfig::new(raw.header_key, raw.header_value)
    }
}

impl RouteConfig {
    pub fn new(
        header_key: impl Into<String>,
        header_value: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let header_key = header_key.into();
        if header_key.is_empty() {
            return Err(ConfigError::EmptyHeaderKey);
        }
        Ok(Self { header_key, header_value: header_value.into() })
    }

    /// Parse the compact `"header_key, header_value"` form.
    ///
    /// ```
    /// use lifeline::route::RouteConfig;
    ///
    /// let cfg = RouteConfig::from_shortcut("zone, us").unwrap();
    /// assert_eq!(cfg.header_key(), "zone");
    /// assert_eq!(cfg.header_value(), "us");
    /// ```
    pub fn from_shortcut(input: &str) -> Result<Self, ConfigError> {
        let malformed = || ConfigError::MalformedShortcut { input: input.to_string() };
        let mut parts = input.split(',');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed());
        }
        Self::new(key, value.trim())
    }

    pub fn header_key(&self) -> &str {
        &self.header_key
    }

    pub fn header_value(&self) -> &str {
        &self.header_value
    }
}

/// Something that can accept or refuse a request by its headers.
pub trait RoutePredicate: Send + Sync + fmt::Debug {
    fn test(&self, headers: &dyn HeaderSource) -> bool;
}

/// Matches when the configured header carries the configured value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRoutePredicate {
    config: RouteConfig,
}

impl HeaderRoutePredicate {
    pub fn new(config: RouteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// Exact, case-sensitive value comparison. An absent header never matches.
    pub fn matches<H: HeaderSource + ?Sized>(&self, headers: &H) -> bool {
        match headers.header_values(&self.config.header_key) {
            Some(values) => values.iter().any(|v| *v == self.config.header_value),
            None => false,
        }
    }
}

impl RoutePredicate for HeaderRoutePredicate {
    fn test(&self, headers: &dyn HeaderSource) -> bool {
        self.matches(headers)
    }
}

impl fmt::Display for HeaderRoutePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "headerKey: {} headerValue={}",
            self.config.header_key, self.config.header_value
        )
    }
}

impl From<RouteConfig> for HeaderRoutePredicate {
    fn from(config: RouteConfig) -> Self {
        Self::new(config)
    }
}

/// A named target guarded by predicates that must all match.
///
/// A route without predicates matches every request.
#[derive(Debug, Clone)]
pub struct Route {
    id: String,
    target: String,
    predicates: Vec<Arc<dyn RoutePredicate>>,
}

impl Route {
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyRouteId);
        }
        Ok(Self { id, target: target.into(), predicates: Vec::new() })
    }

    pub fn predicate<P: RoutePredicate + 'static>(mut self, predicate: P) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn matches(&self, headers: &dyn HeaderSource) -> bool {
        self.predicates.iter().all(|p| p.test(headers))
    }
}

/// Routes in priority order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// First route whose predicates all match, if any.
    pub fn select(&self, headers: &dyn HeaderSource) -> Option<&Route> {
        let selected = self.routes.iter().find(|r| r.matches(headers));
        match selected {
            Some(route) => {
                tracing::debug!(target: "lifeline::route", route = %route.id, "route selected")
            }
            None => tracing::debug!(target: "lifeline::route", "no route matched"),
        }
        selected
    }
}

impl FromIterator<Route> for RouteTable {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        Self { routes: iter.into_iter().collect() }
    }
}

/// A header predicate as written in settings: either the shortcut string or
/// the explicit object form.
///
/// Both forms are validated in [`into_config`](Self::into_config), so a bad
/// predicate reports its own [`ConfigError`] rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PredicateDefinition {
    Shortcut(String),
    Header {
        header_key: String,
        #[serde(default)]
        header_value: String,
    },
}

impl PredicateDefinition {
    pub fn into_config(self) -> Result<RouteConfig, ConfigError> {
        match self {
            PredicateDefinition::Shortcut(s) => RouteConfig::from_shortcut(&s),
            PredicateDefinition::Header { header_key, header_value } => {
                RouteConfig::new(header_key, header_value)
            }
        }
    }
}

/// Declarative route as loaded from settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteDefinition {
    pub id: String,
    pub target: String,
    #[serde(default)]
    pub predicates: Vec<PredicateDefinition>,
}

impl RouteDefinition {
    pub fn into_route(self) -> Result<Route, ConfigError> {
        let mut route = Route::new(self.id, self.target)?;
        for def in self.predicates {
            route = route.predicate(HeaderRoutePredicate::new(def.into_config()?));
        }
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predicate(key: &str, value: &str) -> HeaderRoutePredicate {
        HeaderRoutePredicate::new(RouteConfig::new(key, value).unwrap())
    }

    fn map(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn absent_header_never_matches() {
        let p = predicate("zone", "us");
        assert!(!p.matches(&map(&[])));
        assert!(!p.matches(&map(&[("region", &["us"])])));
    }

    #[test]
    fn any_bound_value_may_match() {
        let p = predicate("zone", "us");
        assert!(p.matches(&map(&[("zone", &["eu", "us"])])));
        assert!(!p.matches(&map(&[("zone", &["eu"])])));
        assert!(!p.matches(&map(&[("zone", &[])])));
    }

    #[test]
    fn comparison_is_exact() {
        let p = predicate("zone", "us");
        for value in ["US", "us-east", "u", " us"] {
            assert!(!p.matches(&map(&[("zone", &[value])])), "{value:?} must not match");
        }
    }

    #[test]
    fn request_headers_fold_name_case_only() {
        let p = predicate("X-Zone", "us");
        let headers: RequestHeaders = [("x-zone", "us")].into_iter().collect();
        assert!(p.matches(&headers));

        let headers: RequestHeaders = [("X-ZONE", "US")].into_iter().collect();
        assert!(!p.matches(&headers));
        assert_eq!(headers.get("x-zone"), Some("US"));
    }

    #[test]
    fn request_headers_append_and_insert() {
        let mut headers = RequestHeaders::new();
        headers.append("Accept", "a");
        headers.append("accept", "b");
        assert_eq!(headers.header_values("ACCEPT").map(<[String]>::len), Some(2));
        headers.insert("Accept", "c");
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec![("accept", "c")]);
        assert!(headers.contains("ACCEPT"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn empty_header_key_is_rejected() {
        assert_eq!(RouteConfig::new("", "us").unwrap_err(), ConfigError::EmptyHeaderKey);
        let blank = RouteConfig::new(" ", "us").unwrap();
        assert_eq!(blank.header_key(), " ");
    }

    #[test]
    fn shortcut_field_order_is_key_then_value() {
        let cfg = RouteConfig::from_shortcut(" zone ,us ").unwrap();
        assert_eq!((cfg.header_key(), cfg.header_value()), ("zone", "us"));

        for bad in ["zone", ", us", "a, b, c"] {
            assert_eq!(
                RouteConfig::from_shortcut(bad).unwrap_err(),
                ConfigError::MalformedShortcut { input: bad.to_string() }
            );
        }
    }

    #[test]
    fn display_names_both_fields() {
        assert_eq!(predicate("zone", "us").to_string(), "headerKey: zone headerValue=us");
    }

    #[test]
    fn table_selects_first_full_match() {
        let table: RouteTable = [
            Route::new("us-beta", "http://beta.us")
                .unwrap()
                .predicate(predicate("zone", "us"))
                .predicate(predicate("channel", "beta")),
            Route::new("us", "http://us").unwrap().predicate(predicate("zone", "us")),
            Route::new("eu", "http://eu").unwrap().predicate(predicate("zone", "eu")),
        ]
        .into_iter()
        .collect();

        let us = map(&[("zone", &["us"])]);
        assert_eq!(table.select(&us).map(Route::id), Some("us"));

        let beta = map(&[("zone", &["us"]), ("channel", &["beta"])]);
        assert_eq!(table.select(&beta).map(Route::target), Some("http://beta.us"));

        assert!(table.select(&map(&[("zone", &["ap"])])).is_none());
    }

    #[test]
    fn definitions_accept_both_predicate_forms() {
        let def: RouteDefinition = serde_json::from_str(
            r#"{
                "id": "wolfman",
                "target": "http://backend",
                "predicates": ["zone, us", {"header_key": "tier", "header_value": "gold"}]
            }"#,
        )
        .unwrap();
        let route = def.into_route().unwrap();
        assert!(route.matches(&map(&[("zone", &["us"]), ("tier", &["gold"])])));
        assert!(!route.matches(&map(&[("zone", &["us"])])));

        let bad: Result<RouteConfig, _> = serde_json::from_str(r#"{"header_key": ""}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn empty_key_in_object_form_reports_its_cause() {
        let def: RouteDefinition = serde_json::from_str(
            r#"{ "id": "r1", "target": "t", "predicates": [{"header_key": "", "header_value": "us"}] }"#,
        )
        .unwrap();
        assert_eq!(def.into_route().unwrap_err(), ConfigError::EmptyHeaderKey);
    }
}
