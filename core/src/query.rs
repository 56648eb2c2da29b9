//! Query normalization: caller intent merged with client defaults.
//!
//! # Design
//! A `Query` is what generated client code hands to a verb method. It is
//! merged with the client's `QueryDefaults` into a `NormalizedQuery`, in
//! which every field has a concrete value. Normalization never fails;
//! malformed URIs are left for the transport to reject.
//!
//! Query parameters are encoded in insertion order, not sorted. Two queries
//! with the same parameters added in a different order therefore produce
//! different URIs. Anything that needs a canonical URI (a cache key, say)
//! must sort the parameters itself.

use std::time::Duration;

use crate::http::{set_header, HttpRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A request as described by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub uri: String,
    pub query_params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub no_cache: Option<bool>,
    /// `None` or zero falls back to the default timeout.
    pub timeout: Option<Duration>,
}

impl Query {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Add a query parameter. Re-adding a name replaces its value but keeps
    /// its original position.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        let name = name.into();
        let value = value.to_string();
        match self.query_params.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.query_params.push((name, value)),
        }
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name.into(), value.into());
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = Some(no_cache);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn normalize(self, defaults: &QueryDefaults) -> NormalizedQuery {
        normalize(self, defaults)
    }
}

impl From<&str> for Query {
    fn from(uri: &str) -> Self {
        Query::new(uri)
    }
}

impl From<String> for Query {
    fn from(uri: String) -> Self {
        Query::new(uri)
    }
}

/// Values applied to every query that does not set them itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefaults {
    /// Zero disables the transport deadline.
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub no_cache: bool,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            no_cache: false,
        }
    }
}

/// A query with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub uri: String,
    pub query_params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub no_cache: bool,
    pub timeout: Duration,
}

/// Merge `query` over `defaults`. Explicit query fields win; headers merge
/// by case-insensitive name with the query's value replacing the default's.
pub fn normalize(query: Query, defaults: &QueryDefaults) -> NormalizedQuery {
    let mut headers = defaults.headers.clone();
    for (name, value) in query.headers {
        set_header(&mut headers, name, value);
    }
    NormalizedQuery {
        uri: query.uri,
        query_params: query.query_params,
        headers,
        no_cache: query.no_cache.unwrap_or(defaults.no_cache),
        timeout: query
            .timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(defaults.timeout),
    }
}

impl NormalizedQuery {
    /// The base URI with the encoded query string appended.
    pub fn request_uri(&self) -> String {
        if self.query_params.is_empty() {
            return self.uri.clone();
        }
        let query_string = self
            .query_params
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.uri.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query_string}", self.uri)
    }

    /// Apply this query's headers, cache policy and timeout to `request`.
    pub fn configure(&self, request: &mut HttpRequest) {
        for (name, value) in &self.headers {
            request.set_header(name.clone(), value.clone());
        }
        if self.no_cache {
            request.set_header("Cache-Control", "no-cache");
        }
        if !self.timeout.is_zero() {
            request.timeout = Some(self.timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;

    fn defaults() -> QueryDefaults {
        QueryDefaults::default()
    }

    #[test]
    fn params_are_appended_in_insertion_order() {
        let query = Query::new("/x").param("a", "1").param("b", "2");
        assert_eq!(query.normalize(&defaults()).request_uri(), "/x?a=1&b=2");

        let reversed = Query::new("/x").param("b", "2").param("a", "1");
        assert_eq!(reversed.normalize(&defaults()).request_uri(), "/x?b=2&a=1");
    }

    #[test]
    fn keys_and_values_are_percent_encoded() {
        let query = Query::new("/x").param("a b", "c&d");
        assert_eq!(query.normalize(&defaults()).request_uri(), "/x?a%20b=c%26d");
    }

    #[test]
    fn existing_query_string_is_extended_with_ampersand() {
        let query = Query::new("/x?z=0").param("a", "1");
        assert_eq!(query.normalize(&defaults()).request_uri(), "/x?z=0&a=1");
    }

    #[test]
    fn no_params_leaves_uri_untouched() {
        assert_eq!(Query::new("/x?y").normalize(&defaults()).request_uri(), "/x?y");
    }

    #[test]
    fn readding_a_param_replaces_value_in_place() {
        let query = Query::new("/x").param("a", 1).param("b", 2).param("a", 3);
        assert_eq!(query.normalize(&defaults()).request_uri(), "/x?a=3&b=2");
    }

    #[test]
    fn unset_fields_take_defaults() {
        let normalized = Query::new("/x").normalize(&defaults());
        assert_eq!(normalized.timeout, Duration::from_secs(60));
        assert!(!normalized.no_cache);
        assert!(normalized.query_params.is_empty());
        assert_eq!(
            normalized.headers,
            vec![("Accept".to_string(), "application/json".to_string())]
        );
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let normalized = Query::new("/x")
            .header("accept", "text/csv")
            .header("X-Api-Key", "k")
            .no_cache(true)
            .timeout(Duration::from_millis(250))
            .normalize(&defaults());
        assert_eq!(
            normalized.headers,
            vec![
                ("Accept".to_string(), "text/csv".to_string()),
                ("X-Api-Key".to_string(), "k".to_string()),
            ]
        );
        assert!(normalized.no_cache);
        assert_eq!(normalized.timeout, Duration::from_millis(250));
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let normalized = Query::new("/x")
            .timeout(Duration::ZERO)
            .normalize(&defaults());
        assert_eq!(normalized.timeout, Duration::from_secs(60));
    }

    #[test]
    fn configure_applies_headers_cache_policy_and_timeout() {
        let normalized = Query::new("/x").no_cache(true).normalize(&defaults());
        let mut request = HttpRequest::new(HttpMethod::Get, normalized.request_uri());
        normalized.configure(&mut request);
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("cache-control"), Some("no-cache"));
        assert_eq!(request.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_default_timeout_leaves_request_without_deadline() {
        let defaults = QueryDefaults {
            timeout: Duration::ZERO,
            ..QueryDefaults::default()
        };
        let normalized = Query::new("/x").normalize(&defaults);
        let mut request = HttpRequest::new(HttpMethod::Get, "/x");
        normalized.configure(&mut request);
        assert_eq!(request.timeout, None);
        assert_eq!(request.header("cache-control"), None);
    }
}
