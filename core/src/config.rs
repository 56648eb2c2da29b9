//! Client-wide configuration.
//!
//! # Design
//! Configuration is plain data with a `Default`. `from_env` reads a handful of
//! prefixed environment variables so generated clients can be pointed at a
//! different endpoint without a rebuild:
//!
//! - `{PREFIX}_ENDPOINT`: base URL that relative request URIs are joined to
//! - `{PREFIX}_USER_AGENT`: `User-Agent` sent with every request
//! - `{PREFIX}_TIMEOUT_MS`: default request timeout in milliseconds

use std::time::Duration;

use crate::query::QueryDefaults;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: Option<String>,
    pub user_agent: Option<String>,
    pub defaults: QueryDefaults,
}

impl ClientConfig {
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| {
            lookup(&format!("{prefix}_{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self {
            endpoint: var("ENDPOINT"),
            user_agent: var("USER_AGENT"),
            defaults: QueryDefaults::default(),
        };
        if let Some(raw) = var("TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(millis) => config.defaults.timeout = Duration::from_millis(millis),
                Err(error) => tracing::warn!(
                    variable = %format!("{prefix}_TIMEOUT_MS"),
                    value = %raw,
                    %error,
                    "ignoring invalid timeout"
                ),
            }
        }
        config
    }

    /// Join `uri` to the configured endpoint. Absolute `http:`/`https:`
    /// URIs, and every URI when no endpoint is set, pass through unchanged.
    pub fn resolve(&self, uri: &str) -> String {
        if uri.starts_with("http:") || uri.starts_with("https:") {
            return uri.to_string();
        }
        match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}",
                endpoint.trim_end_matches('/'),
                uri.trim_start_matches('/')
            ),
            None => uri.to_string(),
        }
    }
}
