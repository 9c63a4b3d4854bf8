//! keyroute.toml configuration parser.
//!
//! Durations are kept as strings in the file ("500ms", "5s", "2m") and
//! parsed by the accessors, so a bad value is reported with its field name.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::policy::{Backoff, RetryPolicy};
use crate::types::NamespaceRoot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Coordination store connection and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path prefix for every registration of this routing domain.
    pub namespace_root: String,
    /// Store endpoints (`host:port`), tried in order.
    pub endpoints: Vec<String>,
    #[serde(default = "default_session_ttl")]
    pub session_ttl: String,
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_per_attempt_timeout")]
    pub per_attempt_timeout: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval: String,
    /// Empty string disables the overall ceiling.
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout: String,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Resolver-side location cache. A zero TTL disables caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: String,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_session_ttl() -> String {
    "10s".to_string()
}
fn default_keepalive_interval() -> String {
    "3s".to_string()
}
fn default_request_timeout() -> String {
    "2s".to_string()
}
fn default_per_attempt_timeout() -> String {
    "1s".to_string()
}
fn default_max_attempts() -> u32 {
    10
}
fn default_retry_interval() -> String {
    "100ms".to_string()
}
fn default_overall_timeout() -> String {
    "20s".to_string()
}
fn default_max_retry_interval() -> String {
    "5s".to_string()
}
fn default_cache_ttl() -> String {
    "0s".to_string()
}
fn default_cache_capacity() -> usize {
    1024
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            per_attempt_timeout: default_per_attempt_timeout(),
            max_attempts: default_max_attempts(),
            retry_interval: default_retry_interval(),
            overall_timeout: default_overall_timeout(),
            backoff: BackoffKind::Fixed,
            max_retry_interval: default_max_retry_interval(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                namespace_root: "/keyroute".to_string(),
                endpoints: vec!["127.0.0.1:7700".to_string()],
                session_ttl: default_session_ttl(),
                keepalive_interval: default_keepalive_interval(),
                request_timeout: default_request_timeout(),
            },
            router: RouterConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

impl RoutingConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RoutingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field that the accessors would otherwise reject lazily.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.namespace_root()?;
        if self.store.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "store.endpoints must list at least one endpoint".into(),
            ));
        }
        let ttl = self.session_ttl()?;
        let keepalive = self.keepalive_interval()?;
        if keepalive >= ttl {
            return Err(ConfigError::Invalid(format!(
                "store.keepalive_interval ({keepalive:?}) must be shorter than store.session_ttl ({ttl:?})"
            )));
        }
        self.request_timeout()?;
        if self.router.max_attempts == 0 {
            return Err(ConfigError::Invalid("router.max_attempts must be at least 1".into()));
        }
        let policy = self.retry_policy()?;
        if policy.per_attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "router.per_attempt_timeout must be non-zero".into(),
            ));
        }
        self.cache_ttl()?;
        Ok(())
    }

    pub fn namespace_root(&self) -> Result<NamespaceRoot, ConfigError> {
        NamespaceRoot::new(self.store.namespace_root.clone())
    }

    pub fn session_ttl(&self) -> Result<Duration, ConfigError> {
        duration_field("store.session_ttl", &self.store.session_ttl)
    }

    pub fn keepalive_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("store.keepalive_interval", &self.store.keepalive_interval)
    }

    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("store.request_timeout", &self.store.request_timeout)
    }

    /// Zero means the resolver does not cache.
    pub fn cache_ttl(&self) -> Result<Duration, ConfigError> {
        duration_field("resolver.cache_ttl", &self.resolver.cache_ttl)
    }

    /// Build the router retry policy from the `[router]` section.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let r = &self.router;
        let overall_timeout = if r.overall_timeout.trim().is_empty() {
            None
        } else {
            Some(duration_field("router.overall_timeout", &r.overall_timeout)?)
        };
        let backoff = match r.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                max: duration_field("router.max_retry_interval", &r.max_retry_interval)?,
            },
        };
        Ok(RetryPolicy {
            per_attempt_timeout: duration_field(
                "router.per_attempt_timeout",
                &r.per_attempt_timeout,
            )?,
            max_attempts: r.max_attempts,
            retry_interval: duration_field("router.retry_interval", &r.retry_interval)?,
            backoff,
            overall_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let toml_str = r#"
[store]
namespace_root = "/test"
endpoints = ["127.0.0.1:7700"]
"#;
        let config = RoutingConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.namespace_root().unwrap().as_str(), "/test");
        let policy = config.retry_policy().unwrap();
        assert_eq!(policy, RetryPolicy::default());
        assert!(config.cache_ttl().unwrap().is_zero());
    }

    #[test]
    fn parse_full_router_section() {
        let toml_str = r#"
[store]
namespace_root = "/windows"
endpoints = ["10.0.0.1:7700", "10.0.0.2:7700"]
session_ttl = "6s"
keepalive_interval = "2s"

[router]
per_attempt_timeout = "250ms"
max_attempts = 3
retry_interval = "50ms"
overall_timeout = ""
backoff = "exponential"
max_retry_interval = "1s"

[resolver]
cache_ttl = "500ms"
cache_capacity = 64
"#;
        let config = RoutingConfig::from_toml_str(toml_str).unwrap();
        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.per_attempt_timeout, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.overall_timeout, None);
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                max: Duration::from_secs(1)
            }
        );
        assert_eq!(config.store.endpoints.len(), 2);
        assert_eq!(config.cache_ttl().unwrap(), Duration::from_millis(500));
        assert_eq!(config.resolver.cache_capacity, 64);
    }

    #[test]
    fn rejects_relative_namespace() {
        let toml_str = r#"
[store]
namespace_root = "test"
endpoints = ["127.0.0.1:7700"]
"#;
        let err = RoutingConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNamespace(_)));
    }

    #[test]
    fn rejects_empty_endpoints() {
        let toml_str = r#"
[store]
namespace_root = "/test"
endpoints = []
"#;
        assert!(RoutingConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut config = RoutingConfig::default();
        config.router.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_keepalive_not_shorter_than_ttl() {
        let mut config = RoutingConfig::default();
        config.store.keepalive_interval = "10s".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reports_bad_duration_field() {
        let mut config = RoutingConfig::default();
        config.router.retry_interval = "quickly".into();
        match config.validate().unwrap_err() {
            ConfigError::InvalidDuration { field, value } => {
                assert_eq!(field, "router.retry_interval");
                assert_eq!(value, "quickly");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn oversized_minutes_are_an_invalid_duration() {
        let toml_str = r#"
[store]
namespace_root = "/test"
endpoints = ["127.0.0.1:7700"]

[router]
per_attempt_timeout = "999999999999999999m"
"#;
        let err = RoutingConfig::from_toml_str(toml_str).unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::InvalidDuration {
                    field: "router.per_attempt_timeout",
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn default_renders_and_parses_back() {
        let config = RoutingConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("namespace_root"));
        let parsed = RoutingConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.store.namespace_root, config.store.namespace_root);
    }
}
