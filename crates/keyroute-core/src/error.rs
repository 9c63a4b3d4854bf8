//! Error types for configuration and key encoding.

use thiserror::Error;

/// Errors raised while loading or validating `keyroute.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid namespace root {0:?}: must be an absolute path without a trailing slash")]
    InvalidNamespace(String),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A key could not be turned into a registry path segment (or back).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot encode key: {0}")]
pub struct KeyEncodingError(pub String);
