//! Error types for the coordination client, registry, and resolver.

use keyroute_store::StoreError;
use thiserror::Error;

/// Failure talking to the coordination store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// No endpoint answered (connect failure, timeout, 5xx).
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// The session lease is gone; it cannot be renewed or written under.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// The store answered but refused or failed the request.
    #[error("coordination store error: {0}")]
    Store(String),
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SessionExpired(id) => ClientError::SessionExpired(id),
            other => ClientError::Store(other.to_string()),
        }
    }
}

/// Errors surfaced to the worker that owns a key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),

    /// The registering session has expired; open a new one and re-register.
    #[error("registration session expired: {0}")]
    SessionExpired(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("registration rejected by store: {0}")]
    Rejected(String),
}

impl From<ClientError> for RegistrationError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Unavailable(msg) => RegistrationError::StoreUnavailable(msg),
            ClientError::SessionExpired(id) => RegistrationError::SessionExpired(id),
            ClientError::Store(msg) => RegistrationError::Rejected(msg),
        }
    }
}

/// Outcome of a failed lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// No live registration entry (never registered, deregistered, or expired).
    #[error("no registration at {path}")]
    NotFound { path: String },

    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),

    /// The entry exists but does not hold a location, or the key has no path.
    #[error("malformed registration: {0}")]
    Malformed(String),
}

impl ResolutionError {
    /// Whether a later lookup could succeed without anyone fixing data.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ResolutionError::Malformed(_))
    }
}

impl From<ClientError> for ResolutionError {
    fn from(e: ClientError) -> Self {
        ResolutionError::StoreUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_session_error_keeps_its_kind() {
        let e: ClientError = StoreError::SessionExpired("s-1".into()).into();
        assert_eq!(e, ClientError::SessionExpired("s-1".into()));
        let e: ClientError = StoreError::Write("disk full".into()).into();
        assert!(matches!(e, ClientError::Store(_)));
    }

    #[test]
    fn registration_maps_unavailable() {
        let e: RegistrationError = ClientError::Unavailable("refused".into()).into();
        assert!(matches!(e, RegistrationError::StoreUnavailable(_)));
    }

    #[test]
    fn only_malformed_is_final() {
        assert!(ResolutionError::NotFound { path: "/t/1".into() }.is_retryable());
        assert!(ResolutionError::StoreUnavailable("x".into()).is_retryable());
        assert!(!ResolutionError::Malformed("x".into()).is_retryable());
    }
}
