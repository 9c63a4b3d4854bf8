//! Query and router failure types.

use std::fmt;
use std::time::Duration;

use keyroute_core::Location;
use keyroute_registry::ResolutionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of one state query against one location.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// No response within the per-attempt deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The location could not be reached or the exchange broke off.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The worker answered but refused (e.g. it no longer holds the key).
    #[error("rejected by worker: {0}")]
    RemoteRejected(String),
}

/// What made the last attempt fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Resolution(ResolutionError),
    Query(QueryError),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Resolution(e) => write!(f, "resolution: {e}"),
            FailureCause::Query(e) => write!(f, "query: {e}"),
        }
    }
}

/// Terminal failure of a routed query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterFailure {
    #[error("query for {key} failed after {attempts} attempts: {cause}")]
    AttemptsExhausted {
        key: String,
        attempts: u32,
        last_location: Option<Location>,
        cause: FailureCause,
    },

    #[error("query for {key} exceeded overall timeout of {timeout:?} after {attempts} attempts")]
    OverallTimeoutExceeded {
        key: String,
        timeout: Duration,
        attempts: u32,
        last_location: Option<Location>,
        cause: Option<FailureCause>,
    },

    /// The registration exists but cannot be read; retrying cannot help.
    #[error("registration for {key} is malformed: {reason}")]
    MalformedRegistration {
        key: String,
        attempts: u32,
        reason: String,
    },

    #[error("query for {key} cancelled after {attempts} attempts")]
    Cancelled {
        key: String,
        attempts: u32,
        last_location: Option<Location>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AttemptsExhausted,
    OverallTimeoutExceeded,
    MalformedRegistration,
    Cancelled,
}

/// Caller-facing description of a failed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub reason: FailureReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_location_tried: Option<Location>,
    pub attempts_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cause: Option<String>,
}

impl RouterFailure {
    pub fn attempts_used(&self) -> u32 {
        match self {
            RouterFailure::AttemptsExhausted { attempts, .. }
            | RouterFailure::OverallTimeoutExceeded { attempts, .. }
            | RouterFailure::MalformedRegistration { attempts, .. }
            | RouterFailure::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn last_location(&self) -> Option<&Location> {
        match self {
            RouterFailure::AttemptsExhausted { last_location, .. }
            | RouterFailure::OverallTimeoutExceeded { last_location, .. }
            | RouterFailure::Cancelled { last_location, .. } => last_location.as_ref(),
            RouterFailure::MalformedRegistration { .. } => None,
        }
    }

    pub fn descriptor(&self) -> FailureDescriptor {
        let (reason, last_cause) = match self {
            RouterFailure::AttemptsExhausted { cause, .. } => {
                (FailureReason::AttemptsExhausted, Some(cause.to_string()))
            }
            RouterFailure::OverallTimeoutExceeded { cause, .. } => (
                FailureReason::OverallTimeoutExceeded,
                cause.as_ref().map(ToString::to_string),
            ),
            RouterFailure::MalformedRegistration { reason, .. } => {
                (FailureReason::MalformedRegistration, Some(reason.clone()))
            }
            RouterFailure::Cancelled { .. } => (FailureReason::Cancelled, None),
        };
        FailureDescriptor {
            reason,
            last_location_tried: self.last_location().cloned(),
            attempts_used: self.attempts_used(),
            last_cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_descriptor_carries_last_cause() {
        let failure = RouterFailure::AttemptsExhausted {
            key: "5".into(),
            attempts: 3,
            last_location: Some("worker-a".into()),
            cause: FailureCause::Query(QueryError::Timeout(Duration::from_millis(100))),
        };
        let d = failure.descriptor();
        assert_eq!(d.reason, FailureReason::AttemptsExhausted);
        assert_eq!(d.attempts_used, 3);
        assert_eq!(d.last_location_tried, Some(Location::from("worker-a")));
        assert!(d.last_cause.unwrap().starts_with("query: no response"));
    }

    #[test]
    fn descriptor_omits_missing_location() {
        let failure = RouterFailure::AttemptsExhausted {
            key: "5".into(),
            attempts: 2,
            last_location: None,
            cause: FailureCause::Resolution(ResolutionError::NotFound {
                path: "/test/5".into(),
            }),
        };
        let json = serde_json::to_value(failure.descriptor()).unwrap();
        assert_eq!(json["reason"], "attempts_exhausted");
        assert_eq!(json["attempts_used"], 2);
        assert!(json.get("last_location_tried").is_none());
    }

    #[test]
    fn cancelled_has_no_cause() {
        let failure = RouterFailure::Cancelled {
            key: "5".into(),
            attempts: 1,
            last_location: None,
        };
        assert_eq!(failure.descriptor().last_cause, None);
        assert_eq!(failure.attempts_used(), 1);
    }
}
