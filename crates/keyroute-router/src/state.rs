//! Per-query state machine.
//!
//! ```text
//! Idle → Resolving → Querying → Succeeded
//!            ↑           │
//!            │           ↓
//!            └── RetryPending ──→ Exhausted
//! ```
//!
//! A resolution failure moves straight from `Resolving` to `RetryPending`
//! (or `Exhausted`). Each tracker belongs to exactly one `query` call.

use std::fmt;

use keyroute_core::Location;
use tracing::debug;

use crate::error::FailureCause;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Idle,
    Resolving,
    Querying,
    RetryPending,
    Succeeded,
    Exhausted,
}

impl QueryPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryPhase::Succeeded | QueryPhase::Exhausted)
    }

    pub fn can_transition_to(self, next: QueryPhase) -> bool {
        use QueryPhase::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Querying)
                | (Resolving, RetryPending)
                | (Resolving, Exhausted)
                | (Querying, Succeeded)
                | (Querying, RetryPending)
                | (Querying, Exhausted)
                | (RetryPending, Resolving)
        )
    }
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryPhase::Idle => "idle",
            QueryPhase::Resolving => "resolving",
            QueryPhase::Querying => "querying",
            QueryPhase::RetryPending => "retry_pending",
            QueryPhase::Succeeded => "succeeded",
            QueryPhase::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Attempt counter, phase and last failure of one in-flight query.
#[derive(Debug)]
pub struct AttemptTracker {
    phase: QueryPhase,
    attempts: u32,
    max_attempts: u32,
    last_location: Option<Location>,
    last_cause: Option<FailureCause>,
}

impl AttemptTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            phase: QueryPhase::Idle,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_location: None,
            last_cause: None,
        }
    }

    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_location(&self) -> Option<&Location> {
        self.last_location.as_ref()
    }

    pub fn last_cause(&self) -> Option<&FailureCause> {
        self.last_cause.as_ref()
    }

    fn transition(&mut self, next: QueryPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal query transition {} → {}",
            self.phase,
            next
        );
        debug!(attempt = self.attempts, from = %self.phase, to = %next, "query phase");
        self.phase = next;
    }

    /// Start the next attempt. Returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.transition(QueryPhase::Resolving);
        self.attempts
    }

    /// Resolution succeeded; the query goes to `location`.
    pub fn resolved(&mut self, location: Location) {
        self.last_location = Some(location);
        self.transition(QueryPhase::Querying);
    }

    pub fn succeeded(&mut self) {
        self.transition(QueryPhase::Succeeded);
    }

    /// Record a failed attempt. Returns true if the budget is spent.
    pub fn failed(&mut self, cause: FailureCause) -> bool {
        self.last_cause = Some(cause);
        if self.attempts >= self.max_attempts {
            self.transition(QueryPhase::Exhausted);
            true
        } else {
            self.transition(QueryPhase::RetryPending);
            false
        }
    }

    /// Stop without retrying (unrecoverable failure).
    pub fn abandon(&mut self, cause: FailureCause) {
        self.last_cause = Some(cause);
        self.transition(QueryPhase::Exhausted);
    }
}
