//! QueryRouter: resolve, query, re-resolve and retry.
//!
//! Every attempt re-resolves the key before querying: when a query
//! fails, the likeliest explanation is that ownership moved, so the
//! stale location is never tried twice in a row without asking the
//! registry again. A failed query also evicts the location from the
//! resolver cache.
//!
//! A failed resolution holds its attempt slot until the per-attempt
//! deadline (waking early if the key's registration changes), so a key
//! that is never registered costs `max_attempts * per_attempt_timeout`
//! rather than a burst of store reads.

use std::future::pending;
use std::marker::PhantomData;
use std::time::Duration;

use keyroute_core::{Location, RegistryKey, RetryPolicy};
use keyroute_registry::{LocationResolver, ResolutionError, RoutingContext};
use tokio::sync::watch;
use tokio::time::{Instant, sleep, sleep_until, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::error::{FailureCause, QueryError, RouterFailure};
use crate::state::AttemptTracker;
use crate::transport::QueryTransport;

/// Bounds for a single `query` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub per_attempt_timeout: Duration,
    pub max_attempts: u32,
    pub overall_timeout: Option<Duration>,
}

impl From<&RetryPolicy> for QueryOptions {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            per_attempt_timeout: policy.per_attempt_timeout,
            max_attempts: policy.max_attempts,
            overall_timeout: policy.overall_timeout,
        }
    }
}

/// A successful routed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome<V> {
    pub value: V,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Location that answered.
    pub location: Location,
}

pub type QueryResult<V> = Result<QueryOutcome<V>, RouterFailure>;

enum Interrupt {
    Cancelled,
    OverallTimeout(Duration),
}

pub struct QueryRouter<K, V, T> {
    resolver: LocationResolver<K>,
    transport: T,
    policy: RetryPolicy,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, T> QueryRouter<K, V, T>
where
    K: RegistryKey,
    V: Send + 'static,
    T: QueryTransport<K, V>,
{
    pub fn new(resolver: LocationResolver<K>, transport: T, policy: RetryPolicy) -> Self {
        Self {
            resolver,
            transport,
            policy,
            _value: PhantomData,
        }
    }

    /// Router using the context's resolver settings and retry policy.
    pub fn from_context(ctx: &RoutingContext, transport: T) -> Self {
        Self::new(ctx.resolver(), transport, ctx.policy().clone())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn resolver(&self) -> &LocationResolver<K> {
        &self.resolver
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Route a query under the configured policy.
    pub async fn query(&self, key: &K) -> QueryResult<V> {
        self.query_with_cancel(key, QueryOptions::from(&self.policy), None)
            .await
    }

    /// Route a query with an explicit attempt deadline and budget.
    pub async fn query_with(
        &self,
        key: &K,
        per_attempt_timeout: Duration,
        max_attempts: u32,
    ) -> QueryResult<V> {
        let options = QueryOptions {
            per_attempt_timeout,
            max_attempts: max_attempts.max(1),
            overall_timeout: self.policy.overall_timeout,
        };
        self.query_with_cancel(key, options, None).await
    }

    /// Route a query that the caller can abort.
    ///
    /// Flipping `cancel` to `true` (or passing the overall timeout) stops
    /// the wait at once. A query already sent to a worker may still run
    /// there; only the caller stops waiting for it.
    pub async fn query_with_cancel(
        &self,
        key: &K,
        options: QueryOptions,
        cancel: Option<watch::Receiver<bool>>,
    ) -> QueryResult<V> {
        let started = Instant::now();
        let mut tracker = AttemptTracker::new(options.max_attempts);

        let interrupt = {
            let run = self.run_attempts(key, &options, &mut tracker);
            tokio::pin!(run);
            let ceiling = async move {
                match options.overall_timeout {
                    Some(limit) => {
                        sleep_until(started + limit).await;
                        limit
                    }
                    None => pending::<Duration>().await,
                }
            };
            tokio::select! {
                biased;
                _ = cancelled(cancel) => Interrupt::Cancelled,
                limit = ceiling => Interrupt::OverallTimeout(limit),
                result = &mut run => return result,
            }
        };

        let key_repr = format!("{key:?}");
        match interrupt {
            Interrupt::Cancelled => {
                info!(?key, attempts = tracker.attempts(), phase = %tracker.phase(), "query cancelled");
                Err(RouterFailure::Cancelled {
                    key: key_repr,
                    attempts: tracker.attempts(),
                    last_location: tracker.last_location().cloned(),
                })
            }
            Interrupt::OverallTimeout(limit) => {
                warn!(
                    ?key,
                    attempts = tracker.attempts(),
                    phase = %tracker.phase(),
                    timeout = ?limit,
                    "query exceeded overall timeout"
                );
                Err(RouterFailure::OverallTimeoutExceeded {
                    key: key_repr,
                    timeout: limit,
                    attempts: tracker.attempts(),
                    last_location: tracker.last_location().cloned(),
                    cause: tracker.last_cause().cloned(),
                })
            }
        }
    }

    async fn run_attempts(
        &self,
        key: &K,
        options: &QueryOptions,
        tracker: &mut AttemptTracker,
    ) -> QueryResult<V> {
        loop {
            let attempt = tracker.begin_attempt();

            let location = match self.resolve_within(key, options.per_attempt_timeout).await {
                Ok(location) => location,
                Err(ResolutionError::Malformed(reason)) => {
                    warn!(?key, attempt, %reason, "registration malformed; not retrying");
                    tracker.abandon(FailureCause::Resolution(ResolutionError::Malformed(
                        reason.clone(),
                    )));
                    return Err(RouterFailure::MalformedRegistration {
                        key: format!("{key:?}"),
                        attempts: attempt,
                        reason,
                    });
                }
                Err(e) => {
                    debug!(?key, attempt, error = %e, "resolution failed");
                    let cause = FailureCause::Resolution(e);
                    if tracker.failed(cause.clone()) {
                        return Err(self.exhausted(key, tracker, cause));
                    }
                    self.pause(key, attempt).await;
                    continue;
                }
            };

            tracker.resolved(location.clone());
            let sent = timeout(
                options.per_attempt_timeout,
                self.transport.send(&location, key),
            )
            .await;
            let result = match sent {
                Ok(result) => result,
                Err(_) => Err(QueryError::Timeout(options.per_attempt_timeout)),
            };

            match result {
                Ok(value) => {
                    tracker.succeeded();
                    debug!(?key, attempt, %location, "query succeeded");
                    return Ok(QueryOutcome {
                        value,
                        attempts: attempt,
                        location,
                    });
                }
                Err(e) => {
                    self.resolver.invalidate(key);
                    debug!(?key, attempt, %location, error = %e, "query failed");
                    let cause = FailureCause::Query(e);
                    if tracker.failed(cause.clone()) {
                        return Err(self.exhausted(key, tracker, cause));
                    }
                    self.pause(key, attempt).await;
                }
            }
        }
    }

    /// Resolve `key` within `limit`.
    ///
    /// A retryable failure is retried only when the key's registration
    /// changes before the deadline; otherwise it is returned at the deadline.
    /// The watch is taken before each read so a registration landing right
    /// after a miss still wakes the wait.
    async fn resolve_within(&self, key: &K, limit: Duration) -> Result<Location, ResolutionError> {
        let deadline = Instant::now() + limit;
        loop {
            let events = self.resolver.watch();
            let result = match timeout_at(deadline, self.resolver.resolve(key)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ResolutionError::StoreUnavailable(format!(
                        "no answer within {limit:?}"
                    )));
                }
            };
            match result {
                Err(e) if e.is_retryable() => {
                    if Instant::now() >= deadline
                        || !self.resolver.wait_for_registration(key, events, deadline).await
                    {
                        return Err(e);
                    }
                    debug!(?key, "registration changed; resolving again");
                }
                other => return other,
            }
        }
    }

    async fn pause(&self, key: &K, failed_attempts: u32) {
        let delay = self.policy.delay_before_retry(failed_attempts);
        debug!(?key, attempt = failed_attempts, ?delay, "retry pending");
        sleep(delay).await;
    }

    fn exhausted(&self, key: &K, tracker: &AttemptTracker, cause: FailureCause) -> RouterFailure {
        warn!(
            ?key,
            attempts = tracker.attempts(),
            last_location = ?tracker.last_location(),
            %cause,
            "query attempts exhausted"
        );
        RouterFailure::AttemptsExhausted {
            key: format!("{key:?}"),
            attempts: tracker.attempts(),
            last_location: tracker.last_location().cloned(),
            cause,
        }
    }
}

/// Resolves once `cancel` flips to true; never if there is none.
async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return pending().await;
    };
    let sender_gone = rx.wait_for(|c| *c).await.is_err();
    if sender_gone {
        pending::<()>().await;
    }
}
