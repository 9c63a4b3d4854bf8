//! Explicit routing context.
//!
//! Holds what every registry, resolver and router of one routing domain
//! shares: the store client, the namespace root, the retry policy and the
//! resolver cache settings. Built once and passed in; nothing is global.

use std::sync::Arc;
use std::time::Duration;

use keyroute_core::{ConfigError, NamespaceRoot, RegistryKey, RetryPolicy, RoutingConfig};

use crate::cache::CacheConfig;
use crate::client::CoordinationClient;
use crate::error::ClientError;
use crate::registry::LocationRegistry;
use crate::resolver::LocationResolver;
use crate::session::Session;

#[derive(Clone)]
pub struct RoutingContext {
    client: Arc<dyn CoordinationClient>,
    namespace: NamespaceRoot,
    policy: RetryPolicy,
    cache: Option<CacheConfig>,
    session_ttl: Duration,
    keepalive_interval: Duration,
}

impl RoutingContext {
    /// Context with the default policy, no resolver cache, and a 10s lease.
    pub fn new(client: Arc<dyn CoordinationClient>, namespace: NamespaceRoot) -> Self {
        Self {
            client,
            namespace,
            policy: RetryPolicy::default(),
            cache: None,
            session_ttl: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(3),
        }
    }

    /// Context built from a validated `keyroute.toml`.
    pub fn from_config(
        config: &RoutingConfig,
        client: Arc<dyn CoordinationClient>,
    ) -> Result<Self, ConfigError> {
        let cache_ttl = config.cache_ttl()?;
        let cache = (!cache_ttl.is_zero() && config.resolver.cache_capacity > 0).then(|| {
            CacheConfig {
                ttl: cache_ttl,
                capacity: config.resolver.cache_capacity,
            }
        });
        Ok(Self {
            client,
            namespace: config.namespace_root()?,
            policy: config.retry_policy()?,
            cache,
            session_ttl: config.session_ttl()?,
            keepalive_interval: config.keepalive_interval()?,
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cache(mut self, cache: Option<CacheConfig>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration, keepalive_interval: Duration) -> Self {
        self.session_ttl = ttl;
        self.keepalive_interval = keepalive_interval;
        self
    }

    pub fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    pub fn namespace(&self) -> &NamespaceRoot {
        &self.namespace
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cache(&self) -> Option<&CacheConfig> {
        self.cache.as_ref()
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// Open a lease for a worker's registrations.
    pub async fn open_session(&self) -> Result<Arc<Session>, ClientError> {
        let session = Session::establish(self.client.clone(), self.session_ttl).await?;
        Ok(Arc::new(session))
    }

    pub fn registry<K: RegistryKey>(&self, session: Arc<Session>) -> LocationRegistry<K> {
        LocationRegistry::new(self.client.clone(), self.namespace.clone(), session)
    }

    pub fn resolver<K: RegistryKey>(&self) -> LocationResolver<K> {
        match &self.cache {
            Some(config) => LocationResolver::with_cache(
                self.client.clone(),
                self.namespace.clone(),
                config.clone(),
            ),
            None => LocationResolver::new(self.client.clone(), self.namespace.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use keyroute_core::Location;

    use super::*;
    use crate::client::LocalClient;

    #[test]
    fn from_config_maps_sections() {
        let mut config = RoutingConfig::default();
        config.store.namespace_root = "/windows".into();
        config.router.max_attempts = 3;
        config.resolver.cache_ttl = "250ms".into();

        let client = Arc::new(LocalClient::in_memory().unwrap());
        let ctx = RoutingContext::from_config(&config, client).unwrap();
        assert_eq!(ctx.namespace().as_str(), "/windows");
        assert_eq!(ctx.policy().max_attempts, 3);
        assert_eq!(ctx.cache().unwrap().ttl, Duration::from_millis(250));
        assert_eq!(ctx.session_ttl(), Duration::from_secs(10));
    }

    #[test]
    fn zero_cache_ttl_disables_cache() {
        let client = Arc::new(LocalClient::in_memory().unwrap());
        let ctx = RoutingContext::from_config(&RoutingConfig::default(), client).unwrap();
        assert!(ctx.cache().is_none());
    }

    #[tokio::test]
    async fn context_wires_registry_and_resolver() {
        let client = Arc::new(LocalClient::in_memory().unwrap());
        let ctx = RoutingContext::new(client, NamespaceRoot::new("/test").unwrap());
        let session = ctx.open_session().await.unwrap();
        let registry = ctx.registry::<u32>(session);
        let resolver = ctx.resolver::<u32>();

        registry.register(&9, &"w-9".into()).await.unwrap();
        assert_eq!(resolver.resolve(&9).await.unwrap(), Location::from("w-9"));
    }
}
