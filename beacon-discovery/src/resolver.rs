//! Resolution service: cached lookups backed by per-key watchers

use crate::balance::Balancer;
use crate::cache::Cache;
use crate::config::{DiscoveryConfig, WatchConfig};
use crate::endpoint::{Endpoint, EndpointSet};
use crate::error::{DiscoveryError, Result};
use crate::key::ResolutionKey;
use crate::memory::InMemoryRegistry;
use crate::registry::{AgentInfo, Registry, RegistryQuery};
use crate::subscription::SubscriptionId;
use crate::watcher::Watcher;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Inner {
    query: RegistryQuery,
    agent: AgentInfo,
    agent_host: String,
    cache: Arc<Cache>,
    balancer: Balancer,
    watch: WatchConfig,
    shutdown: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

/// Resolves service names to healthy endpoints.
///
/// The first lookup of a key goes to the registry, seeds the cache and
/// starts one background watcher for it; later lookups are served from the
/// cache, which the watcher keeps current. Cloning is cheap and every clone
/// shares the same cache, subscriptions and watchers.
#[derive(Clone)]
pub struct ResolutionService {
    inner: Arc<Inner>,
}

impl ResolutionService {
    /// Create a service over `registry` for an agent that reported `agent`.
    pub fn new(registry: Arc<dyn Registry>, agent: AgentInfo, config: &DiscoveryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                query: RegistryQuery::new(registry, config.tag.clone()),
                agent,
                agent_host: config.agent_host(),
                cache: Arc::new(Cache::new()),
                balancer: Balancer::new(config.strategy),
                watch: config.watch.clone(),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Service over an in-memory registry holding fixed test services
    /// (`test1`, `test2`, `test3`, `syslog`, `statsd`, `mongo`).
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use beacon_discovery::ResolutionService;
    ///
    /// let service = ResolutionService::test_mode().await;
    /// let syslog = service.resolve_one("syslog").await.unwrap();
    /// assert_eq!(syslog.to_string(), "127.0.0.1:9514");
    /// # service.shutdown().await;
    /// # });
    /// ```
    pub async fn test_mode() -> Self {
        let registry = InMemoryRegistry::with_fixtures().await;
        let agent = registry.agent_self().await.unwrap_or_default();
        let config = DiscoveryConfig::new(crate::config::TEST_MODE_ADDR);
        Self::new(Arc::new(registry), agent, &config)
    }

    /// All healthy endpoints of `name`.
    ///
    /// `name` is a bare service name or `<name>.service[.<dc>].<domain>`.
    /// A cached non-empty set is returned as is; otherwise the registry is
    /// queried and, on success, the key is cached and watched.
    pub async fn resolve_all(&self, name: &str) -> Result<EndpointSet> {
        if self.inner.shutdown.is_cancelled() {
            return Err(DiscoveryError::ShuttingDown);
        }

        let key = ResolutionKey::parse(name, &self.inner.agent.domain);
        if let Some(set) = self.inner.cache.get(&key).filter(|s| !s.is_empty()) {
            return Ok(set);
        }

        debug!(service = %key, "cache miss, querying registry");
        let (set, index) = self.inner.query.immediate(&key).await?;
        if self.inner.cache.seed(&key, set.clone()) {
            self.spawn_watcher(key, index)?;
        }
        Ok(set)
    }

    /// One healthy endpoint of `name`, chosen by the configured strategy
    pub async fn resolve_one(&self, name: &str) -> Result<Endpoint> {
        let set = self.resolve_all(name).await?;
        self.inner
            .balancer
            .pick(&set)
            .ok_or_else(|| DiscoveryError::not_found(name, self.inner.query.registry().address()))
    }

    /// All endpoints joined as `host:port,host:port`
    pub async fn connection_string(&self, name: &str) -> Result<String> {
        Ok(self.resolve_all(name).await?.join(","))
    }

    /// Call `handler` with the new endpoint set whenever the set cached
    /// for service `name` changes, in any datacenter.
    ///
    /// Handlers run on the task that accepted the change, after the cache
    /// lock is released. Two changes accepted on different tasks (a lookup
    /// and a watcher, say) may therefore reach a handler in either order,
    /// so the last set delivered is not always the one cached. A handler
    /// that needs the current state should read it back with
    /// [`cached`](Self::cached), which is safe to call from inside it.
    pub fn subscribe<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&EndpointSet) + Send + Sync + 'static,
    {
        self.inner.cache.subscribe(name, handler)
    }

    /// Remove a subscription; unknown ids are ignored.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        self.inner.cache.unsubscribe(name, id)
    }

    /// Drop the cached set of `name` so the next lookup queries the
    /// registry. A running watcher keeps running.
    pub fn invalidate(&self, name: &str) -> bool {
        let key = ResolutionKey::parse(name, &self.inner.agent.domain);
        self.inner.cache.invalidate(&key)
    }

    /// Cached set of `name` without querying the registry
    pub fn cached(&self, name: &str) -> Option<EndpointSet> {
        let key = ResolutionKey::parse(name, &self.inner.agent.domain);
        self.inner.cache.get(&key)
    }

    /// Keys that currently have a live watcher
    pub fn watched_keys(&self) -> Vec<ResolutionKey> {
        self.inner.cache.watched_keys()
    }

    /// Read a raw value from the registry's key-value store
    pub async fn kv(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.query.registry().kv_get(key).await
    }

    /// Endpoint of a service registered on the local agent.
    ///
    /// Services registered without an address live on the agent host.
    pub async fn agent_service(&self, name: &str) -> Result<Endpoint> {
        let registry = self.inner.query.registry();
        let services = registry.agent_services().await?;
        let service = services
            .values()
            .find(|s| s.service == name)
            .ok_or_else(|| DiscoveryError::not_found(name, registry.address()))?;

        let host = if service.address.is_empty() {
            self.inner.agent_host.clone()
        } else {
            service.address.clone()
        };
        Ok(Endpoint::new(host, service.port))
    }

    /// Registry DNS domain
    pub fn domain(&self) -> &str {
        &self.inner.agent.domain
    }

    /// Datacenter of the local agent
    pub fn datacenter(&self) -> &str {
        &self.inner.agent.datacenter
    }

    /// Node name of the local agent
    pub fn node_name(&self) -> &str {
        &self.inner.agent.node_name
    }

    pub fn agent_info(&self) -> &AgentInfo {
        &self.inner.agent
    }

    /// Stop every watcher and wait for them to finish.
    ///
    /// Lookups after shutdown fail with [`DiscoveryError::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        info!(watchers = tasks.len(), "shutting down resolution service");
        while tasks.join_next().await.is_some() {}
    }

    fn spawn_watcher(&self, key: ResolutionKey, index: u64) -> Result<()> {
        let mut tasks = self.inner.tasks.lock();
        if self.inner.shutdown.is_cancelled() {
            self.inner.cache.release(&key);
            return Err(DiscoveryError::ShuttingDown);
        }

        while tasks.try_join_next().is_some() {}

        let watcher = Watcher::new(
            key,
            self.inner.query.clone(),
            self.inner.cache.clone(),
            self.inner.watch.clone(),
            self.inner.shutdown.child_token(),
        );
        tasks.spawn(async move {
            watcher.run(index).await;
        });
        Ok(())
    }
}
