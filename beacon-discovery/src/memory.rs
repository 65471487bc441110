//! In-memory registry (for testing and test mode)

use crate::error::{DiscoveryError, Result};
use crate::registry::{AgentInfo, AgentService, QueryOptions, QueryResult, Registry, ServiceEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::{RwLock, watch};

type ServiceKey = (String, Option<String>);

#[derive(Default)]
struct MemoryState {
    services: HashMap<ServiceKey, Vec<ServiceEntry>>,
    agent: AgentInfo,
    agent_services: HashMap<String, AgentService>,
    kv: HashMap<String, Vec<u8>>,
}

/// In-memory registry supporting blocking queries.
///
/// Every mutation advances the consistency index and wakes blocked
/// queries. Failures can be injected to exercise watcher retry paths.
#[derive(Clone)]
pub struct InMemoryRegistry {
    state: Arc<RwLock<MemoryState>>,
    index: Arc<watch::Sender<u64>>,
    available: Arc<AtomicBool>,
    fail_next: Arc<AtomicU32>,
    immediate_queries: Arc<AtomicU64>,
    blocking_queries: Arc<AtomicU64>,
}

impl InMemoryRegistry {
    /// Create new in-memory registry
    pub fn new() -> Self {
        let (index, _) = watch::channel(1);
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            index: Arc::new(index),
            available: Arc::new(AtomicBool::new(true)),
            fail_next: Arc::new(AtomicU32::new(0)),
            immediate_queries: Arc::new(AtomicU64::new(0)),
            blocking_queries: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registry preloaded with the fixed services served in test mode.
    ///
    /// The agent reports domain `sd`, datacenter `dev` and node `node01`.
    pub async fn with_fixtures() -> Self {
        let registry = Self::new();
        registry
            .set_agent(AgentInfo {
                domain: "sd".to_string(),
                datacenter: "dev".to_string(),
                node_name: "node01".to_string(),
                advertise_addr: "127.0.0.1".to_string(),
                bind_addr: "127.0.0.1".to_string(),
            })
            .await;

        let fixtures: [(&str, &[(&str, u16)]); 6] = [
            ("test1", &[("127.0.0.1", 12345), ("127.0.0.1", 12348)]),
            ("test2", &[("10.11.12.13", 1415)]),
            ("test3", &[("192.168.0.1", 12345), ("10.0.13.0", 12347)]),
            ("syslog", &[("127.0.0.1", 9514)]),
            ("statsd", &[("127.0.0.1", 8125)]),
            ("mongo", &[("127.0.0.1", 27017), ("192.168.10.123", 27017)]),
        ];
        for (name, endpoints) in fixtures {
            let entries = endpoints
                .iter()
                .map(|(host, port)| ServiceEntry::new(name, *host, *port))
                .collect();
            registry.set_service(name, entries).await;
        }
        registry
    }

    /// Set what the agent reports about itself
    pub async fn set_agent(&self, agent: AgentInfo) {
        self.state.write().await.agent = agent;
    }

    /// Replace the entries of `name` in the local datacenter
    pub async fn set_service(&self, name: &str, entries: Vec<ServiceEntry>) {
        self.set_service_in(name, None, entries).await;
    }

    /// Replace the entries of `name` in `datacenter`
    pub async fn set_service_in(
        &self,
        name: &str,
        datacenter: Option<&str>,
        entries: Vec<ServiceEntry>,
    ) {
        let key = (name.to_string(), datacenter.map(str::to_string));
        self.state.write().await.services.insert(key, entries);
        self.bump();
    }

    /// Add one entry to its service in the local datacenter
    pub async fn register(&self, entry: ServiceEntry) {
        let key = (entry.service.name.clone(), None);
        self.state
            .write()
            .await
            .services
            .entry(key)
            .or_default()
            .push(entry);
        self.bump();
    }

    /// Remove every entry of `name` in the local datacenter
    pub async fn deregister(&self, name: &str) -> Result<()> {
        self.state
            .write()
            .await
            .services
            .remove(&(name.to_string(), None))
            .ok_or_else(|| DiscoveryError::not_found(name, self.address()))?;
        self.bump();
        Ok(())
    }

    pub async fn register_agent_service(&self, service: AgentService) {
        self.state
            .write()
            .await
            .agent_services
            .insert(service.id.clone(), service);
    }

    pub async fn put_kv(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.state.write().await.kv.insert(key.to_string(), value.into());
        self.bump();
    }

    /// Current consistency index
    pub fn index(&self) -> u64 {
        *self.index.borrow()
    }

    /// Jump the consistency index forward to `index`
    pub fn set_index(&self, index: u64) {
        self.index.send_replace(index);
    }

    /// Make every query fail (`false`) or succeed again (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `count` requests of any kind
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Health queries made without a wait index
    pub fn immediate_queries(&self) -> u64 {
        self.immediate_queries.load(Ordering::SeqCst)
    }

    /// Health queries made with a wait index
    pub fn blocking_queries(&self) -> u64 {
        self.blocking_queries.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.index.send_modify(|i| *i += 1);
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DiscoveryError::RegistryUnavailable(
                "registry marked unavailable".to_string(),
            ));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(DiscoveryError::RegistryUnavailable(
                "injected failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn snapshot(&self, service: &str, tag: Option<&str>, datacenter: Option<&str>) -> QueryResult {
        let state = self.state.read().await;
        let key = (service.to_string(), datacenter.map(str::to_string));
        let entries = state
            .services
            .get(&key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| tag.is_none_or(|t| e.has_tag(t)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        QueryResult {
            entries,
            index: self.index(),
        }
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    fn address(&self) -> String {
        "memory".to_string()
    }

    async fn health_service(
        &self,
        service: &str,
        tag: Option<&str>,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let datacenter = options.datacenter.as_deref();

        let Some(since) = options.wait_index else {
            self.immediate_queries.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;
            return Ok(self.snapshot(service, tag, datacenter).await);
        };

        self.blocking_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut changes = self.index.subscribe();
        let wait = options.wait_time.unwrap_or(std::time::Duration::from_secs(300));
        // Timing out just means nothing changed; report the current state.
        let _ = tokio::time::timeout(wait, changes.wait_for(|i| *i > since)).await;

        Ok(self.snapshot(service, tag, datacenter).await)
    }

    async fn agent_self(&self) -> Result<AgentInfo> {
        self.check_available()?;
        Ok(self.state.read().await.agent.clone())
    }

    async fn agent_services(&self) -> Result<HashMap<String, AgentService>> {
        self.check_available()?;
        Ok(self.state.read().await.agent_services.clone())
    }

    async fn kv_get(&self, key: &str) -> Result<Vec<u8>> {
        self.check_available()?;
        self.state
            .read()
            .await
            .kv
            .get(key)
            .cloned()
            .ok_or_else(|| DiscoveryError::KeyNotFound(key.to_string()))
    }
}
