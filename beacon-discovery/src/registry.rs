//! Registry query adapter
//!
//! The [`Registry`] trait is the narrow boundary to the health-checked
//! catalog. [`RegistryQuery`] layers the two lookups the resolver needs on
//! top of it: an immediate lookup used on cache misses and a blocking
//! lookup used by watchers.

use crate::endpoint::{Endpoint, EndpointSet};
use crate::error::{DiscoveryError, Result};
use crate::key::ResolutionKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Check status values that keep an instance in rotation.
const HEALTHY_STATUSES: [&str; 2] = ["passing", "warning"];

/// Options for a health query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Datacenter to query; `None` for the agent's own
    pub datacenter: Option<String>,

    /// Only return once the catalog index moves past this value
    pub wait_index: Option<u64>,

    /// Upper bound for how long a blocking query may be held open
    pub wait_time: Option<Duration>,

    /// Allow any server, not only the leader, to answer
    pub allow_stale: bool,
}

impl QueryOptions {
    /// Options for a point-in-time lookup
    pub fn immediate(key: &ResolutionKey) -> Self {
        Self {
            datacenter: key.datacenter.clone(),
            ..Default::default()
        }
    }

    /// Options for a blocking lookup after `index`
    pub fn blocking(key: &ResolutionKey, index: u64, wait: Duration) -> Self {
        Self {
            datacenter: key.datacenter.clone(),
            wait_index: Some(index),
            wait_time: Some(wait),
            allow_stale: true,
        }
    }
}

/// One health check attached to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "CheckID", default)]
    pub id: String,

    #[serde(rename = "Status")]
    pub status: String,
}

impl HealthCheck {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
        }
    }

    pub fn passing(id: impl Into<String>) -> Self {
        Self::new(id, "passing")
    }

    pub fn critical(id: impl Into<String>) -> Self {
        Self::new(id, "critical")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryNode {
    #[serde(rename = "Node", default)]
    pub name: String,

    #[serde(rename = "Address", default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryService {
    #[serde(rename = "Service", default)]
    pub name: String,

    #[serde(rename = "Address", default)]
    pub address: String,

    #[serde(rename = "Port")]
    pub port: u16,

    #[serde(rename = "Tags", default)]
    pub tags: Option<Vec<String>>,
}

/// A service instance as the catalog reports it, with its checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    #[serde(rename = "Node")]
    pub node: EntryNode,

    #[serde(rename = "Service")]
    pub service: EntryService,

    #[serde(rename = "Checks", default)]
    pub checks: Vec<HealthCheck>,
}

impl ServiceEntry {
    /// Create an entry for `name` on a node at `node_address`
    pub fn new(name: impl Into<String>, node_address: impl Into<String>, port: u16) -> Self {
        Self {
            node: EntryNode {
                name: String::new(),
                address: node_address.into(),
            },
            service: EntryService {
                name: name.into(),
                address: String::new(),
                port,
                tags: None,
            },
            checks: Vec::new(),
        }
    }

    /// Set a service-specific address overriding the node address
    pub fn with_service_address(mut self, address: impl Into<String>) -> Self {
        self.service.address = address.into();
        self
    }

    /// Attach a health check
    pub fn with_check(mut self, check: HealthCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.service.tags.get_or_insert_with(Vec::new).push(tag.into());
        self
    }

    /// An entry is healthy iff every check is passing or warning.
    pub fn is_healthy(&self) -> bool {
        self.checks
            .iter()
            .all(|c| HEALTHY_STATUSES.contains(&c.status.as_str()))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.service
            .tags
            .as_ref()
            .is_some_and(|tags| tags.iter().any(|t| t == tag))
    }

    /// The endpoint to dial: the service address, or the node's when unset.
    pub fn endpoint(&self) -> Endpoint {
        let host = if self.service.address.is_empty() {
            &self.node.address
        } else {
            &self.service.address
        };
        Endpoint::new(host.clone(), self.service.port)
    }
}

/// Raw answer to a health query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub entries: Vec<ServiceEntry>,

    /// Consistency index of the answer
    pub index: u64,
}

/// Configuration the local agent reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentInfo {
    /// Registry DNS domain, e.g. `consul`
    pub domain: String,
    pub datacenter: String,
    pub node_name: String,
    pub advertise_addr: String,
    pub bind_addr: String,
}

/// A service registered on the local agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentService {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Service")]
    pub service: String,

    #[serde(rename = "Address", default)]
    pub address: String,

    #[serde(rename = "Port")]
    pub port: u16,
}

/// Health-checked service catalog
#[async_trait]
pub trait Registry: Send + Sync {
    /// Human readable registry address, used in errors and logs
    fn address(&self) -> String;

    /// Query instances of `service`, optionally filtered by `tag`
    async fn health_service(
        &self,
        service: &str,
        tag: Option<&str>,
        options: &QueryOptions,
    ) -> Result<QueryResult>;

    /// Inspect the local agent's configuration
    async fn agent_self(&self) -> Result<AgentInfo>;

    /// List services registered on the local agent
    async fn agent_services(&self) -> Result<HashMap<String, AgentService>>;

    /// Read a raw value from the key-value store
    async fn kv_get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Immediate and blocking endpoint lookups with health filtering.
#[derive(Clone)]
pub struct RegistryQuery {
    registry: Arc<dyn Registry>,
    tag: Option<String>,
}

impl RegistryQuery {
    pub fn new(registry: Arc<dyn Registry>, tag: Option<String>) -> Self {
        Self { registry, tag }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Look up the current healthy endpoints.
    ///
    /// An empty answer is [`DiscoveryError::NotFound`].
    pub async fn immediate(&self, key: &ResolutionKey) -> Result<(EndpointSet, u64)> {
        let (set, index) = self.lookup(key, &QueryOptions::immediate(key)).await?;
        if set.is_empty() {
            return Err(DiscoveryError::not_found(
                key.to_string(),
                self.registry.address(),
            ));
        }
        Ok((set, index))
    }

    /// Wait up to `wait` for the endpoints to change after `index`.
    ///
    /// An empty answer is a valid state here.
    pub async fn blocking(
        &self,
        key: &ResolutionKey,
        index: u64,
        wait: Duration,
    ) -> Result<(EndpointSet, u64)> {
        self.lookup(key, &QueryOptions::blocking(key, index, wait))
            .await
    }

    async fn lookup(
        &self,
        key: &ResolutionKey,
        options: &QueryOptions,
    ) -> Result<(EndpointSet, u64)> {
        let result = self
            .registry
            .health_service(&key.name, self.tag.as_deref(), options)
            .await?;

        let set = healthy_endpoints(&result.entries);
        Ok((set, result.index))
    }
}

/// Endpoints of every entry whose checks are all passing or warning.
pub fn healthy_endpoints(entries: &[ServiceEntry]) -> EndpointSet {
    entries
        .iter()
        .filter(|e| e.is_healthy())
        .map(ServiceEntry::endpoint)
        .collect()
}
