//! Consul HTTP registry transport

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::registry::{AgentInfo, AgentService, QueryOptions, QueryResult, Registry, ServiceEntry};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

const INDEX_HEADER: &str = "X-Consul-Index";
const DEFAULT_DOMAIN: &str = "consul";

/// Consul agent client
pub struct ConsulRegistry {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ConsulRegistry {
    /// Create new Consul client
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use beacon_discovery::ConsulRegistry;
    ///
    /// let consul = ConsulRegistry::new("http://localhost:8500")?;
    /// ```
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create a client from discovery configuration
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        Self::with_timeout(config.base_url(), config.request_timeout)
    }

    fn with_timeout(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        url::Url::parse(&base_url)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder().build()?,
            request_timeout,
        })
    }

    /// Agent URL for `segments`, each percent-encoded as one path segment.
    fn url(&self, segments: &[&str]) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| {
                DiscoveryError::InvalidConfiguration(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: url::Url, query: &[(&str, String)], timeout: Duration) -> Result<reqwest::Response> {
        trace!(url = %url, ?query, "registry request");

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| DiscoveryError::RegistryUnavailable(format!("{}: {}", url, e)))?;

        Ok(response)
    }

    async fn get_ok(&self, segments: &[&str], query: &[(&str, String)], timeout: Duration) -> Result<reqwest::Response> {
        let url = self.url(segments)?;
        let path = url.path().to_string();
        let response = self.get(url, query, timeout).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(DiscoveryError::RegistryUnavailable(format!(
            "{} returned {}: {}",
            path,
            status,
            body.trim()
        )))
    }
}

/// Query string for a health request
fn health_query(tag: Option<&str>, options: &QueryOptions) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(dc) = &options.datacenter {
        query.push(("dc", dc.clone()));
    }
    if let Some(tag) = tag {
        query.push(("tag", tag.to_string()));
    }
    if let Some(index) = options.wait_index {
        query.push(("index", index.to_string()));
    }
    if let Some(wait) = options.wait_time {
        query.push(("wait", format!("{}s", wait.as_secs().max(1))));
    }
    if options.allow_stale {
        query.push(("stale", String::new()));
    }
    query
}

fn consistency_index(response: &reqwest::Response) -> Result<u64> {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| DiscoveryError::InvalidEntry(format!("missing or invalid {} header", INDEX_HEADER)))
}

#[async_trait]
impl Registry for ConsulRegistry {
    fn address(&self) -> String {
        self.base_url.clone()
    }

    async fn health_service(
        &self,
        service: &str,
        tag: Option<&str>,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        // The agent adds up to wait/16 of jitter to blocking queries.
        let timeout = match options.wait_time {
            Some(wait) => wait + wait / 16 + self.request_timeout,
            None => self.request_timeout,
        };

        let response = self
            .get_ok(&["v1", "health", "service", service], &health_query(tag, options), timeout)
            .await?;
        let index = consistency_index(&response)?;

        let entries: Option<Vec<ServiceEntry>> = response
            .json()
            .await
            .map_err(|e| DiscoveryError::InvalidEntry(e.to_string()))?;
        let entries = entries.unwrap_or_default();

        debug!(
            service,
            index,
            entries = entries.len(),
            "health query answered"
        );
        Ok(QueryResult { entries, index })
    }

    async fn agent_self(&self) -> Result<AgentInfo> {
        #[derive(Deserialize)]
        struct SelfResponse {
            #[serde(rename = "Config")]
            config: SelfConfig,
        }

        #[derive(Deserialize)]
        struct SelfConfig {
            #[serde(rename = "Domain", default)]
            domain: String,
            #[serde(rename = "Datacenter", default)]
            datacenter: String,
            #[serde(rename = "NodeName", default)]
            node_name: String,
            #[serde(rename = "AdvertiseAddr", default)]
            advertise_addr: String,
            #[serde(rename = "BindAddr", default)]
            bind_addr: String,
        }

        let response = self
            .get_ok(&["v1", "agent", "self"], &[], self.request_timeout)
            .await?;
        let body: SelfResponse = response
            .json()
            .await
            .map_err(|e| DiscoveryError::InvalidEntry(e.to_string()))?;
        let config = body.config;

        Ok(AgentInfo {
            domain: if config.domain.is_empty() {
                DEFAULT_DOMAIN.to_string()
            } else {
                config.domain.trim_end_matches('.').to_string()
            },
            datacenter: config.datacenter,
            node_name: config.node_name,
            advertise_addr: config.advertise_addr,
            bind_addr: config.bind_addr,
        })
    }

    async fn agent_services(&self) -> Result<HashMap<String, AgentService>> {
        let response = self
            .get_ok(&["v1", "agent", "services"], &[], self.request_timeout)
            .await?;
        response
            .json()
            .await
            .map_err(|e| DiscoveryError::InvalidEntry(e.to_string()))
    }

    async fn kv_get(&self, key: &str) -> Result<Vec<u8>> {
        #[derive(Deserialize)]
        struct KvPair {
            #[serde(rename = "Value")]
            value: Option<String>,
        }

        // Slashes in a key are hierarchy; everything else is encoded.
        let segments: Vec<&str> = ["v1", "kv"]
            .into_iter()
            .chain(key.trim_start_matches('/').split('/'))
            .collect();
        let url = self.url(&segments)?;
        let path = url.path().to_string();
        let response = self.get(url, &[], self.request_timeout).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DiscoveryError::KeyNotFound(key.to_string()));
        }
        if !response.status().is_success() {
            return Err(DiscoveryError::RegistryUnavailable(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }

        let pairs: Vec<KvPair> = response
            .json()
            .await
            .map_err(|e| DiscoveryError::InvalidEntry(e.to_string()))?;
        let pair = pairs
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::KeyNotFound(key.to_string()))?;

        match pair.value {
            Some(encoded) => general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| DiscoveryError::InvalidEntry(e.to_string())),
            None => Ok(Vec::new()),
        }
    }
}
