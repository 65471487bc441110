//! Discovery configuration.

use crate::balance::LoadBalancingStrategy;
use crate::error::{DiscoveryError, Result};
use crate::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Registry address used when none is configured.
pub const DEFAULT_CONSUL_ADDR: &str = "127.0.0.1:8500";

/// Address value that selects test mode instead of a real registry.
pub const TEST_MODE_ADDR: &str = "-";

const DEFAULT_CONSUL_PORT: u16 = 8500;

/// Watcher timing and failure policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Consecutive failures after which a watcher gives up
    pub retry_ceiling: u32,

    /// Pause between a failed blocking query and the next attempt
    pub retry_delay: Duration,

    /// How long the registry may hold a blocking query open
    pub wait_time: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 10,
            retry_delay: Duration::from_secs(30),
            wait_time: Duration::from_secs(10 * 60),
        }
    }
}

impl WatchConfig {
    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = wait;
        self
    }
}

/// Discovery configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Registry agent address, `host:port` or a full `http(s)://` URL
    pub consul_addr: String,

    /// Services that must resolve before bootstrap completes
    pub wait_services: Vec<String>,

    /// Only resolve instances carrying this tag
    pub tag: Option<String>,

    /// Timeout for non-blocking registry requests
    pub request_timeout: Duration,

    /// Watcher policy
    pub watch: WatchConfig,

    /// Retry policy for the initial connection
    pub connect_retry: RetryConfig,

    /// How `resolve_one` picks among endpoints
    pub strategy: LoadBalancingStrategy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            consul_addr: DEFAULT_CONSUL_ADDR.to_string(),
            wait_services: Vec::new(),
            tag: None,
            request_timeout: Duration::from_secs(10),
            watch: WatchConfig::default(),
            connect_retry: RetryConfig::default(),
            strategy: LoadBalancingStrategy::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Configuration pointing at a registry agent.
    ///
    /// A bare host gets the default agent port appended.
    pub fn new(consul_addr: impl Into<String>) -> Self {
        Self {
            consul_addr: normalize_addr(&consul_addr.into()),
            ..Default::default()
        }
    }

    /// Load configuration from `BEACON_*` environment variables.
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `BEACON_CONSUL` | agent address, `-` for test mode |
    /// | `BEACON_WAIT_SERVICES` | comma separated services to wait for |
    /// | `BEACON_TAG` | tag filter |
    /// | `BEACON_RETRY_CEILING` | watcher failure ceiling |
    /// | `BEACON_RETRY_DELAY_SECS` | pause between watcher retries |
    /// | `BEACON_WAIT_TIME_SECS` | blocking query wait budget |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(EnvLoader::new("BEACON"))
    }

    fn from_lookup(loader: EnvLoader) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = loader.var("CONSUL").filter(|a| !a.is_empty()) {
            config.consul_addr = normalize_addr(&addr);
        }

        if let Some(services) = loader.var("WAIT_SERVICES") {
            config.wait_services = services
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.tag = loader.var("TAG").filter(|t| !t.is_empty());

        if let Some(ceiling) = loader.parse::<u32>("RETRY_CEILING")? {
            config.watch = config.watch.with_retry_ceiling(ceiling);
        }
        if let Some(secs) = loader.parse::<u64>("RETRY_DELAY_SECS")? {
            config.watch.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = loader.parse::<u64>("WAIT_TIME_SECS")? {
            config.watch.wait_time = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Whether the configuration selects the in-memory test registry
    pub fn is_test_mode(&self) -> bool {
        self.consul_addr == TEST_MODE_ADDR
    }

    /// Base URL for HTTP requests to the agent
    pub fn base_url(&self) -> String {
        if self.consul_addr.starts_with("http://") || self.consul_addr.starts_with("https://") {
            self.consul_addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.consul_addr)
        }
    }

    pub fn with_wait_service(mut self, service: impl Into<String>) -> Self {
        self.wait_services.push(service.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Host part of the agent address, used for agent-local services
    /// registered without an address of their own
    pub fn agent_host(&self) -> String {
        if self.is_test_mode() {
            return "127.0.0.1".to_string();
        }
        url::Url::parse(&self.base_url())
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_string()))
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }
}

/// Append the default agent port to `addr` if it has none.
fn normalize_addr(addr: &str) -> String {
    if addr == TEST_MODE_ADDR || addr.contains("://") || has_port(addr) {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_CONSUL_PORT)
    }
}

fn has_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    }
}

/// Prefixed environment variable reader
struct EnvLoader {
    prefix: String,
    #[cfg(test)]
    overrides: Option<std::collections::HashMap<String, String>>,
}

impl EnvLoader {
    fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            #[cfg(test)]
            overrides: None,
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        let full_key = format!("{}_{}", self.prefix, key.to_uppercase());

        #[cfg(test)]
        if let Some(overrides) = &self.overrides {
            return overrides.get(&full_key).cloned();
        }

        env::var(&full_key).ok()
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.var(key) {
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                DiscoveryError::InvalidConfiguration(format!(
                    "{}_{} is not a valid value: {}",
                    self.prefix, key, raw
                ))
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn loader(vars: &[(&str, &str)]) -> EnvLoader {
        let mut loader = EnvLoader::new("BEACON");
        loader.overrides = Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        );
        loader
    }

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::from_lookup(loader(&[])).unwrap();
        assert_eq!(config, DiscoveryConfig::default());
        assert_eq!(config.base_url(), "http://127.0.0.1:8500");
        assert_eq!(config.watch.retry_ceiling, 10);
        assert_eq!(config.watch.retry_delay, Duration::from_secs(30));
        assert_eq!(config.watch.wait_time, Duration::from_secs(600));
    }

    #[test]
    fn test_env_overrides() {
        let config = DiscoveryConfig::from_lookup(loader(&[
            ("BEACON_CONSUL", "consul.internal"),
            ("BEACON_WAIT_SERVICES", "mongo, statsd,,"),
            ("BEACON_TAG", "primary"),
            ("BEACON_RETRY_CEILING", "3"),
            ("BEACON_RETRY_DELAY_SECS", "1"),
            ("BEACON_WAIT_TIME_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.consul_addr, "consul.internal:8500");
        assert_eq!(config.wait_services, vec!["mongo", "statsd"]);
        assert_eq!(config.tag.as_deref(), Some("primary"));
        assert_eq!(config.watch.retry_ceiling, 3);
        assert_eq!(config.watch.retry_delay, Duration::from_secs(1));
        assert_eq!(config.watch.wait_time, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_number() {
        let result = DiscoveryConfig::from_lookup(loader(&[("BEACON_RETRY_CEILING", "many")]));
        assert!(matches!(result, Err(DiscoveryError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_test_mode() {
        let config = DiscoveryConfig::from_lookup(loader(&[("BEACON_CONSUL", "-")])).unwrap();
        assert!(config.is_test_mode());
    }

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr("10.0.0.5"), "10.0.0.5:8500");
        assert_eq!(normalize_addr("10.0.0.5:8600"), "10.0.0.5:8600");
        assert_eq!(normalize_addr("[::1]:8500"), "[::1]:8500");
        assert_eq!(normalize_addr("http://consul:8500"), "http://consul:8500");
        assert_eq!(
            DiscoveryConfig::new("https://consul.example.com/").base_url(),
            "https://consul.example.com"
        );
    }

    #[test]
    fn test_agent_host() {
        assert_eq!(DiscoveryConfig::default().agent_host(), "127.0.0.1");
        assert_eq!(DiscoveryConfig::new("consul.internal").agent_host(), "consul.internal");
        assert_eq!(DiscoveryConfig::new("https://10.1.2.3:8501").agent_host(), "10.1.2.3");
        assert_eq!(DiscoveryConfig::new(TEST_MODE_ADDR).agent_host(), "127.0.0.1");
    }

    #[test]
    fn test_retry_ceiling_floor() {
        assert_eq!(WatchConfig::default().with_retry_ceiling(0).retry_ceiling, 1);
    }
}
