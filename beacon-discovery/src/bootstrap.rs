//! Startup: connect to the registry and wait for required services

use crate::config::DiscoveryConfig;
use crate::consul::ConsulRegistry;
use crate::error::Result;
use crate::registry::Registry;
use crate::resolver::ResolutionService;
use crate::retry::RetryConfig;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build a ready [`ResolutionService`] from `config`.
///
/// In test mode this returns [`ResolutionService::test_mode`]. Otherwise the
/// agent is inspected (retrying with the connect backoff until it answers)
/// and each of `config.wait_services` must resolve before this returns.
/// The last error is returned once the retry budget is spent.
pub async fn connect(config: &DiscoveryConfig) -> Result<ResolutionService> {
    if config.is_test_mode() {
        info!("registry test mode, serving fixed services");
        return Ok(ResolutionService::test_mode().await);
    }

    let registry: Arc<dyn Registry> = Arc::new(ConsulRegistry::from_config(config)?);
    connect_with(registry, config).await
}

/// Like [`connect`], over an already constructed registry.
pub async fn connect_with(
    registry: Arc<dyn Registry>,
    config: &DiscoveryConfig,
) -> Result<ResolutionService> {
    let agent = with_retry(&config.connect_retry, "agent self-inspection", || {
        registry.agent_self()
    })
    .await?;

    info!(
        registry = %registry.address(),
        domain = %agent.domain,
        datacenter = %agent.datacenter,
        node = %agent.node_name,
        "connected to registry"
    );

    let service = ResolutionService::new(registry, agent, config);
    for name in &config.wait_services {
        let resolved = with_retry(&config.connect_retry, name, || service.resolve_all(name)).await;
        match resolved {
            Ok(set) => info!(service = %name, endpoints = %set.join(","), "required service available"),
            Err(e) => {
                service.shutdown().await;
                return Err(e);
            }
        }
    }

    Ok(service)
}

async fn with_retry<T, F, Fut>(policy: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    target_name = what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "registry not ready, retrying"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                debug!(target_name = what, attempts = attempt + 1, "giving up");
                return Err(e);
            }
        }
    }
}
