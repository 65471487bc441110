//! Service resolution for Beacon
//!
//! This crate resolves logical service names to the healthy `host:port`
//! endpoints registered in Consul, and keeps them fresh without a registry
//! round trip per lookup.
//!
//! ## Features
//!
//! - **Cached resolution** - first lookup queries the registry, later ones hit the cache
//! - **Blocking-query watchers** - one background long-poll per resolved key
//! - **Change subscriptions** - callbacks fire when a service's endpoints change
//! - **Load balancing** - random, round-robin or first endpoint
//! - **URL rewriting** - substitute a discovered endpoint into a URL
//! - **Test mode** - fixed services over an in-memory registry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use beacon_discovery::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = bootstrap::connect(&DiscoveryConfig::from_env()?).await?;
//!
//!     // All healthy instances, or one picked at random
//!     let all = service.resolve_all("api").await?;
//!     let one = service.resolve_one("api.service.dc2.consul").await?;
//!     println!("{} instances, using {}", all.len(), one);
//!
//!     // Get told when the instance set changes
//!     service.subscribe("api", |set| println!("api is now {}", set.join(",")));
//!
//!     let url = service.rewrite_url("http://api/v1/items").await;
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ### Testing
//!
//! ```rust,ignore
//! use beacon_discovery::*;
//! use std::sync::Arc;
//!
//! let registry = InMemoryRegistry::new();
//! registry.register(ServiceEntry::new("api", "10.0.0.1", 8080)).await;
//!
//! let service = ResolutionService::new(
//!     Arc::new(registry.clone()),
//!     AgentInfo::default(),
//!     &DiscoveryConfig::default(),
//! );
//! ```

pub mod balance;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod consul;
pub mod endpoint;
pub mod error;
pub mod key;
pub mod memory;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod rewrite;
pub mod subscription;
pub mod watcher;

pub use balance::{Balancer, LoadBalancingStrategy, pick_random};
pub use cache::Cache;
pub use config::{DiscoveryConfig, WatchConfig};
pub use consul::ConsulRegistry;
pub use endpoint::{Endpoint, EndpointSet};
pub use error::{DiscoveryError, Result};
pub use key::ResolutionKey;
pub use memory::InMemoryRegistry;
pub use registry::{
    AgentInfo, AgentService, HealthCheck, QueryOptions, QueryResult, Registry, RegistryQuery,
    ServiceEntry,
};
pub use resolver::ResolutionService;
pub use retry::{BackoffStrategy, RetryConfig};
pub use rewrite::should_discover;
pub use subscription::SubscriptionId;
pub use watcher::{WatchCursor, WatchExit, WatchState, Watcher};
