// Beacon - client-side service resolution over Consul
//
// Resolves service names to healthy endpoints, caches them, and keeps them
// current with per-service blocking-query watchers.

// Re-export core functionality
pub use beacon_discovery::*;

// Re-export the discovery crate under its own name
pub use beacon_discovery as discovery;

#[cfg(feature = "log")]
pub use beacon_log;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        DiscoveryConfig, DiscoveryError, Endpoint, EndpointSet, ResolutionService, SubscriptionId,
        bootstrap::connect,
    };
}
