//! Endpoint selection

use crate::endpoint::{Endpoint, EndpointSet};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Load balancing strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    /// Uniform random selection
    #[default]
    Random,

    /// Round-robin selection over the sorted endpoint order
    RoundRobin,

    /// Always pick the first endpoint in sorted order
    First,
}

/// Picks one endpoint out of a resolved set.
#[derive(Debug, Default)]
pub struct Balancer {
    strategy: LoadBalancingStrategy,
    round_robin_index: AtomicUsize,
}

impl Balancer {
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self {
            strategy,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    /// Select an endpoint, or `None` for an empty set
    pub fn pick(&self, set: &EndpointSet) -> Option<Endpoint> {
        if set.is_empty() {
            return None;
        }

        let index = match self.strategy {
            LoadBalancingStrategy::Random => rand::rng().random_range(0..set.len()),
            LoadBalancingStrategy::RoundRobin => {
                self.round_robin_index.fetch_add(1, Ordering::Relaxed) % set.len()
            }
            LoadBalancingStrategy::First => 0,
        };

        set.get(index).cloned()
    }
}

/// Uniformly random endpoint of `set`
pub fn pick_random(set: &EndpointSet) -> Option<Endpoint> {
    Balancer::new(LoadBalancingStrategy::Random).pick(set)
}
