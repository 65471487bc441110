//! Resolved endpoint cache
//!
//! Entries, change subscriptions and the set of keys with a live watcher
//! share one coarse lock. Every operation under it is an in-memory map
//! mutation; handlers run only after it is released.

use crate::endpoint::EndpointSet;
use crate::key::ResolutionKey;
use crate::subscription::{ChangeHandler, Notification, SubscriptionHub, SubscriptionId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct CacheState {
    entries: HashMap<ResolutionKey, EndpointSet>,
    hub: SubscriptionHub,
    watching: HashSet<ResolutionKey>,
}

impl CacheState {
    fn store(&mut self, key: &ResolutionKey, set: EndpointSet) -> (bool, Option<Notification>) {
        if self.entries.get(key) == Some(&set) {
            return (false, None);
        }

        debug!(service = %key, endpoints = set.len(), "cache updated");
        let notification = self.hub.notification(&key.name, &set);
        self.entries.insert(key.clone(), set);
        (true, notification)
    }
}

/// Concurrency-safe map from resolution key to its current endpoints
#[derive(Default)]
pub struct Cache {
    state: RwLock<CacheState>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current endpoints for `key`, if resolved
    pub fn get(&self, key: &ResolutionKey) -> Option<EndpointSet> {
        self.state.read().entries.get(key).cloned()
    }

    /// Store `set` for `key` unless an equal set is already cached.
    ///
    /// Returns whether the entry changed. Subscribers of the key's service
    /// name are notified on change.
    pub fn update(&self, key: &ResolutionKey, set: EndpointSet) -> bool {
        let (changed, notification) = self.state.write().store(key, set);
        if let Some(notification) = notification {
            notification.deliver();
        }
        changed
    }

    /// Store `set` and claim `key` for watching in one step.
    ///
    /// Returns `true` if the caller now owns the watch and must start it;
    /// `false` if another watcher already holds it.
    pub fn seed(&self, key: &ResolutionKey, set: EndpointSet) -> bool {
        let (claimed, notification) = {
            let mut state = self.state.write();
            let (_, notification) = state.store(key, set);
            (state.watching.insert(key.clone()), notification)
        };
        if let Some(notification) = notification {
            notification.deliver();
        }
        claimed
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &ResolutionKey) -> bool {
        let removed = self.state.write().entries.remove(key).is_some();
        if removed {
            debug!(service = %key, "cache entry invalidated");
        }
        removed
    }

    /// Drop the entry and the watch claim for `key` together.
    pub fn release(&self, key: &ResolutionKey) {
        let mut state = self.state.write();
        state.entries.remove(key);
        state.watching.remove(key);
    }

    /// Whether a watcher currently owns `key`
    pub fn is_watched(&self, key: &ResolutionKey) -> bool {
        self.state.read().watching.contains(key)
    }

    /// Keys with a live watcher, sorted
    pub fn watched_keys(&self) -> Vec<ResolutionKey> {
        let mut keys: Vec<_> = self.state.read().watching.iter().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    pub fn subscribe<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&EndpointSet) + Send + Sync + 'static,
    {
        let handler: ChangeHandler = Arc::new(handler);
        self.state.write().hub.subscribe(name, handler)
    }

    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        self.state.write().hub.unsubscribe(name, id)
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.state.read().hub.count(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn set(hosts: &[&str]) -> EndpointSet {
        hosts.iter().map(|h| Endpoint::new(*h, 80)).collect()
    }

    #[test]
    fn test_get_update_invalidate() {
        let cache = Cache::new();
        let key = ResolutionKey::new("api");
        assert!(cache.get(&key).is_none());

        assert!(cache.update(&key, set(&["10.0.0.1"])));
        assert_eq!(cache.get(&key), Some(set(&["10.0.0.1"])));

        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unchanged_update_notifies_once() {
        let cache = Cache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        cache.subscribe("api", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let key = ResolutionKey::new("api");
        assert!(cache.update(&key, set(&["10.0.0.1", "10.0.0.2"])));
        assert!(!cache.update(&key, set(&["10.0.0.2", "10.0.0.1"])));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notification_uses_service_name() {
        let cache = Cache::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cache.subscribe("api", move |s| sink.lock().push(s.len()));

        cache.update(&ResolutionKey::with_datacenter("api", "dc2"), set(&["10.0.0.1"]));
        cache.update(&ResolutionKey::new("web"), set(&["10.0.0.9"]));
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_handler_may_reenter_cache() {
        let cache = Arc::new(Cache::new());
        let inner = cache.clone();
        let observed = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        cache.subscribe("api", move |_| {
            *slot.lock() = inner.get(&ResolutionKey::new("api"));
            inner.subscribe("api", |_| {});
        });

        cache.update(&ResolutionKey::new("api"), set(&["10.0.0.1"]));
        assert_eq!(*observed.lock(), Some(set(&["10.0.0.1"])));
        assert_eq!(cache.subscriber_count("api"), 2);
    }

    #[test]
    fn test_seed_claims_once() {
        let cache = Cache::new();
        let key = ResolutionKey::new("api");
        assert!(cache.seed(&key, set(&["10.0.0.1"])));
        assert!(!cache.seed(&key, set(&["10.0.0.1"])));
        assert!(cache.is_watched(&key));

        cache.release(&key);
        assert!(!cache.is_watched(&key));
        assert!(cache.get(&key).is_none());
        assert!(cache.seed(&key, set(&["10.0.0.1"])));
    }

    #[test]
    fn test_invalidate_keeps_watch_claim() {
        let cache = Cache::new();
        let key = ResolutionKey::new("api");
        cache.seed(&key, set(&["10.0.0.1"]));
        cache.invalidate(&key);
        assert!(cache.is_watched(&key));
        assert_eq!(cache.watched_keys(), vec![key]);
    }
}
