//! Change subscriptions keyed by service name

use crate::endpoint::EndpointSet;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error};

/// Callback invoked with the new endpoint set of a service.
pub type ChangeHandler = Arc<dyn Fn(&EndpointSet) + Send + Sync>;

/// Token returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Ordered handler lists per service name.
///
/// Subscriptions are not datacenter scoped: a change to `api` in any
/// datacenter reaches every `api` handler.
#[derive(Default)]
pub struct SubscriptionHub {
    next_id: u64,
    handlers: HashMap<String, Vec<(SubscriptionId, ChangeHandler)>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `name`.
    ///
    /// Registering the same handler twice yields two subscriptions, and it
    /// fires once for each.
    pub fn subscribe(&mut self, name: &str, handler: ChangeHandler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers
            .entry(name.to_string())
            .or_default()
            .push((id, handler));
        debug!(service = name, id = id.0, "subscribed to endpoint changes");
        id
    }

    /// Remove the subscription `id` from `name`. Returns whether it existed.
    pub fn unsubscribe(&mut self, name: &str, id: SubscriptionId) -> bool {
        let Some(list) = self.handlers.get_mut(name) else {
            return false;
        };
        let Some(pos) = list.iter().position(|(sid, _)| *sid == id) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.handlers.remove(name);
        }
        debug!(service = name, id = id.0, "unsubscribed from endpoint changes");
        true
    }

    /// Number of handlers registered for `name`
    pub fn count(&self, name: &str) -> usize {
        self.handlers.get(name).map(Vec::len).unwrap_or(0)
    }

    /// Snapshot the handlers for `name` so they can run outside any lock.
    pub fn notification(&self, name: &str, set: &EndpointSet) -> Option<Notification> {
        let list = self.handlers.get(name)?;
        Some(Notification {
            name: name.to_string(),
            set: set.clone(),
            handlers: list.iter().map(|(_, h)| h.clone()).collect(),
        })
    }
}

/// A pending delivery of one accepted change.
pub struct Notification {
    name: String,
    set: EndpointSet,
    handlers: Vec<ChangeHandler>,
}

impl Notification {
    /// Invoke every handler in registration order.
    ///
    /// A panicking handler is logged and skipped so it cannot take down the
    /// watcher that delivered the change.
    pub fn deliver(self) {
        for handler in &self.handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&self.set))).is_err() {
                error!(service = %self.name, "change handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> ChangeHandler {
        let log = log.clone();
        Arc::new(move |_: &EndpointSet| log.lock().push(tag))
    }

    #[test]
    fn test_fan_out_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = SubscriptionHub::new();
        hub.subscribe("svc", recorder(&log, "h1"));
        hub.subscribe("svc", recorder(&log, "h2"));
        hub.subscribe("other", recorder(&log, "other"));

        let set = EndpointSet::from([Endpoint::new("10.0.0.1", 80)]);
        hub.notification("svc", &set).unwrap().deliver();
        assert_eq!(*log.lock(), vec!["h1", "h2"]);
    }

    #[test]
    fn test_unsubscribe() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = SubscriptionHub::new();
        let h1 = hub.subscribe("svc", recorder(&log, "h1"));
        hub.subscribe("svc", recorder(&log, "h2"));

        assert!(hub.unsubscribe("svc", h1));
        assert!(!hub.unsubscribe("svc", h1));
        assert!(!hub.unsubscribe("missing", h1));

        hub.notification("svc", &EndpointSet::new()).unwrap().deliver();
        assert_eq!(*log.lock(), vec!["h2"]);
    }

    #[test]
    fn test_duplicate_handler_fires_twice() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder(&log, "h");
        let mut hub = SubscriptionHub::new();
        let first = hub.subscribe("svc", handler.clone());
        let second = hub.subscribe("svc", handler);
        assert_ne!(first, second);
        assert_eq!(hub.count("svc"), 2);

        hub.notification("svc", &EndpointSet::new()).unwrap().deliver();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = SubscriptionHub::new();
        fn boom(_: &EndpointSet) {
            panic!("boom");
        }

        hub.subscribe("svc", Arc::new(boom));
        hub.subscribe("svc", recorder(&log, "after"));

        hub.notification("svc", &EndpointSet::new()).unwrap().deliver();
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn test_no_subscribers() {
        let hub = SubscriptionHub::new();
        assert!(hub.notification("svc", &EndpointSet::new()).is_none());
        assert_eq!(hub.count("svc"), 0);
    }
}
