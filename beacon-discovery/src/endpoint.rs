//! Endpoint and endpoint-set value types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single network endpoint of a service instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,

    /// Port number
    pub port: u16,
}

impl Endpoint {
    /// Create new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Unordered collection of unique endpoints.
///
/// Two sets are equal when they hold the same endpoints, regardless of the
/// order or repetition they were built from. An empty set means the registry
/// knows the service but none of its instances are healthy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSet {
    endpoints: BTreeSet<Endpoint>,
}

impl EndpointSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint, returning `false` if it was already present
    pub fn insert(&mut self, endpoint: Endpoint) -> bool {
        self.endpoints.insert(endpoint)
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Get the endpoint at `index` in the set's iteration order
    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.iter().nth(index)
    }

    /// Render every endpoint as `host:port`
    pub fn to_strings(&self) -> Vec<String> {
        self.endpoints.iter().map(ToString::to_string).collect()
    }

    /// Join every endpoint into a `host:port,host:port` seed list
    pub fn join(&self, separator: &str) -> String {
        self.to_strings().join(separator)
    }
}

impl FromIterator<Endpoint> for EndpointSet {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        Self {
            endpoints: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[Endpoint; N]> for EndpointSet {
    fn from(endpoints: [Endpoint; N]) -> Self {
        endpoints.into_iter().collect()
    }
}

impl IntoIterator for EndpointSet {
    type Item = Endpoint;
    type IntoIter = std::collections::btree_set::IntoIter<Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.endpoints.into_iter()
    }
}

impl<'a> IntoIterator for &'a EndpointSet {
    type Item = &'a Endpoint;
    type IntoIter = std::collections::btree_set::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.endpoints.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(host: &str, port: u16) -> Endpoint {
        Endpoint::new(host, port)
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(ep("10.0.0.1", 80).to_string(), "10.0.0.1:80");
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let a = EndpointSet::from([ep("10.0.0.1", 80), ep("10.0.0.2", 80), ep("10.0.0.3", 81)]);
        let b = EndpointSet::from([ep("10.0.0.3", 81), ep("10.0.0.1", 80), ep("10.0.0.2", 80)]);
        let c = EndpointSet::from([ep("10.0.0.2", 80), ep("10.0.0.3", 81), ep("10.0.0.1", 80)]);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_set_equality_ignores_duplicates() {
        let a = EndpointSet::from([ep("10.0.0.1", 80), ep("10.0.0.1", 80), ep("10.0.0.2", 80)]);
        let b = EndpointSet::from([ep("10.0.0.2", 80), ep("10.0.0.1", 80)]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_set_inequality() {
        let a = EndpointSet::from([ep("10.0.0.1", 80)]);
        let b = EndpointSet::from([ep("10.0.0.1", 81)]);
        let c = EndpointSet::from([ep("10.0.0.1", 80), ep("10.0.0.2", 80)]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, EndpointSet::new());
    }

    #[test]
    fn test_join() {
        let set = EndpointSet::from([ep("127.0.0.1", 27017), ep("192.168.10.123", 27017)]);
        assert_eq!(set.join(","), "127.0.0.1:27017,192.168.10.123:27017");
        assert!(set.contains(&ep("127.0.0.1", 27017)));
        assert_eq!(set.get(1), Some(&ep("192.168.10.123", 27017)));
        assert_eq!(set.get(2), None);
    }
}
