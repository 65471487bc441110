//! Resolution keys and registry DNS-style name parsing

use std::fmt;

/// Identifies one cached and watched entity: a service in a datacenter.
///
/// `datacenter` is `None` for the agent's local datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolutionKey {
    pub name: String,
    pub datacenter: Option<String>,
}

impl ResolutionKey {
    /// Key for a service in the local datacenter
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datacenter: None,
        }
    }

    /// Key for a service in an explicit datacenter
    pub fn with_datacenter(name: impl Into<String>, datacenter: impl Into<String>) -> Self {
        let datacenter = datacenter.into();
        Self {
            name: name.into(),
            datacenter: (!datacenter.is_empty()).then_some(datacenter),
        }
    }

    /// Datacenter or empty string
    pub fn datacenter(&self) -> &str {
        self.datacenter.as_deref().unwrap_or("")
    }

    /// Split a possibly fully qualified name into its service and datacenter.
    ///
    /// Accepts `<name>.service[.<dc>].<domain>`; anything else, including
    /// every name when `domain` is empty, is taken verbatim.
    ///
    /// ```
    /// use beacon_discovery::ResolutionKey;
    ///
    /// let key = ResolutionKey::parse("api.service.dc2.consul", "consul");
    /// assert_eq!(key, ResolutionKey::with_datacenter("api", "dc2"));
    ///
    /// let key = ResolutionKey::parse("api", "consul");
    /// assert_eq!(key, ResolutionKey::new("api"));
    /// ```
    pub fn parse(fqdn: &str, domain: &str) -> Self {
        if domain.is_empty() {
            return Self::new(fqdn);
        }

        let Some(rest) = fqdn
            .strip_suffix(domain)
            .and_then(|rest| rest.strip_suffix('.'))
        else {
            return Self::new(fqdn);
        };

        if let Some(name) = rest.strip_suffix(".service") {
            if !name.is_empty() {
                return Self::new(name);
            }
        }

        match rest.rsplit_once(".service.") {
            Some((name, dc)) if !name.is_empty() && !dc.is_empty() => {
                Self::with_datacenter(name, dc)
            }
            _ => Self::new(fqdn),
        }
    }
}

impl fmt::Display for ResolutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.datacenter {
            Some(dc) => write!(f, "{}-{}", self.name, dc),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ResolutionKey::new("api").to_string(), "api");
        assert_eq!(
            ResolutionKey::with_datacenter("api", "dc1").to_string(),
            "api-dc1"
        );
        assert_eq!(ResolutionKey::with_datacenter("api", "").to_string(), "api");
    }

    #[test]
    fn test_distinct_datacenters_are_distinct_keys() {
        assert_ne!(
            ResolutionKey::with_datacenter("api", "dc1"),
            ResolutionKey::with_datacenter("api", "dc2")
        );
        assert_ne!(ResolutionKey::new("api"), ResolutionKey::with_datacenter("api", "dc1"));
    }

    #[test]
    fn test_parse_bare_name() {
        assert_eq!(ResolutionKey::parse("foo", "sd"), ResolutionKey::new("foo"));
    }

    #[test]
    fn test_parse_service_without_datacenter() {
        assert_eq!(
            ResolutionKey::parse("foo.service.sd", "sd"),
            ResolutionKey::new("foo")
        );
    }

    #[test]
    fn test_parse_service_with_datacenter() {
        assert_eq!(
            ResolutionKey::parse("foo.service.dev.sd", "sd"),
            ResolutionKey::with_datacenter("foo", "dev")
        );
    }

    #[test]
    fn test_parse_other_domain_is_verbatim() {
        assert_eq!(
            ResolutionKey::parse("foo.service.dev.example.com", "sd"),
            ResolutionKey::new("foo.service.dev.example.com")
        );
        assert_eq!(
            ResolutionKey::parse("www.sd", "sd"),
            ResolutionKey::new("www.sd")
        );
    }

    #[test]
    fn test_parse_empty_domain() {
        assert_eq!(
            ResolutionKey::parse("foo.service.sd", ""),
            ResolutionKey::new("foo.service.sd")
        );
    }
}
