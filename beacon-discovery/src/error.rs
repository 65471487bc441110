//! Error types for service resolution.

use thiserror::Error;

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Service discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The registry could not be reached or answered with a failure status.
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// An immediate lookup found no healthy instances.
    #[error("Service {name} not found in registry {registry}")]
    NotFound {
        /// Service name that was looked up
        name: String,
        /// Registry address the lookup went to
        registry: String,
    },

    /// The registry answered with something we could not interpret.
    #[error("Invalid registry entry: {0}")]
    InvalidEntry(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// The resolution service has been shut down.
    #[error("Resolution service is shutting down")]
    ShuttingDown,
}

impl DiscoveryError {
    /// Create a not-found error for `name`.
    pub fn not_found(name: impl Into<String>, registry: impl Into<String>) -> Self {
        Self::NotFound {
            name: name.into(),
            registry: registry.into(),
        }
    }

    /// Check if a later attempt may succeed.
    ///
    /// Malformed entries count as transient: a registry mid-upgrade can
    /// briefly serve them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RegistryUnavailable(_) | Self::InvalidEntry(_) | Self::NotFound { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = DiscoveryError::not_found("api", "127.0.0.1:8500");
        assert_eq!(
            err.to_string(),
            "Service api not found in registry 127.0.0.1:8500"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_retryable() {
        assert!(DiscoveryError::RegistryUnavailable("down".into()).is_retryable());
        assert!(DiscoveryError::InvalidEntry("bad".into()).is_retryable());
        assert!(!DiscoveryError::KeyNotFound("k".into()).is_retryable());
        assert!(!DiscoveryError::ShuttingDown.is_retryable());
    }
}
