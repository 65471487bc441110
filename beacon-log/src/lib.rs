//! Beacon Logging Setup
//!
//! Installs a `tracing` subscriber configured from `BEACON_*` environment
//! variables. Library crates in the workspace only emit events through the
//! `tracing` macros; applications call [`init`] once at startup.
//!
//! # Usage
//!
//! ```rust
//! beacon_log::init();
//!
//! tracing::info!(service = "api", "resolver ready");
//! ```
//!
//! # Environment Variables
//!
//! - `BEACON_DEBUG=1` - Enable debug logging
//! - `BEACON_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `BEACON_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `BEACON_LOG_COLOR=1|0` - Enable/disable colors
//! - `BEACON_LOG_MODULE=1|0` - Include the event target
//!
//! `RUST_LOG`, when set, takes precedence over the level.

use once_cell::sync::Lazy;
use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Get level from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by [`EnvFilter`].
    pub fn as_filter(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_filter().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable format
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Format {
    /// Get format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Global configuration (lazy initialized).
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled (ignored for JSON)
    pub color: bool,
    /// Whether to include the event target
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            module_path: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("BEACON_DEBUG").unwrap_or(false);

        let level = lookup("BEACON_LOG_LEVEL")
            .and_then(|s| Level::from_str(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("BEACON_LOG_FORMAT")
            .and_then(|s| Format::from_str(&s))
            .unwrap_or(Format::Json);

        // Assume a color terminal unless told otherwise
        let color = flag("BEACON_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        let module_path = flag("BEACON_LOG_MODULE").unwrap_or(true);

        Self {
            debug,
            level,
            format,
            color,
            module_path,
        }
    }

    /// Level filter, overridden by `RUST_LOG` when that is set and valid.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_filter()))
    }
}

/// Get the global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Subscriber Installation
// ============================================================================

/// Install the global subscriber from the environment configuration.
///
/// Returns `false` if a subscriber was already installed; calling this more
/// than once is harmless.
pub fn init() -> bool {
    init_with(config())
}

/// Install the global subscriber from `config`.
pub fn init_with(config: &LogConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.filter());
    let layer = fmt::layer().with_target(config.module_path);

    let installed = match config.format {
        Format::Pretty => registry
            .with(layer.pretty().with_ansi(config.color))
            .try_init(),
        Format::Compact => registry
            .with(layer.compact().with_ansi(config.color))
            .try_init(),
        #[cfg(feature = "json")]
        Format::Json => registry.with(layer.json()).try_init(),
        #[cfg(not(feature = "json"))]
        Format::Json => registry.with(layer.compact().with_ansi(false)).try_init(),
    };

    installed.is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> LogConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!(Level::from_str("debug"), Some(Level::Debug));
        assert_eq!(Level::from_str("DEBUG"), Some(Level::Debug));
        assert_eq!(Level::from_str("warning"), Some(Level::Warn));
        assert_eq!(Level::from_str("none"), Some(Level::Off));
        assert_eq!(Level::from_str("invalid"), None);
        assert_eq!(Level::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(Format::from_str("pretty"), Some(Format::Pretty));
        assert_eq!(Format::from_str("Compact"), Some(Format::Compact));
        assert_eq!(Format::from_str("json"), Some(Format::Json));
        assert_eq!(Format::from_str("xml"), None);
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(!config.color);
        assert!(config.module_path);
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        assert_eq!(config_from(&[("BEACON_DEBUG", "true")]).level, Level::Debug);
        assert_eq!(
            config_from(&[("BEACON_DEBUG", "1"), ("BEACON_LOG_LEVEL", "warn")]).level,
            Level::Warn
        );
    }

    #[test]
    fn test_color_detection() {
        assert!(config_from(&[("TERM", "xterm")]).color);
        assert!(!config_from(&[("TERM", "xterm"), ("NO_COLOR", "1")]).color);
        assert!(config_from(&[("BEACON_LOG_COLOR", "1")]).color);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig {
            format: Format::Compact,
            ..Default::default()
        };
        init_with(&config);
        assert!(!init_with(&config));
        tracing::info!(service = "api", "logged after init");
    }
}
