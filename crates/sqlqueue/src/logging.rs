//! Logging setup.
//!
//! The sqlqueue crates only emit `tracing` events and never install a
//! subscriber on their own. Applications that want the events on stderr call
//! [`init`] once at startup.
//!
//! # Environment Variables
//!
//! - `SQLQUEUE_LOG=<directives>` - overrides the configured filter, e.g.
//!   `SQLQUEUE_LOG=sqlqueue_sqlite=debug,warn`
//!
//! # Usage
//!
//! ```rust,ignore
//! use sqlqueue::logging::{self, LogLevel, LoggingConfig};
//!
//! logging::init(&LoggingConfig::default().level(LogLevel::Debug));
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives.
pub const LOG_ENV_VAR: &str = "SQLQUEUE_LOG";

/// Minimum level of events to print.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Detailed trace information (most verbose).
    Trace,
    /// Debug information for development.
    Debug,
    /// General information about operations.
    Info,
    /// Warnings about potential issues.
    #[default]
    Warn,
    /// Errors that occurred during operations.
    Error,
    /// No logging (disabled).
    Off,
}

impl LogLevel {
    /// Parse a log level from a string.
    ///
    /// Accepts: "trace", "debug", "info", "warn", "error", "off" (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "off" | "none" => Some(Self::Off),
            _ => None,
        }
    }

    /// The level as a filter directive.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }
}

/// How [`init`] builds the subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when neither `directives` nor `SQLQUEUE_LOG` is set.
    pub level: LogLevel,
    /// Full filter directives, e.g. `"sqlqueue=debug,warn"`.
    pub directives: Option<String>,
    /// Colorize output.
    pub ansi: bool,
    /// Print the event's target module.
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            directives: None,
            ansi: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    pub fn ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
            return filter;
        }
        self.directives
            .as_deref()
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new(self.level.as_str()))
    }
}

/// Install a stderr subscriber for the whole process.
///
/// Returns `true` if this call installed it, `false` if a global subscriber
/// was already set (by an earlier call or by the application).
pub fn init(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_ansi(config.ansi)
        .with_target(config.with_target)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("none"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Error < LogLevel::Off);
    }

    #[test]
    fn test_config_builder() {
        let config = LoggingConfig::default()
            .level(LogLevel::Debug)
            .directives("sqlqueue=trace")
            .ansi(false)
            .with_target(false);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.directives.as_deref(), Some("sqlqueue=trace"));
        assert!(!config.ansi);
        assert!(!config.with_target);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default().ansi(false);
        let _ = init(&config);
        assert!(!init(&config));
    }
}
