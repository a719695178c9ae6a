//! Level-filtered logging on top of `tracing`
//!
//! Each service (and each orchestrator) owns a [`Logger`] whose level can be
//! changed at runtime. Records below the level are dropped before they
//! reach `tracing`; records at or above it are emitted with a `service`
//! field so subscribers can filter per service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// Log level, ordered from most to least verbose
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug
    Debug = 0,
    /// Info
    #[default]
    Info = 1,
    /// Warn
    Warn = 2,
    /// Error
    Error = 3,
    /// Nothing is logged
    Silent = 4,
}

impl LogLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Silent,
        }
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown log level: {0}")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" | "off" | "none" => Ok(LogLevel::Silent),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// Named logger with a runtime-adjustable level
#[derive(Debug)]
pub struct Logger {
    name: String,
    level: AtomicU8,
}

impl Logger {
    /// Create a logger for `name` at `level`
    pub fn new(name: impl Into<String>, level: LogLevel) -> Self {
        Self {
            name: name.into(),
            level: AtomicU8::new(level as u8),
        }
    }

    /// Name attached to every record
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current level
    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Change the level; takes effect for the next record
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Whether a record at `level` passes the filter
    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Silent && level >= self.level()
    }

    /// Emit a record. Returns whether it passed the filter.
    pub fn log(&self, level: LogLevel, message: &str) -> bool {
        if !self.enabled(level) {
            return false;
        }
        let service = self.name.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(service, "{}", message),
            LogLevel::Info => tracing::info!(service, "{}", message),
            LogLevel::Warn => tracing::warn!(service, "{}", message),
            LogLevel::Error => tracing::error!(service, "{}", message),
            LogLevel::Silent => {}
        }
        true
    }

    /// Debug record
    pub fn debug(&self, message: &str) -> bool {
        self.log(LogLevel::Debug, message)
    }

    /// Info record
    pub fn info(&self, message: &str) -> bool {
        self.log(LogLevel::Info, message)
    }

    /// Warn record
    pub fn warn(&self, message: &str) -> bool {
        self.log(LogLevel::Warn, message)
    }

    /// Error record
    pub fn error(&self, message: &str) -> bool {
        self.log(LogLevel::Error, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filtering() {
        let logger = Logger::new("db", LogLevel::Warn);

        assert!(!logger.debug("connecting"));
        assert!(!logger.info("connected"));
        assert!(logger.warn("slow query"));
        assert!(logger.error("connection lost"));

        logger.set_level(LogLevel::Debug);
        assert!(logger.debug("connecting"));

        logger.set_level(LogLevel::Silent);
        assert!(!logger.error("connection lost"));
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("off".parse::<LogLevel>(), Ok(LogLevel::Silent));
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_serde() {
        let level: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(level, LogLevel::Error);
        assert_eq!(serde_json::to_string(&LogLevel::Info).unwrap(), "\"info\"");
    }
}
