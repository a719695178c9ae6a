//! Orchestrator configuration and registration inputs
//!
//! [`ManagerConfig`] carries the orchestrator-wide settings and can be read
//! from YAML:
//!
//! ```yaml
//! log_level: info
//! log_levels:
//!   api: debug
//! stop_timeout_ms: 5000
//! shutdown_timeout_ms: 30000
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use service_lifecycle::{LogLevel, StopOptions};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Orchestrator-wide settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Global default log level, also used by the orchestrator itself
    pub log_level: LogLevel,
    /// Per-service log level overrides
    pub log_levels: HashMap<String, LogLevel>,
    /// Stop deadline used when a caller passes none; each service's own
    /// default applies when this is unset
    pub stop_timeout_ms: Option<u64>,
    /// Deadline for a whole `stop_all` sequence
    pub shutdown_timeout_ms: Option<u64>,
}

impl ManagerConfig {
    /// Parse from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents).map_err(|e| match e {
            Error::Yaml(err) => Error::Config(format!("{}: {}", path.display(), err)),
            other => other,
        })
    }

    /// Stop deadline used when the caller gives none
    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }

    /// Deadline for `stop_all`
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }
}

/// Where a service's configuration comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigSource {
    /// Label resolved by the attached configuration plugins
    Label(String),
    /// Configuration object used as-is
    Inline(Value),
}

impl ConfigSource {
    /// The label, if this source is one
    pub fn label(&self) -> Option<&str> {
        match self {
            ConfigSource::Label(label) => Some(label),
            ConfigSource::Inline(_) => None,
        }
    }
}

impl From<&str> for ConfigSource {
    fn from(label: &str) -> Self {
        ConfigSource::Label(label.to_string())
    }
}

impl From<String> for ConfigSource {
    fn from(label: String) -> Self {
        ConfigSource::Label(label)
    }
}

impl From<Value> for ConfigSource {
    fn from(value: Value) -> Self {
        match value {
            Value::String(label) => ConfigSource::Label(label),
            other => ConfigSource::Inline(other),
        }
    }
}

/// Options for [`ServiceManager::register`](crate::ServiceManager::register)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Services that must be running before this one starts, in order
    pub dependencies: Vec<String>,
}

impl RegisterOptions {
    /// Declare dependencies
    pub fn depends_on<I, S>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deduped.contains(&dep) {
                deduped.push(dep);
            }
        }
        Self {
            dependencies: deduped,
        }
    }
}

/// Options for bulk shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopAllOptions {
    /// Options passed to every service's stop
    pub stop: StopOptions,
    /// Deadline for the whole sequence, overriding the manager default
    pub shutdown_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_parse_manager_config() {
        let yaml = r#"
log_level: warn
log_levels:
  api: debug
stop_timeout_ms: 250
shutdown_timeout_ms: 1000
"#;
        let config = ManagerConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.log_levels.get("api"), Some(&LogLevel::Debug));
        assert_eq!(config.stop_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.shutdown_timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let config = ManagerConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.shutdown_timeout(), None);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(ManagerConfig::from_yaml_str("stop_timeout: 5").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level: error").unwrap();

        let config = ManagerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, LogLevel::Error);

        assert!(matches!(
            ManagerConfig::from_file("/nonexistent/manager.yaml"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_config_source_conversions() {
        assert_eq!(
            ConfigSource::from("database"),
            ConfigSource::Label("database".to_string())
        );
        assert_eq!(
            ConfigSource::from(json!("database")).label(),
            Some("database")
        );
        assert_eq!(
            ConfigSource::from(json!({ "port": 1 })),
            ConfigSource::Inline(json!({ "port": 1 }))
        );
    }

    #[test]
    fn test_depends_on_dedupes_in_order() {
        let options = RegisterOptions::depends_on(["db", "cache", "db"]);
        assert_eq!(options.dependencies, vec!["db", "cache"]);
    }
}
