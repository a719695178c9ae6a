//! Error types for service orchestration

use std::time::Duration;
use thiserror::Error;

/// Service orchestration error type
#[derive(Error, Debug)]
pub enum Error {
    /// A registration with this name already exists
    #[error("Service already exists: {0}")]
    ServiceExists(String),

    /// No registration with this name
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The registration exists but its factory failed to build an instance
    #[error("Service could not be constructed: {0}")]
    ServiceUnavailable(String),

    /// A plugin with this name is already attached
    #[error("Plugin already attached: {0}")]
    PluginExists(String),

    /// The dependency declarations form a cycle
    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// Services on the cycle, starting and ending with the same name
        cycle: Vec<String>,
    },

    /// A dependency could not be started
    #[error("Cannot start '{service}': dependency '{dependency}' failed: {source}")]
    DependencyFailed {
        /// Service whose start was aborted
        service: String,
        /// Dependency that failed
        dependency: String,
        /// Why the dependency failed
        #[source]
        source: Box<Error>,
    },

    /// Running services still depend on the one being stopped
    #[error("Cannot stop '{service}': required by running services: {}", .dependents.join(", "))]
    DependentsRunning {
        /// Service the stop was requested for
        service: String,
        /// Running dependents
        dependents: Vec<String>,
    },

    /// No attached plugin resolved the configuration label
    #[error("No configuration found for label '{label}' of service '{service}'")]
    UnresolvedConfig {
        /// Service being configured
        service: String,
        /// Unresolved label
        label: String,
    },

    /// A bulk start stopped before reaching this service
    #[error("Skipped '{service}': '{failed}' failed to start")]
    Skipped {
        /// Service that was not attempted
        service: String,
        /// Service whose failure ended the sequence
        failed: String,
    },

    /// A bulk stop ran out of time before reaching this service
    #[error("Shutdown did not finish within {}ms", .timeout.as_millis())]
    ShutdownTimeout {
        /// The shutdown deadline
        timeout: Duration,
    },

    /// Error from a service's own lifecycle
    #[error(transparent)]
    Lifecycle(#[from] service_lifecycle::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The lifecycle error at the root of this one, looking through
    /// dependency failures
    pub fn lifecycle(&self) -> Option<&service_lifecycle::Error> {
        match self {
            Error::Lifecycle(err) => Some(err),
            Error::DependencyFailed { source, .. } => source.lifecycle(),
            _ => None,
        }
    }

    /// Whether this error, or the dependency failure it wraps, is a cycle
    pub fn is_circular_dependency(&self) -> bool {
        match self {
            Error::CircularDependency { .. } => true,
            Error::DependencyFailed { source, .. } => source.is_circular_dependency(),
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
