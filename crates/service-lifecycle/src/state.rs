//! Lifecycle states and the gates that guard each operation

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a single service
///
/// The main path is `Created → Configuring → Configured → Starting →
/// Running → Stopping → Stopped`, with `Destroying → Destroyed`, `Error`
/// and `Recovering` on the side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Constructed, never configured
    Created,
    /// Configure hook in flight
    Configuring,
    /// Configuration applied, not running
    Configured,
    /// Start hook in flight
    Starting,
    /// Running
    Running,
    /// Stop hook in flight
    Stopping,
    /// Stopped, may be reconfigured or restarted
    Stopped,
    /// Destroy hook in flight
    Destroying,
    /// Terminal state
    Destroyed,
    /// A lifecycle operation failed
    Error,
    /// Recovery in flight
    Recovering,
}

impl ServiceState {
    /// States from which `configure` may run
    pub fn accepts_configuration(self) -> bool {
        matches!(
            self,
            ServiceState::Created
                | ServiceState::Configured
                | ServiceState::Running
                | ServiceState::Stopped
        )
    }

    /// States from which `start` may run
    pub fn can_start(self) -> bool {
        matches!(self, ServiceState::Configured | ServiceState::Stopped)
    }

    /// States in which `stop` does real work; every other state is a no-op
    pub fn can_stop(self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Error)
    }

    /// States from which `recover` may run
    pub fn can_recover(self) -> bool {
        self == ServiceState::Error
    }

    /// Whether a hook is currently in flight
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            ServiceState::Configuring
                | ServiceState::Starting
                | ServiceState::Stopping
                | ServiceState::Destroying
                | ServiceState::Recovering
        )
    }

    /// Lowercase name, as used in events and health reports
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Created => "created",
            ServiceState::Configuring => "configuring",
            ServiceState::Configured => "configured",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Destroying => "destroying",
            ServiceState::Destroyed => "destroyed",
            ServiceState::Error => "error",
            ServiceState::Recovering => "recovering",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
