//! Error types for service lifecycle operations

use crate::state::ServiceState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, cloneable error source produced by a lifecycle hook
pub type HookError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle operation names, used to tag failures and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `configure`
    Configure,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `recover`
    Recover,
    /// `destroy`
    Destroy,
    /// Custom health check
    HealthCheck,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Configure => "configure",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Recover => "recover",
            Operation::Destroy => "destroy",
            Operation::HealthCheck => "health check",
        };
        f.write_str(name)
    }
}

/// Service lifecycle error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The operation is not permitted from the current state
    #[error("Cannot {operation} service '{service}' in state {state}")]
    InvalidState {
        /// Service name
        service: String,
        /// Rejected operation
        operation: Operation,
        /// State the service was in
        state: ServiceState,
    },

    /// A lifecycle hook returned an error
    #[error("{operation} failed: {source}")]
    Hook {
        /// Operation whose hook failed
        operation: Operation,
        /// Original hook error
        #[source]
        source: HookError,
    },

    /// The stop hook did not finish before the deadline
    #[error("stop failed: shutdown timeout after {}ms", .timeout.as_millis())]
    ShutdownTimeout {
        /// Deadline that expired
        timeout: Duration,
    },
}

impl Error {
    /// Wrap a hook failure with the name of the failing operation
    pub fn hook(operation: Operation, source: anyhow::Error) -> Self {
        let source: Box<dyn std::error::Error + Send + Sync + 'static> = source.into();
        Error::Hook {
            operation,
            source: Arc::from(source),
        }
    }

    /// Whether this is a state-gate rejection rather than a failure
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState { .. })
    }

    /// Whether this is a stop deadline expiry
    pub fn is_shutdown_timeout(&self) -> bool {
        matches!(self, Error::ShutdownTimeout { .. })
    }

    /// The operation this error belongs to
    pub fn operation(&self) -> Operation {
        match self {
            Error::InvalidState { operation, .. } | Error::Hook { operation, .. } => *operation,
            Error::ShutdownTimeout { .. } => Operation::Stop,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
