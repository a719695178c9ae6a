//! # Service lifecycle
//!
//! A fixed lifecycle state machine for a single in-process service.
//!
//! A concrete service supplies its behaviour through [`ServiceHooks`];
//! [`Service`] wraps those hooks with state gates, health tracking, a
//! timeout-bounded stop, recovery, and an observable event stream. A
//! service knows nothing about other services; dependency ordering lives in
//! the `service-orchestration` crate.
//!
//! ## Example
//!
//! ```rust
//! use service_lifecycle::{NoopHooks, Service, ServiceState, StopOptions};
//! use serde_json::json;
//!
//! # async fn example() -> service_lifecycle::Result<()> {
//! let service = Service::new("cache", NoopHooks);
//!
//! service.configure(json!({ "capacity": 1024 })).await?;
//! service.start().await?;
//! assert_eq!(service.state(), ServiceState::Running);
//!
//! service.stop(StopOptions::default()).await?;
//! service.destroy().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod error;
mod events;
mod health;
mod hooks;
mod log;
mod service;
mod state;

pub use error::{Error, HookError, Operation, Result};
pub use events::{EventBus, EventKind, ServiceEvent, SubscriptionId};
pub use health::{HealthDetails, HealthReport};
pub use hooks::{NoopHooks, RecoveryStrategy, ServiceHooks};
pub use log::{LogLevel, Logger, ParseLogLevelError};
pub use service::{DEFAULT_STOP_TIMEOUT, Service, ServiceOptions, StopOptions};
pub use state::ServiceState;
