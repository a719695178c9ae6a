//! # Service orchestration
//!
//! Dependency-aware orchestration of [`service_lifecycle::Service`]
//! instances.
//!
//! The [`ServiceManager`] keeps named registrations, each with a factory,
//! a configuration source and the names of the services it depends on.
//! Instances are built on first use. Starting a service starts its
//! dependencies first, stopping one is refused while running services still
//! need it, and bulk operations walk the dependency graph in topological
//! order. Configuration labels are resolved by [`ConfigPlugin`]s such as
//! [`LabelConfigPlugin`].
//!
//! ## Example
//!
//! ```rust
//! use service_lifecycle::{NoopHooks, Service, ServiceState, StopOptions};
//! use service_orchestration::{LabelConfigPlugin, RegisterOptions, ServiceManager};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> service_orchestration::Result<()> {
//! let manager = ServiceManager::new();
//!
//! let labels = LabelConfigPlugin::new();
//! labels.set_label("database", json!({ "host": "localhost", "port": 5432 }));
//! manager.attach_plugin(Arc::new(labels))?;
//!
//! manager.register(
//!     "db",
//!     |name: &str| Ok(Service::new(name, NoopHooks)),
//!     "database",
//!     RegisterOptions::default(),
//! )?;
//! manager.register(
//!     "api",
//!     |name: &str| Ok(Service::new(name, NoopHooks)),
//!     json!({ "port": 8080 }),
//!     RegisterOptions::depends_on(["db"]),
//! )?;
//!
//! manager.start_service("api").await?;
//! assert_eq!(manager.instance("db").unwrap().state(), ServiceState::Running);
//!
//! manager.stop_service("api", StopOptions::default()).await?;
//! manager.stop_service("db", StopOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod config;
mod error;
mod graph;
mod manager;
mod plugin;

pub use config::{ConfigSource, ManagerConfig, RegisterOptions, StopAllOptions};
pub use error::{Error, Result};
pub use graph::DependencyGraph;
pub use manager::{
    BulkReport, ManagerEvent, RegistrationInfo, ServiceFactory, ServiceManager,
    WeakServiceManager,
};
pub use plugin::{ConfigPlugin, LABEL_PLUGIN_NAME, LabelConfigPlugin, PushOutcome};
