//! Service manager for orchestrating lifecycle-managed services.
//!
//! The ServiceManager holds named registrations, builds service instances
//! lazily, resolves their configuration through the attached plugins and
//! drives them through their lifecycles in dependency order.

use crate::{
    Error, Result,
    config::{ConfigSource, ManagerConfig, RegisterOptions, StopAllOptions},
    graph::DependencyGraph,
    plugin::ConfigPlugin,
};
use async_runtime_compat::Spawner;
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde_json::Value;
use service_lifecycle::{
    EventBus, EventKind, HealthReport, LogLevel, Logger, Service, ServiceEvent, ServiceState,
    StopOptions, SubscriptionId,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Builds the service instance for a registration, given its name
pub type ServiceFactory = Arc<dyn Fn(&str) -> anyhow::Result<Service> + Send + Sync>;

/// Service event forwarded by the manager, tagged with the service name
#[derive(Debug, Clone)]
pub struct ManagerEvent {
    /// Name the service is registered under
    pub service: String,
    /// The service's own event
    pub event: ServiceEvent,
}

/// Snapshot of a registration
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationInfo {
    /// Registered name
    pub name: String,
    /// Inline configuration or label
    pub config: ConfigSource,
    /// Declared dependencies, in declaration order
    pub dependencies: Vec<String>,
    /// Registered services that declared this one as a dependency
    pub dependents: Vec<String>,
    /// Whether an instance currently exists
    pub constructed: bool,
}

/// Per-service outcome of a bulk operation, in processing order
#[derive(Debug, Default)]
pub struct BulkReport {
    results: IndexMap<String, Result<()>>,
}

impl BulkReport {
    /// Whether every service succeeded
    pub fn is_success(&self) -> bool {
        self.results.values().all(Result::is_ok)
    }

    /// Outcome for one service
    pub fn get(&self, name: &str) -> Option<&Result<()>> {
        self.results.get(name)
    }

    /// Names that succeeded, in processing order
    pub fn succeeded(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Names that failed or were never attempted, with their errors
    pub fn failed(&self) -> Vec<(&str, &Error)> {
        self.results
            .iter()
            .filter_map(|(name, result)| result.as_ref().err().map(|err| (name.as_str(), err)))
            .collect()
    }

    /// Names in processing order
    pub fn names(&self) -> Vec<&str> {
        self.results.keys().map(String::as_str).collect()
    }

    /// Number of services covered
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the report is empty
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Consume into the underlying ordered map
    pub fn into_inner(self) -> IndexMap<String, Result<()>> {
        self.results
    }
}

struct Registration {
    factory: ServiceFactory,
    config: ConfigSource,
    dependencies: Vec<String>,
    dependents: Vec<String>,
    instance: Option<Arc<Service>>,
}

impl Registration {
    fn info(&self, name: &str) -> RegistrationInfo {
        RegistrationInfo {
            name: name.to_string(),
            config: self.config.clone(),
            dependencies: self.dependencies.clone(),
            dependents: self.dependents.clone(),
            constructed: self.instance.is_some(),
        }
    }
}

struct LogLevels {
    default: LogLevel,
    overrides: HashMap<String, LogLevel>,
}

struct ManagerInner {
    registry: Mutex<IndexMap<String, Registration>>,
    plugins: Mutex<Vec<Arc<dyn ConfigPlugin>>>,
    events: EventBus<ManagerEvent>,
    log_levels: Mutex<LogLevels>,
    logger: Logger,
    config: ManagerConfig,
    spawner: Arc<dyn Spawner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Central service orchestrator
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct ServiceManager {
    inner: Arc<ManagerInner>,
}

/// Non-owning handle to a [`ServiceManager`], for background listeners
#[derive(Clone)]
pub struct WeakServiceManager {
    inner: Weak<ManagerInner>,
}

impl WeakServiceManager {
    /// The manager, if it is still alive
    pub fn upgrade(&self) -> Option<ServiceManager> {
        self.inner.upgrade().map(|inner| ServiceManager { inner })
    }
}

impl ServiceManager {
    /// Create a manager with default settings
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Create a manager with explicit settings, spawning on the compiled-in runtime
    pub fn with_config(config: ManagerConfig) -> Self {
        Self::with_spawner(config, async_runtime_compat::default_spawner())
    }

    /// Create a manager with a specific spawner
    ///
    /// This is useful for tests or when you need explicit control over the runtime.
    pub fn with_spawner(config: ManagerConfig, spawner: Arc<dyn Spawner>) -> Self {
        let logger = Logger::new("service-manager", config.log_level);
        let log_levels = LogLevels {
            default: config.log_level,
            overrides: config.log_levels.clone(),
        };
        logger.debug("service manager created");

        Self {
            inner: Arc::new(ManagerInner {
                registry: Mutex::new(IndexMap::new()),
                plugins: Mutex::new(Vec::new()),
                events: EventBus::new(),
                log_levels: Mutex::new(log_levels),
                logger,
                config,
                spawner,
            }),
        }
    }

    /// Settings the manager was created with
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Spawner used for background work such as plugin listeners
    pub fn spawner(&self) -> Arc<dyn Spawner> {
        self.inner.spawner.clone()
    }

    /// Non-owning handle to this manager
    pub fn downgrade(&self) -> WeakServiceManager {
        WeakServiceManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles refer to the same manager
    pub fn ptr_eq(&self, other: &ServiceManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn registry(&self) -> MutexGuard<'_, IndexMap<String, Registration>> {
        lock(&self.inner.registry)
    }

    /// Register a service
    ///
    /// Dependencies are recorded by name and need not be registered yet;
    /// they are resolved when the service is started. Dependent links are
    /// kept in both directions regardless of registration order.
    pub fn register<F>(
        &self,
        name: impl Into<String>,
        factory: F,
        config: impl Into<ConfigSource>,
        options: RegisterOptions,
    ) -> Result<()>
    where
        F: Fn(&str) -> anyhow::Result<Service> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut registry = self.registry();
        if registry.contains_key(&name) {
            return Err(Error::ServiceExists(name));
        }

        for dep in &options.dependencies {
            if let Some(entry) = registry.get_mut(dep) {
                if !entry.dependents.contains(&name) {
                    entry.dependents.push(name.clone());
                }
            }
        }
        let dependents = registry
            .iter()
            .filter(|(_, entry)| entry.dependencies.contains(&name))
            .map(|(other, _)| other.clone())
            .collect();

        registry.insert(
            name.clone(),
            Registration {
                factory: Arc::new(factory),
                config: config.into(),
                dependencies: options.dependencies,
                dependents,
                instance: None,
            },
        );
        drop(registry);

        self.inner
            .logger
            .debug(&format!("registered service '{}'", name));
        Ok(())
    }

    /// Whether `name` is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.registry().contains_key(name)
    }

    /// Registered names, in registration order
    pub fn service_names(&self) -> Vec<String> {
        self.registry().keys().cloned().collect()
    }

    /// Snapshot of one registration
    pub fn registration(&self, name: &str) -> Option<RegistrationInfo> {
        self.registry().get(name).map(|entry| entry.info(name))
    }

    /// Snapshots of every registration, in registration order
    pub fn registrations(&self) -> Vec<RegistrationInfo> {
        self.registry()
            .iter()
            .map(|(name, entry)| entry.info(name))
            .collect()
    }

    /// Declared dependencies of `name`
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.registry()
            .get(name)
            .map(|entry| entry.dependencies.clone())
            .unwrap_or_default()
    }

    /// Registered services depending on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.registry()
            .get(name)
            .map(|entry| entry.dependents.clone())
            .unwrap_or_default()
    }

    /// The existing instance of `name`, without constructing one
    pub fn instance(&self, name: &str) -> Option<Arc<Service>> {
        self.registry()
            .get(name)
            .and_then(|entry| entry.instance.clone())
    }

    /// The instance of `name`, constructing it on first access
    ///
    /// A destroyed instance is replaced by a fresh one. Returns `None` and
    /// logs a warning if the name is unregistered or the factory fails.
    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        let factory = {
            let registry = self.registry();
            let Some(entry) = registry.get(name) else {
                self.inner
                    .logger
                    .warn(&format!("service '{}' is not registered", name));
                return None;
            };
            if let Some(service) = &entry.instance {
                if service.state() != ServiceState::Destroyed {
                    return Some(service.clone());
                }
            }
            entry.factory.clone()
        };

        let service = match factory(name) {
            Ok(service) => Arc::new(service),
            Err(err) => {
                self.inner.logger.warn(&format!(
                    "failed to construct service '{}': {:#}",
                    name, err
                ));
                return None;
            }
        };

        {
            let mut registry = self.registry();
            let entry = registry.get_mut(name)?;
            if let Some(existing) = &entry.instance {
                if existing.state() != ServiceState::Destroyed {
                    return Some(existing.clone());
                }
            }
            entry.instance = Some(service.clone());
        }

        self.wire(name, &service);
        self.inner
            .logger
            .debug(&format!("constructed service '{}'", name));
        Some(service)
    }

    fn wire(&self, name: &str, service: &Service) {
        let weak = Arc::downgrade(&self.inner);
        let service_name = name.to_string();
        service.events().subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.events.publish(&ManagerEvent {
                    service: service_name.clone(),
                    event: event.clone(),
                });
            }
        });
        service.set_log_level(self.log_level_for(name));
    }

    fn require(&self, name: &str) -> Result<Arc<Service>> {
        if !self.is_registered(name) {
            return Err(Error::ServiceNotFound(name.to_string()));
        }
        self.get(name)
            .ok_or_else(|| Error::ServiceUnavailable(name.to_string()))
    }

    fn is_running(&self, name: &str) -> bool {
        self.instance(name)
            .is_some_and(|service| service.state() == ServiceState::Running)
    }

    /// Attach a configuration plugin. Plugin names must be unique.
    pub fn attach_plugin(&self, plugin: Arc<dyn ConfigPlugin>) -> Result<()> {
        {
            let mut plugins = lock(&self.inner.plugins);
            if plugins.iter().any(|p| p.name() == plugin.name()) {
                return Err(Error::PluginExists(plugin.name().to_string()));
            }
            plugins.push(plugin.clone());
        }
        plugin.attached(self);
        self.inner
            .logger
            .debug(&format!("attached plugin '{}'", plugin.name()));
        Ok(())
    }

    /// Detach a plugin by name
    pub fn detach_plugin(&self, name: &str) -> Option<Arc<dyn ConfigPlugin>> {
        let plugin = {
            let mut plugins = lock(&self.inner.plugins);
            let index = plugins.iter().position(|p| p.name() == name)?;
            plugins.remove(index)
        };
        plugin.detached(self);
        Some(plugin)
    }

    /// Names of attached plugins, in resolution order
    pub fn plugin_names(&self) -> Vec<String> {
        lock(&self.inner.plugins)
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    async fn resolve_config(&self, info: &RegistrationInfo) -> Result<Value> {
        let label = match &info.config {
            ConfigSource::Inline(config) => return Ok(config.clone()),
            ConfigSource::Label(label) => label,
        };

        let plugins: Vec<Arc<dyn ConfigPlugin>> = lock(&self.inner.plugins).clone();
        for plugin in plugins {
            if let Some(config) = plugin.resolve(&info.name, info, label).await {
                self.inner.logger.debug(&format!(
                    "plugin '{}' resolved label '{}' for '{}'",
                    plugin.name(),
                    label,
                    info.name
                ));
                return Ok(config);
            }
        }

        Err(Error::UnresolvedConfig {
            service: info.name.clone(),
            label: label.clone(),
        })
    }

    /// Resolve the service's configuration and apply it
    pub async fn configure_service(&self, name: &str) -> Result<()> {
        let info = self
            .registration(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        let config = self.resolve_config(&info).await?;
        let service = self.require(name)?;
        service.configure(config).await?;
        Ok(())
    }

    /// Start a service after making sure its dependencies are running
    ///
    /// Dependencies that are not running are started first, recursively and
    /// in declaration order; the first dependency failure aborts the start.
    /// A service that was never configured is configured first.
    pub async fn start_service(&self, name: &str) -> Result<()> {
        self.start_with_chain(name, Vec::new()).await
    }

    fn start_with_chain<'a>(
        &'a self,
        name: &'a str,
        mut chain: Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if let Some(start) = chain.iter().position(|n| n == name) {
                let mut cycle = chain.split_off(start);
                cycle.push(name.to_string());
                return Err(Error::CircularDependency { cycle });
            }
            chain.push(name.to_string());

            let info = self
                .registration(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;

            for dependency in &info.dependencies {
                if self.is_running(dependency) {
                    continue;
                }
                if let Err(err) = self.start_with_chain(dependency, chain.clone()).await {
                    self.inner.logger.error(&format!(
                        "cannot start '{}': dependency '{}' failed: {}",
                        name, dependency, err
                    ));
                    return Err(Error::DependencyFailed {
                        service: name.to_string(),
                        dependency: dependency.clone(),
                        source: Box::new(err),
                    });
                }
            }

            let service = self.require(name)?;
            if service.state() == ServiceState::Created {
                self.configure_service(name).await?;
            }

            self.inner
                .logger
                .info(&format!("starting service '{}'", name));
            service.start().await?;
            Ok(())
        }
        .boxed()
    }

    fn stop_options(&self, mut options: StopOptions) -> StopOptions {
        if options.timeout.is_none() {
            options.timeout = self.inner.config.stop_timeout();
        }
        options
    }

    /// Stop a service
    ///
    /// Unless `options.force` is set, refuses while any running service
    /// depends on it. A service that was never constructed is already
    /// stopped.
    pub async fn stop_service(&self, name: &str, options: StopOptions) -> Result<()> {
        let info = self
            .registration(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;

        if !options.force {
            let running: Vec<String> = info
                .dependents
                .iter()
                .filter(|dependent| self.is_running(dependent))
                .cloned()
                .collect();
            if !running.is_empty() {
                let err = Error::DependentsRunning {
                    service: name.to_string(),
                    dependents: running,
                };
                self.inner.logger.warn(&err.to_string());
                return Err(err);
            }
        }

        let Some(service) = self.instance(name) else {
            return Ok(());
        };
        self.inner
            .logger
            .info(&format!("stopping service '{}'", name));
        service.stop(self.stop_options(options)).await?;
        Ok(())
    }

    /// Recover a service from the `error` state
    pub async fn recover_service(&self, name: &str) -> Result<()> {
        let service = self.require(name)?;
        service.recover().await?;
        Ok(())
    }

    /// Destroy a service's instance; the next access builds a new one
    pub async fn destroy_service(&self, name: &str) -> Result<()> {
        if !self.is_registered(name) {
            return Err(Error::ServiceNotFound(name.to_string()));
        }
        let Some(service) = self.instance(name) else {
            return Ok(());
        };
        service.destroy().await?;
        Ok(())
    }

    fn graph(&self) -> DependencyGraph {
        DependencyGraph::from_entries(
            self.registry()
                .iter()
                .map(|(name, entry)| (name.clone(), entry.dependencies.clone())),
        )
    }

    /// Every registered name, dependencies first
    pub fn topological_order(&self) -> Result<Vec<String>> {
        self.graph().topological_sort()
    }

    /// Every registered name, dependents first
    pub fn shutdown_order(&self) -> Result<Vec<String>> {
        self.graph().shutdown_order()
    }

    /// Start every registered service in dependency order
    ///
    /// Services are started one at a time. After the first failure the
    /// remaining services are not attempted and are reported as
    /// [`Error::Skipped`]. Services already running are reported as
    /// successes.
    pub async fn start_all(&self) -> Result<BulkReport> {
        let order = self.topological_order()?;
        self.inner
            .logger
            .info(&format!("starting services: {:?}", order));

        let mut report = BulkReport::default();
        let mut failed: Option<String> = None;

        for name in order {
            if let Some(failed) = &failed {
                report.results.insert(
                    name.clone(),
                    Err(Error::Skipped {
                        service: name,
                        failed: failed.clone(),
                    }),
                );
                continue;
            }
            if self.is_running(&name) {
                report.results.insert(name, Ok(()));
                continue;
            }

            let result = self.start_service(&name).await;
            if let Err(err) = &result {
                self.inner
                    .logger
                    .error(&format!("failed to start '{}': {}", name, err));
                failed = Some(name.clone());
            }
            report.results.insert(name, result);
        }

        Ok(report)
    }

    /// Stop every constructed service, dependents first
    ///
    /// The sequence runs on the manager's spawner. With a shutdown deadline
    /// (from `options` or the manager settings) the wait for it is raced
    /// against that deadline; services not reported before it expires are
    /// reported as [`Error::ShutdownTimeout`]. A stop already in flight then
    /// still runs to completion under its own per-call deadline, and no
    /// further services are stopped.
    pub async fn stop_all(&self, options: StopAllOptions) -> Result<BulkReport> {
        let order = self.shutdown_order()?;
        let deadline = options
            .shutdown_timeout
            .or_else(|| self.inner.config.shutdown_timeout());
        self.inner
            .logger
            .info(&format!("stopping services: {:?}", order));

        let (tx, rx) = async_channel::unbounded();
        let abandoned = Arc::new(AtomicBool::new(false));
        {
            let manager = self.clone();
            let order = order.clone();
            let abandoned = abandoned.clone();
            let stop = options.stop;
            self.inner.spawner.spawn(Box::pin(async move {
                for name in order {
                    if abandoned.load(Ordering::SeqCst) {
                        break;
                    }
                    let result = if manager.instance(&name).is_some() {
                        manager.stop_service(&name, stop).await
                    } else {
                        Ok(())
                    };
                    if tx.send((name, result)).await.is_err() {
                        break;
                    }
                }
            }));
        }

        let mut results = IndexMap::new();
        let collect = async {
            while let Ok((name, result)) = rx.recv().await {
                results.insert(name, result);
            }
        };
        let expired = match deadline {
            Some(deadline) => async_runtime_compat::timeout(deadline, collect).await.err(),
            None => {
                collect.await;
                None
            }
        };

        if let Some(elapsed) = expired {
            // the in-flight stop finishes under its own deadline; nothing after it starts
            abandoned.store(true, Ordering::SeqCst);
            self.inner.logger.error(&format!(
                "shutdown did not finish within {}ms",
                elapsed.after.as_millis()
            ));
            for name in &order {
                if !results.contains_key(name) {
                    results.insert(
                        name.clone(),
                        Err(Error::ShutdownTimeout {
                            timeout: elapsed.after,
                        }),
                    );
                }
            }
        }

        Ok(BulkReport { results })
    }

    /// Health of every registered service
    ///
    /// Services that were never constructed get a synthetic report instead
    /// of being built just to be checked.
    pub async fn check_health(&self) -> IndexMap<String, HealthReport> {
        let snapshot: Vec<(String, Option<Arc<Service>>)> = self
            .registry()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.instance.clone()))
            .collect();

        let mut reports = IndexMap::with_capacity(snapshot.len());
        for (name, instance) in snapshot {
            let report = match instance {
                Some(service) => service.health().await,
                None => HealthReport::not_created(name.clone()),
            };
            reports.insert(name, report);
        }
        reports
    }

    /// Set a log level
    ///
    /// `"*"` sets the global default and applies it to every constructed
    /// service without its own override; any other target sets that
    /// service's override. Both are remembered for services built later.
    pub fn set_log_level(&self, target: &str, level: LogLevel) {
        if target == "*" {
            let overrides = {
                let mut levels = lock(&self.inner.log_levels);
                levels.default = level;
                levels.overrides.clone()
            };
            self.inner.logger.set_level(level);
            for (name, instance) in self.constructed() {
                if !overrides.contains_key(&name) {
                    instance.set_log_level(level);
                }
            }
        } else {
            lock(&self.inner.log_levels)
                .overrides
                .insert(target.to_string(), level);
            if let Some(service) = self.instance(target) {
                service.set_log_level(level);
            }
        }
    }

    /// Effective log level for `name`
    pub fn log_level_for(&self, name: &str) -> LogLevel {
        let levels = lock(&self.inner.log_levels);
        levels
            .overrides
            .get(name)
            .copied()
            .unwrap_or(levels.default)
    }

    fn constructed(&self) -> Vec<(String, Arc<Service>)> {
        self.registry()
            .iter()
            .filter_map(|(name, entry)| {
                entry
                    .instance
                    .as_ref()
                    .map(|service| (name.clone(), service.clone()))
            })
            .collect()
    }

    /// The manager's event bus
    pub fn events(&self) -> &EventBus<ManagerEvent> {
        &self.inner.events
    }

    /// Subscribe to every forwarded event
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ManagerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Subscribe to one event channel
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ManagerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(move |event| {
            if event.event.kind() == kind {
                handler(event);
            }
        })
    }

    /// Channel receiving every forwarded event
    pub fn listen(&self) -> async_channel::Receiver<ManagerEvent> {
        self.inner.events.listen()
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceManager")
            .field("services", &self.service_names())
            .field("plugins", &self.plugin_names())
            .finish()
    }
}
