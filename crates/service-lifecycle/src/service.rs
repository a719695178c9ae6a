//! The per-service lifecycle state machine
//!
//! [`Service`] owns the state, health flag and last applied configuration
//! of one service and drives its [`ServiceHooks`] through the lifecycle.
//! Each public operation starts with a state gate: the gate check and the
//! move into the operation's transitional state happen under one lock, so
//! a second operation attempted while a hook is in flight is rejected
//! immediately instead of interleaving with it.
//!
//! Failures never escape as panics. A hook error is wrapped with the
//! operation name, stored as `last_error`, drives the service into
//! [`ServiceState::Error`], is logged and published as an error event, and
//! is finally returned to the caller.

use crate::error::{Error, Operation, Result};
use crate::events::{EventBus, EventKind, ServiceEvent, SubscriptionId};
use crate::health::{HealthDetails, HealthReport};
use crate::hooks::{RecoveryStrategy, ServiceHooks};
use crate::log::{LogLevel, Logger};
use crate::state::ServiceState;
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Default deadline for the stop hook
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Construction-time settings of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Deadline for the stop hook when the caller gives none; zero disables it
    pub stop_timeout: Duration,
    /// Initial log level
    pub log_level: LogLevel,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            log_level: LogLevel::default(),
        }
    }
}

/// Options for [`Service::stop`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Deadline for the stop hook, overriding the service default.
    /// `Some(Duration::ZERO)` waits indefinitely.
    pub timeout: Option<Duration>,
    /// On deadline expiry, move to `stopped` instead of `error`
    pub force: bool,
}

impl StopOptions {
    /// Stop with an explicit deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            force: false,
        }
    }

    /// Stop forcibly with the default deadline
    pub fn forced() -> Self {
        Self {
            timeout: None,
            force: true,
        }
    }

    /// Set the force flag
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: ServiceState,
    target_state: Option<ServiceState>,
    healthy: bool,
    last_error: Option<Error>,
    last_applied_config: Option<Value>,
}

/// A single service and its lifecycle
pub struct Service {
    id: Uuid,
    name: String,
    hooks: Arc<dyn ServiceHooks>,
    options: ServiceOptions,
    inner: Mutex<Inner>,
    events: EventBus<ServiceEvent>,
    logger: Logger,
}

impl Service {
    /// Create a service in the `created` state with default options
    pub fn new(name: impl Into<String>, hooks: impl ServiceHooks) -> Self {
        Self::with_options(name, hooks, ServiceOptions::default())
    }

    /// Create a service with explicit options
    pub fn with_options(
        name: impl Into<String>,
        hooks: impl ServiceHooks,
        options: ServiceOptions,
    ) -> Self {
        Self::from_shared(name, Arc::new(hooks), options)
    }

    /// Create a service around hooks that are shared with other owners
    pub fn from_shared(
        name: impl Into<String>,
        hooks: Arc<dyn ServiceHooks>,
        options: ServiceOptions,
    ) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            logger: Logger::new(name.clone(), options.log_level),
            name,
            hooks,
            options,
            inner: Mutex::new(Inner {
                state: ServiceState::Created,
                target_state: None,
                healthy: false,
                last_error: None,
                last_applied_config: None,
            }),
            events: EventBus::new(),
        }
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique id of this instance; a service rebuilt under the same name gets a new one
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Construction-time options
    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Current state
    pub fn state(&self) -> ServiceState {
        self.inner().state
    }

    /// State the last operation was heading for
    pub fn target_state(&self) -> Option<ServiceState> {
        self.inner().target_state
    }

    /// Lifecycle-derived health
    pub fn is_healthy(&self) -> bool {
        self.inner().healthy
    }

    /// Error that put the service into the `error` state
    pub fn last_error(&self) -> Option<Error> {
        self.inner().last_error.clone()
    }

    /// Most recent successfully applied configuration
    pub fn last_applied_config(&self) -> Option<Value> {
        self.inner().last_applied_config.clone()
    }

    /// The service's event bus
    pub fn events(&self) -> &EventBus<ServiceEvent> {
        &self.events
    }

    /// Subscribe to a single event channel
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if event.kind() == kind {
                handler(event);
            }
        })
    }

    /// Current log level
    pub fn log_level(&self) -> LogLevel {
        self.logger.level()
    }

    /// Change the log level
    pub fn set_log_level(&self, level: LogLevel) {
        self.logger.set_level(level);
    }

    /// Apply a configuration
    ///
    /// Allowed from `created`, `configured`, `running` and `stopped`. A
    /// running service is reconfigured in place and returns to `running`;
    /// otherwise the service ends up `configured`.
    pub async fn configure(&self, config: Value) -> Result<()> {
        let previous_state = self
            .enter(
                ServiceState::accepts_configuration,
                ServiceState::Configuring,
                None,
            )
            .map_err(|state| self.rejected(Operation::Configure, state))?;

        let previous = self.inner().last_applied_config.clone();
        self.log(LogLevel::Debug, "applying configuration");

        match self.hooks.configure(&config, previous.as_ref()).await {
            Ok(()) => {
                self.inner().last_applied_config = Some(config);
                if previous_state == ServiceState::Running {
                    self.transition(ServiceState::Running);
                    self.log(LogLevel::Info, "reconfigured while running");
                } else {
                    self.transition(ServiceState::Configured);
                    self.log(LogLevel::Info, "configured");
                }
                Ok(())
            }
            Err(err) => Err(self.fail(Error::hook(Operation::Configure, err))),
        }
    }

    /// Start the service. Allowed from `configured` and `stopped`.
    pub async fn start(&self) -> Result<()> {
        self.enter(
            ServiceState::can_start,
            ServiceState::Starting,
            Some(ServiceState::Running),
        )
        .map_err(|state| self.rejected(Operation::Start, state))?;

        self.log(LogLevel::Debug, "starting");

        match self.hooks.start().await {
            Ok(()) => {
                self.transition(ServiceState::Running);
                self.set_healthy(true);
                self.log(LogLevel::Info, "started");
                Ok(())
            }
            Err(err) => Err(self.fail(Error::hook(Operation::Start, err))),
        }
    }

    /// Stop the service
    ///
    /// Only `running` and `error` services are stopped; in every other state
    /// this returns `Ok(())` without calling the stop hook. The hook is raced
    /// against the deadline from `options` (or the service default). When the
    /// deadline wins the service goes to `error` with a shutdown timeout, or
    /// straight to `stopped` if `options.force` is set. In both cases the
    /// hook future is dropped and never polled again.
    pub async fn stop(&self, options: StopOptions) -> Result<()> {
        if let Err(state) = self.enter(
            ServiceState::can_stop,
            ServiceState::Stopping,
            Some(ServiceState::Stopped),
        ) {
            self.log(
                LogLevel::Debug,
                &format!("stop ignored in state {}", state),
            );
            return Ok(());
        }

        self.set_healthy(false);
        self.log(LogLevel::Debug, "stopping");

        let timeout = options.timeout.unwrap_or(self.options.stop_timeout);
        let outcome = if timeout.is_zero() {
            Ok(self.hooks.stop().await)
        } else {
            async_runtime_compat::timeout(timeout, self.hooks.stop()).await
        };

        match outcome {
            Ok(Ok(())) => {
                self.transition(ServiceState::Stopped);
                self.log(LogLevel::Info, "stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(self.fail(Error::hook(Operation::Stop, err))),
            Err(_) if options.force => {
                self.log(
                    LogLevel::Warn,
                    &format!(
                        "stop hook did not finish within {}ms, forcing stopped",
                        timeout.as_millis()
                    ),
                );
                self.transition(ServiceState::Stopped);
                Ok(())
            }
            Err(_) => Err(self.fail(Error::ShutdownTimeout { timeout })),
        }
    }

    /// Recover from the `error` state
    ///
    /// Runs the custom recovery hook; if it asks for a restart (the default)
    /// the service is moved to `stopped` and started again, and a start
    /// failure is returned as the recovery's failure. `last_error` is only
    /// cleared once the service is running again.
    pub async fn recover(&self) -> Result<()> {
        self.enter(
            ServiceState::can_recover,
            ServiceState::Recovering,
            Some(ServiceState::Running),
        )
        .map_err(|state| self.rejected(Operation::Recover, state))?;

        self.log(LogLevel::Info, "recovering");

        match self.hooks.recover().await {
            Ok(RecoveryStrategy::Recovered) => {
                self.transition(ServiceState::Running);
                self.set_healthy(true);
            }
            Ok(RecoveryStrategy::Restart) => {
                self.transition(ServiceState::Stopped);
                self.start().await?;
            }
            Err(err) => return Err(self.fail(Error::hook(Operation::Recover, err))),
        }

        self.inner().last_error = None;
        self.log(LogLevel::Info, "recovered");
        Ok(())
    }

    /// Destroy the service permanently
    ///
    /// A running service is stopped first, and destruction is abandoned if
    /// that fails. After success the service is `destroyed`, unhealthy, has
    /// no event listeners, and rejects every further operation. Destroying an
    /// already destroyed service is a no-op; destroying one while another
    /// hook is in flight is rejected.
    pub async fn destroy(&self) -> Result<()> {
        let state = self.state();
        if state == ServiceState::Destroyed {
            return Ok(());
        }
        if state.is_transitional() {
            return Err(self.rejected(Operation::Destroy, state));
        }
        if state == ServiceState::Running {
            self.stop(StopOptions::default()).await?;
        }

        match self.enter(
            |state| state != ServiceState::Destroyed && !state.is_transitional(),
            ServiceState::Destroying,
            Some(ServiceState::Destroyed),
        ) {
            Ok(_) => {}
            Err(ServiceState::Destroyed) => return Ok(()),
            Err(state) => return Err(self.rejected(Operation::Destroy, state)),
        }

        self.log(LogLevel::Debug, "destroying");

        match self.hooks.destroy().await {
            Ok(()) => {
                self.transition(ServiceState::Destroyed);
                self.set_healthy(false);
                self.log(LogLevel::Info, "destroyed");
                self.events.clear();
                Ok(())
            }
            Err(err) => Err(self.fail(Error::hook(Operation::Destroy, err))),
        }
    }

    /// Health snapshot merged with the custom health check
    ///
    /// A failing health check marks the report unhealthy and records the
    /// failure in `check_error`; the service's own state and health are left
    /// untouched. Destroyed services are reported without running the check.
    pub async fn health(&self) -> HealthReport {
        let mut report = {
            let inner = self.inner();
            HealthReport {
                name: self.name.clone(),
                state: Some(inner.state),
                healthy: inner.healthy,
                error: inner.last_error.as_ref().map(ToString::to_string),
                check_error: None,
                details: HealthDetails::new(),
                checked_at: Utc::now(),
            }
        };

        if report.state == Some(ServiceState::Destroyed) {
            return report;
        }

        match self.hooks.health_check().await {
            Ok(details) => report.merge(details),
            Err(err) => {
                self.log(LogLevel::Warn, &format!("health check failed: {}", err));
                report.healthy = false;
                report.check_error = Some(err.to_string());
            }
        }
        report
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the gate and enter `next` atomically
    ///
    /// Returns the previous state, or the current state if the gate rejected.
    fn enter(
        &self,
        allowed: impl Fn(ServiceState) -> bool,
        next: ServiceState,
        target: Option<ServiceState>,
    ) -> std::result::Result<ServiceState, ServiceState> {
        let previous = {
            let mut inner = self.inner();
            if !allowed(inner.state) {
                return Err(inner.state);
            }
            if target.is_some() {
                inner.target_state = target;
            }
            std::mem::replace(&mut inner.state, next)
        };
        self.announce(previous, next);
        Ok(previous)
    }

    fn rejected(&self, operation: Operation, state: ServiceState) -> Error {
        let err = Error::InvalidState {
            service: self.name.clone(),
            operation,
            state,
        };
        self.log(LogLevel::Warn, &err.to_string());
        err
    }

    fn transition(&self, next: ServiceState) {
        let previous = std::mem::replace(&mut self.inner().state, next);
        self.announce(previous, next);
    }

    fn announce(&self, old_state: ServiceState, new_state: ServiceState) {
        if old_state == new_state {
            return;
        }
        self.log(
            LogLevel::Debug,
            &format!("state {} -> {}", old_state, new_state),
        );
        self.events.publish(&ServiceEvent::StateChanged {
            old_state,
            new_state,
        });
    }

    fn set_healthy(&self, healthy: bool) {
        let was_healthy = std::mem::replace(&mut self.inner().healthy, healthy);
        if was_healthy != healthy {
            self.events.publish(&ServiceEvent::HealthChanged {
                healthy,
                was_healthy,
            });
        }
    }

    fn fail(&self, error: Error) -> Error {
        let operation = error.operation();
        self.inner().last_error = Some(error.clone());
        self.transition(ServiceState::Error);
        self.set_healthy(false);
        self.log(LogLevel::Error, &error.to_string());
        self.events.publish(&ServiceEvent::Error {
            operation,
            error: error.clone(),
        });
        error
    }

    fn log(&self, level: LogLevel, message: &str) {
        if self.logger.log(level, message) && self.state() != ServiceState::Destroyed {
            self.events.publish(&ServiceEvent::Log {
                level,
                message: message.to_string(),
            });
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("healthy", &inner.healthy)
            .finish()
    }
}
