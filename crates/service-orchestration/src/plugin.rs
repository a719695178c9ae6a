//! Configuration plugins
//!
//! A registration whose configuration is a label is resolved by asking each
//! attached [`ConfigPlugin`] in turn; the first one that returns a value wins.
//! [`LabelConfigPlugin`] is the built-in implementation backed by a label
//! table that can be updated at runtime.

use crate::{
    Result,
    manager::{ManagerEvent, RegistrationInfo, ServiceManager, WeakServiceManager},
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use service_lifecycle::{Error as LifecycleError, ServiceEvent, SubscriptionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Resolves configuration labels for the service manager
#[async_trait]
pub trait ConfigPlugin: Send + Sync + 'static {
    /// Unique plugin name
    fn name(&self) -> &str;

    /// Configuration for `label`, or `None` to let the next plugin try
    async fn resolve(
        &self,
        service: &str,
        registration: &RegistrationInfo,
        label: &str,
    ) -> Option<Value>;

    /// Called after the plugin is attached to a manager
    fn attached(&self, manager: &ServiceManager) {
        let _ = manager;
    }

    /// Called after the plugin is detached from a manager
    fn detached(&self, manager: &ServiceManager) {
        let _ = manager;
    }
}

/// Name [`LabelConfigPlugin::new`] registers under
pub const LABEL_PLUGIN_NAME: &str = "labels";

/// Result of pushing a label update to one service
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// The service was reconfigured
    Applied,
    /// The service could not take configuration in its current state; the
    /// update is applied once it can
    Pending,
    /// The configure hook rejected the update
    Failed(LifecycleError),
}

impl PushOutcome {
    /// Whether the update was applied
    pub fn is_applied(&self) -> bool {
        matches!(self, PushOutcome::Applied)
    }

    /// Whether the update is waiting for the service
    pub fn is_pending(&self) -> bool {
        matches!(self, PushOutcome::Pending)
    }
}

#[derive(Default)]
struct LabelState {
    labels: Mutex<HashMap<String, Value>>,
    // keyed by (service, label); a newer push replaces the older value
    pending: Mutex<HashMap<(String, String), Value>>,
    // one event channel per manager the plugin is attached to
    listeners: Mutex<Vec<(WeakServiceManager, SubscriptionId)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LabelState {
    fn pending_for(&self, service: &str) -> Vec<(String, Value)> {
        let mut updates: Vec<(String, Value)> = lock(&self.pending)
            .iter()
            .filter(|((name, _), _)| name == service)
            .map(|((_, label), config)| (label.clone(), config.clone()))
            .collect();
        updates.sort_by(|a, b| a.0.cmp(&b.0));
        updates
    }

    fn set_pending(&self, service: &str, label: &str, config: Value) {
        lock(&self.pending).insert((service.to_string(), label.to_string()), config);
    }

    fn clear_pending(&self, service: &str, label: &str) {
        lock(&self.pending).remove(&(service.to_string(), label.to_string()));
    }

    /// Remove the entry only if no newer push replaced it meanwhile
    fn settle_pending(&self, service: &str, label: &str, applied: &Value) {
        let mut pending = lock(&self.pending);
        let key = (service.to_string(), label.to_string());
        if pending.get(&key) == Some(applied) {
            pending.remove(&key);
        }
    }

    async fn flush(&self, manager: &ServiceManager, service_name: &str) {
        let Some(service) = manager.instance(service_name) else {
            return;
        };

        for (label, config) in self.pending_for(service_name) {
            match service.configure(config.clone()).await {
                Ok(()) => {
                    self.settle_pending(service_name, &label, &config);
                    info!(
                        service = service_name,
                        label = label.as_str(),
                        "Applied pending configuration"
                    );
                }
                Err(err) if err.is_invalid_state() => {
                    debug!(
                        service = service_name,
                        label = label.as_str(),
                        "Service moved on before pending configuration could apply"
                    );
                }
                Err(err) => {
                    warn!(
                        service = service_name,
                        label = label.as_str(),
                        "Pending configuration rejected: {}",
                        err
                    );
                }
            }
        }
    }
}

/// Label table plugin
///
/// Resolves labels from an in-memory table. Updates pushed with
/// [`LabelConfigPlugin::push_label`] reach every constructed service using
/// that label, and are held back for services that cannot take
/// configuration until they reach a state that can.
#[derive(Clone)]
pub struct LabelConfigPlugin {
    name: String,
    state: Arc<LabelState>,
}

impl LabelConfigPlugin {
    /// Empty table registered as [`LABEL_PLUGIN_NAME`]
    pub fn new() -> Self {
        Self::with_name(LABEL_PLUGIN_NAME)
    }

    /// Empty table under a custom plugin name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(LabelState::default()),
        }
    }

    /// Table read from a YAML mapping of label to configuration
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let labels: IndexMap<String, Value> = serde_yaml::from_str(yaml)?;
        let plugin = Self::new();
        for (label, config) in labels {
            plugin.set_label(label, config);
        }
        Ok(plugin)
    }

    /// Set a label's configuration without touching running services
    pub fn set_label(&self, label: impl Into<String>, config: Value) {
        lock(&self.state.labels).insert(label.into(), config);
    }

    /// Current configuration for a label
    pub fn label(&self, label: &str) -> Option<Value> {
        lock(&self.state.labels).get(label).cloned()
    }

    /// Known labels, sorted
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = lock(&self.state.labels).keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Updates waiting for `service`, as (label, configuration) pairs
    pub fn pending_for(&self, service: &str) -> Vec<(String, Value)> {
        self.state.pending_for(service)
    }

    /// Update a label and reconfigure every constructed service using it
    ///
    /// Services that cannot take configuration right now keep the update
    /// pending; it is applied when they next enter a state that accepts
    /// configuration, provided the plugin is attached to `manager`.
    pub async fn push_label(
        &self,
        manager: &ServiceManager,
        label: &str,
        config: Value,
    ) -> IndexMap<String, PushOutcome> {
        self.set_label(label, config.clone());

        let mut outcomes = IndexMap::new();
        for registration in manager.registrations() {
            if registration.config.label() != Some(label) {
                continue;
            }
            let Some(service) = manager.instance(&registration.name) else {
                continue;
            };

            let outcome = match service.configure(config.clone()).await {
                Ok(()) => {
                    self.state.clear_pending(&registration.name, label);
                    PushOutcome::Applied
                }
                Err(err) if err.is_invalid_state() => {
                    debug!(
                        service = registration.name.as_str(),
                        label, "Deferring configuration until the service can accept it"
                    );
                    self.state
                        .set_pending(&registration.name, label, config.clone());
                    PushOutcome::Pending
                }
                Err(err) => {
                    warn!(
                        service = registration.name.as_str(),
                        label, "Configuration push rejected: {}", err
                    );
                    PushOutcome::Failed(err)
                }
            };
            outcomes.insert(registration.name, outcome);
        }
        outcomes
    }
}

impl Default for LabelConfigPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigPlugin for LabelConfigPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(
        &self,
        _service: &str,
        _registration: &RegistrationInfo,
        label: &str,
    ) -> Option<Value> {
        self.label(label)
    }

    fn attached(&self, manager: &ServiceManager) {
        let (id, events) = manager.events().listen_with_id();
        let weak = manager.downgrade();
        lock(&self.state.listeners).push((weak.clone(), id));
        let state = self.state.clone();

        manager.spawner().spawn(Box::pin(async move {
            while let Ok(ManagerEvent { service, event }) = events.recv().await {
                let ServiceEvent::StateChanged { new_state, .. } = event else {
                    continue;
                };
                if !new_state.accepts_configuration() || state.pending_for(&service).is_empty() {
                    continue;
                }
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                state.flush(&manager, &service).await;
            }
        }));
    }

    fn detached(&self, manager: &ServiceManager) {
        let mut listeners = lock(&self.state.listeners);
        listeners.retain(|(weak, id)| match weak.upgrade() {
            Some(attached) if attached.ptr_eq(manager) => {
                attached.events().unsubscribe(*id);
                false
            }
            Some(_) => true,
            None => false,
        });
    }
}
