//! Extension points supplied by concrete services
//!
//! A service implementation overrides only the hooks it needs; every hook
//! has a no-op default. Hooks take `&self`, so implementations that keep
//! mutable state use interior mutability.

use crate::health::HealthDetails;
use async_trait::async_trait;
use serde_json::Value;

/// What [`ServiceHooks::recover`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// The hook restored the service itself; it goes straight to `running`
    Recovered,
    /// No custom recovery; stop the service and start it again
    Restart,
}

/// Lifecycle hooks invoked by [`Service`](crate::Service) at each transition
#[async_trait]
pub trait ServiceHooks: Send + Sync + 'static {
    /// Apply `config`. `previous` is the last successfully applied
    /// configuration, so implementations can apply only what changed.
    async fn configure(&self, config: &Value, previous: Option<&Value>) -> anyhow::Result<()> {
        let _ = (config, previous);
        Ok(())
    }

    /// Bring the service up
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Bring the service down. Raced against the stop deadline.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release everything before the service becomes unusable
    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Custom recovery from the `error` state
    async fn recover(&self) -> anyhow::Result<RecoveryStrategy> {
        Ok(RecoveryStrategy::Restart)
    }

    /// Extra health information merged into the health report
    async fn health_check(&self) -> anyhow::Result<HealthDetails> {
        Ok(HealthDetails::new())
    }
}

/// Hooks that do nothing, for services driven purely by their state machine
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ServiceHooks for NoopHooks {}
