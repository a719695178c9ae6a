//! Small service stack driven by the service manager
//!
//! Run with: cargo run -p service-orchestration --example stack
//! Set RUST_LOG=debug to see every transition.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use service_lifecycle::{HealthDetails, Service, ServiceHooks};
use service_orchestration::{
    LabelConfigPlugin, ManagerConfig, RegisterOptions, ServiceManager, StopAllOptions,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Pretends to hold a connection pool sized from its configuration
#[derive(Default)]
struct Pool {
    size: AtomicU64,
}

#[async_trait]
impl ServiceHooks for Pool {
    async fn configure(&self, config: &Value, previous: Option<&Value>) -> anyhow::Result<()> {
        let size = config["pool_size"].as_u64().unwrap_or(4);
        if previous.is_some() {
            info!(size, "resizing pool");
        }
        self.size.store(size, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        async_runtime_compat::sleep(Duration::from_millis(20)).await;
        Ok(())
    }

    async fn health_check(&self) -> anyhow::Result<HealthDetails> {
        let mut details = HealthDetails::new();
        details.insert("pool_size".into(), json!(self.size.load(Ordering::SeqCst)));
        Ok(details)
    }
}

const MANAGER_CONFIG: &str = r#"
log_level: info
log_levels:
  api: debug
stop_timeout_ms: 2000
shutdown_timeout_ms: 10000
"#;

const LABELS: &str = r#"
database:
  host: localhost
  port: 5432
  pool_size: 8
"#;

fn main() -> Result<()> {
    smol::block_on(run())
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let manager = ServiceManager::with_config(ManagerConfig::from_yaml_str(MANAGER_CONFIG)?);
    let labels = LabelConfigPlugin::from_yaml_str(LABELS)?;
    manager.attach_plugin(Arc::new(labels.clone()))?;

    let pool = |name: &str| -> anyhow::Result<Service> { Ok(Service::new(name, Pool::default())) };
    manager.register("db", pool, "database", RegisterOptions::default())?;
    manager.register(
        "api",
        pool,
        json!({ "pool_size": 2 }),
        RegisterOptions::depends_on(["db"]),
    )?;
    manager.register(
        "worker",
        pool,
        json!({}),
        RegisterOptions::depends_on(["db", "api"]),
    )?;

    let report = manager.start_all().await?;
    info!("started: {:?}", report.succeeded());

    let outcomes = labels
        .push_label(&manager, "database", json!({ "host": "localhost", "pool_size": 16 }))
        .await;
    info!("label push: {:?}", outcomes);

    for (name, health) in manager.check_health().await {
        info!("{}: {}", name, serde_json::to_string(&health)?);
    }

    let report = manager.stop_all(StopAllOptions::default()).await?;
    info!("stopped: {:?}", report.succeeded());
    Ok(())
}
