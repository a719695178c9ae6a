//! Lifecycle scenarios exercised through the public API

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};
use service_lifecycle::{
    EventKind, HealthDetails, NoopHooks, Operation, RecoveryStrategy, Service, ServiceEvent,
    ServiceHooks, ServiceState, StopOptions,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Stop hook that never completes
struct HangingStop {
    stop_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ServiceHooks for HangingStop {
    async fn stop(&self) -> anyhow::Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        futures::future::pending::<()>().await;
        Ok(())
    }
}

/// Start hook that fails until `healthy` is set
struct FlakyStart {
    healthy: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl ServiceHooks for FlakyStart {
    async fn start(&self) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }
}

/// Recovers in place instead of restarting
struct SelfHealing {
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl ServiceHooks for SelfHealing {
    async fn start(&self) -> anyhow::Result<()> {
        if self.starts.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow!("first start fails"))
        } else {
            Ok(())
        }
    }

    async fn recover(&self) -> anyhow::Result<RecoveryStrategy> {
        Ok(RecoveryStrategy::Recovered)
    }
}

struct ReportingHealth {
    fail: bool,
}

#[async_trait]
impl ServiceHooks for ReportingHealth {
    async fn health_check(&self) -> anyhow::Result<HealthDetails> {
        if self.fail {
            return Err(anyhow!("health endpoint unreachable"));
        }
        let mut details = HealthDetails::new();
        details.insert("connections".to_string(), json!(12));
        Ok(details)
    }
}

struct DestroyRecorder {
    destroyed: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ServiceHooks for DestroyRecorder {
    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

async fn running(service: &Service) {
    service.configure(json!({})).await.unwrap();
    service.start().await.unwrap();
}

#[smol_potat::test]
async fn test_stop_timeout_without_force_enters_error() {
    let stop_calls = Arc::new(AtomicUsize::new(0));
    let service = Service::new(
        "worker",
        HangingStop {
            stop_calls: stop_calls.clone(),
        },
    );
    running(&service).await;

    let started = Instant::now();
    let err = service
        .stop(StopOptions::with_timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(err.is_shutdown_timeout());
    assert!(err.to_string().contains("shutdown"));
    assert_eq!(service.state(), ServiceState::Error);
    assert!(!service.is_healthy());
    assert!(service.last_error().is_some());
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
}

#[smol_potat::test]
async fn test_stop_timeout_with_force_enters_stopped() {
    let service = Service::new(
        "worker",
        HangingStop {
            stop_calls: Arc::new(AtomicUsize::new(0)),
        },
    );
    running(&service).await;

    let started = Instant::now();
    service
        .stop(StopOptions::with_timeout(Duration::from_millis(100)).force(true))
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(service.last_error().is_none());
}

#[smol_potat::test]
async fn test_stop_from_error_state() {
    let healthy = Arc::new(AtomicBool::new(false));
    let service = Service::new(
        "db",
        FlakyStart {
            healthy: healthy.clone(),
            starts: Arc::new(AtomicUsize::new(0)),
        },
    );
    service.configure(json!({})).await.unwrap();
    assert!(service.start().await.is_err());
    assert_eq!(service.state(), ServiceState::Error);

    service.stop(StopOptions::default()).await.unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[smol_potat::test]
async fn test_start_failure_emits_error_event() {
    let service = Service::new(
        "db",
        FlakyStart {
            healthy: Arc::new(AtomicBool::new(false)),
            starts: Arc::new(AtomicUsize::new(0)),
        },
    );
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    service.on(EventKind::Error, move |event| {
        if let ServiceEvent::Error { operation, error } = event {
            sink.lock().unwrap().push((*operation, error.to_string()));
        }
    });

    service.configure(json!({})).await.unwrap();
    let err = service.start().await.unwrap_err();

    assert_eq!(err.to_string(), "start failed: connection refused");
    assert_eq!(
        *errors.lock().unwrap(),
        vec![(Operation::Start, "start failed: connection refused".to_string())]
    );
}

#[smol_potat::test]
async fn test_default_recovery_restarts() {
    let healthy = Arc::new(AtomicBool::new(false));
    let starts = Arc::new(AtomicUsize::new(0));
    let service = Service::new(
        "db",
        FlakyStart {
            healthy: healthy.clone(),
            starts: starts.clone(),
        },
    );
    service.configure(json!({})).await.unwrap();
    assert!(service.start().await.is_err());

    // Recovery forwards the start failure while the dependency is still down
    let err = service.recover().await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(service.state(), ServiceState::Error);
    assert!(service.last_error().is_some());

    healthy.store(true, Ordering::SeqCst);
    service.recover().await.unwrap();

    assert_eq!(service.state(), ServiceState::Running);
    assert!(service.is_healthy());
    assert!(service.last_error().is_none());
    assert_eq!(starts.load(Ordering::SeqCst), 3);
}

#[smol_potat::test]
async fn test_custom_recovery_skips_restart() {
    let starts = Arc::new(AtomicUsize::new(0));
    let service = Service::new(
        "cache",
        SelfHealing {
            starts: starts.clone(),
        },
    );
    service.configure(json!({})).await.unwrap();
    assert!(service.start().await.is_err());

    service.recover().await.unwrap();

    assert_eq!(service.state(), ServiceState::Running);
    assert!(service.is_healthy());
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[smol_potat::test]
async fn test_recover_outside_error_is_rejected() {
    let service = Service::new("cache", NoopHooks);
    running(&service).await;

    let err = service.recover().await.unwrap_err();

    assert!(err.is_invalid_state());
    assert_eq!(service.state(), ServiceState::Running);
}

#[smol_potat::test]
async fn test_destroy_stops_running_service_first() {
    let destroyed = Arc::new(AtomicBool::new(false));
    let stops = Arc::new(AtomicUsize::new(0));
    let service = Service::new(
        "api",
        DestroyRecorder {
            destroyed: destroyed.clone(),
            stops: stops.clone(),
        },
    );
    running(&service).await;

    service.destroy().await.unwrap();

    assert_eq!(service.state(), ServiceState::Destroyed);
    assert!(!service.is_healthy());
    assert!(destroyed.load(Ordering::SeqCst));
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[smol_potat::test]
async fn test_destroy_aborts_when_stop_fails() {
    struct FailingStop {
        destroyed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ServiceHooks for FailingStop {
        async fn stop(&self) -> anyhow::Result<()> {
            Err(anyhow!("socket still busy"))
        }

        async fn destroy(&self) -> anyhow::Result<()> {
            self.destroyed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let destroyed = Arc::new(AtomicBool::new(false));
    let service = Service::new(
        "worker",
        FailingStop {
            destroyed: destroyed.clone(),
        },
    );
    running(&service).await;

    let err = service.destroy().await.unwrap_err();

    assert_eq!(err.operation(), Operation::Stop);
    assert_eq!(service.state(), ServiceState::Error);
    assert!(!destroyed.load(Ordering::SeqCst));

    // From `error` destroy does not stop first
    service.destroy().await.unwrap();
    assert_eq!(service.state(), ServiceState::Destroyed);
    assert!(destroyed.load(Ordering::SeqCst));
}

#[smol_potat::test]
async fn test_destroyed_service_rejects_everything() {
    let service = Service::new("api", NoopHooks);
    running(&service).await;
    service.destroy().await.unwrap();

    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    service.events().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let before = events.load(Ordering::SeqCst);

    assert!(service.configure(json!({})).await.is_err());
    assert!(service.start().await.is_err());
    assert!(service.recover().await.is_err());
    service.stop(StopOptions::default()).await.unwrap();
    service.destroy().await.unwrap();

    assert_eq!(service.state(), ServiceState::Destroyed);
    assert_eq!(service.events().listener_count(), 1);
    assert_eq!(events.load(Ordering::SeqCst), before);
}

#[smol_potat::test]
async fn test_destroy_detaches_listeners() {
    let service = Service::new("api", NoopHooks);
    let rx = service.events().listen();
    service.on(EventKind::StateChanged, |_| {});

    service.destroy().await.unwrap();

    assert_eq!(service.events().listener_count(), 0);
    let mut last = None;
    while let Ok(event) = rx.recv().await {
        last = Some(event);
    }
    assert!(matches!(
        last,
        Some(ServiceEvent::StateChanged {
            new_state: ServiceState::Destroyed,
            ..
        })
    ));
}

#[smol_potat::test]
async fn test_health_merges_custom_check() {
    let service = Service::new("db", ReportingHealth { fail: false });
    running(&service).await;

    let report = service.health().await;

    assert_eq!(report.name, "db");
    assert_eq!(report.state, Some(ServiceState::Running));
    assert!(report.healthy);
    assert_eq!(report.details.get("connections"), Some(&json!(12)));
    assert!(report.check_error.is_none());
}

#[smol_potat::test]
async fn test_failing_health_check_does_not_touch_state() {
    let service = Service::new("db", ReportingHealth { fail: true });
    running(&service).await;

    let report = service.health().await;

    assert!(!report.healthy);
    assert_eq!(report.check_error.as_deref(), Some("health endpoint unreachable"));
    assert_eq!(service.state(), ServiceState::Running);
    assert!(service.is_healthy());
}

#[smol_potat::test]
async fn test_configure_failure_keeps_previous_config() {
    struct RejectsPortZero;

    #[async_trait]
    impl ServiceHooks for RejectsPortZero {
        async fn configure(&self, config: &Value, _previous: Option<&Value>) -> anyhow::Result<()> {
            if config["port"] == json!(0) {
                return Err(anyhow!("port must be non-zero"));
            }
            Ok(())
        }
    }

    let service = Service::new("db", RejectsPortZero);
    service.configure(json!({ "port": 5432 })).await.unwrap();

    let err = service.configure(json!({ "port": 0 })).await.unwrap_err();

    assert_eq!(err.operation(), Operation::Configure);
    assert_eq!(service.state(), ServiceState::Error);
    assert_eq!(service.last_applied_config(), Some(json!({ "port": 5432 })));
}

/// Start and stop hooks that take a while
struct Slow {
    delay: Duration,
}

#[async_trait]
impl ServiceHooks for Slow {
    async fn start(&self) -> anyhow::Result<()> {
        async_runtime_compat::sleep(self.delay).await;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        async_runtime_compat::sleep(self.delay).await;
        Ok(())
    }
}

#[smol_potat::test]
async fn test_operations_rejected_while_start_in_flight() {
    let service = Arc::new(Service::new(
        "api",
        Slow {
            delay: Duration::from_millis(100),
        },
    ));
    service.configure(json!({})).await.unwrap();

    let starting = service.clone();
    let start = smol::spawn(async move { starting.start().await });
    async_runtime_compat::sleep(Duration::from_millis(20)).await;
    assert_eq!(service.state(), ServiceState::Starting);

    let err = service.destroy().await.unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(err.operation(), Operation::Destroy);
    assert!(service.configure(json!({})).await.unwrap_err().is_invalid_state());
    assert!(service.start().await.unwrap_err().is_invalid_state());
    assert!(service.recover().await.unwrap_err().is_invalid_state());
    service.stop(StopOptions::default()).await.unwrap();
    assert_eq!(service.state(), ServiceState::Starting);

    start.await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    assert!(service.is_healthy());

    service.destroy().await.unwrap();
    assert_eq!(service.state(), ServiceState::Destroyed);
    assert!(!service.is_healthy());
}

#[smol_potat::test]
async fn test_destroy_rejected_while_stop_in_flight() {
    let service = Arc::new(Service::new(
        "api",
        Slow {
            delay: Duration::from_millis(100),
        },
    ));
    running(&service).await;

    let stopping = service.clone();
    let stop = smol::spawn(async move { stopping.stop(StopOptions::default()).await });
    async_runtime_compat::sleep(Duration::from_millis(20)).await;
    assert_eq!(service.state(), ServiceState::Stopping);

    assert!(service.destroy().await.unwrap_err().is_invalid_state());

    stop.await.unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);

    service.destroy().await.unwrap();
    assert_eq!(service.state(), ServiceState::Destroyed);
    assert!(service.start().await.unwrap_err().is_invalid_state());
}
