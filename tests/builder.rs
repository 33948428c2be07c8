//! Engine assembly from configuration.

use std::sync::Arc;

use slotwatch::builders::EngineBuilder;
use slotwatch::config::{EngineConfig, PortalMode};
use slotwatch::core::EngineError;
use slotwatch::infra::{InMemoryCoordinator, MemorySink};

#[test]
fn simulate_mode_builds_with_defaults() {
    let engine = EngineBuilder::new(EngineConfig::default())
        .coordinator(Arc::new(InMemoryCoordinator::new()))
        .sink(Arc::new(MemorySink::new()))
        .build()
        .expect("default config builds");
    assert!(!engine.shutdown_token().is_cancelled());
    assert!(!engine.controls().current().pause_all);
}

#[test]
fn external_portal_requires_a_driver() {
    let mut cfg = EngineConfig::default();
    cfg.session.portal_mode = PortalMode::External;
    let err = EngineBuilder::new(cfg)
        .coordinator(Arc::new(InMemoryCoordinator::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(msg) if msg.contains("external")));
}

#[test]
fn invalid_config_is_rejected_before_wiring() {
    let mut cfg = EngineConfig::default();
    cfg.scheduling.concurrency = 0;
    let err = EngineBuilder::new(cfg).build().unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn local_priority_list_seeds_controls() {
    let mut cfg = EngineConfig::default();
    cfg.scheduling.priority_resources = vec!["Elgin".into()];
    let engine = EngineBuilder::new(cfg)
        .coordinator(Arc::new(InMemoryCoordinator::new()))
        .build()
        .expect("builds");
    assert_eq!(engine.controls().current().priority_resources, vec!["elgin"]);
}

#[test]
fn webhook_sink_is_wired_when_configured() {
    let mut cfg = EngineConfig::default();
    cfg.notify.webhook_url = Some("http://127.0.0.1:9/hook".into());
    cfg.notify.resume_url = Some("https://coord.example.com/resume".into());
    cfg.coordinator.token = "secret".into();
    assert!(EngineBuilder::new(cfg)
        .coordinator(Arc::new(InMemoryCoordinator::new()))
        .build()
        .is_ok());
}
