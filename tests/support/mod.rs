//! Shared fixtures: an engine wired to the in-memory coordinator, the scripted
//! portal, a capturing sink and a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use slotwatch::builders::{Engine, EngineBuilder};
use slotwatch::config::{EngineConfig, PacingAuthority};
use slotwatch::core::{
    ControlsSnapshot, JobId, JobOptions, JobRecord, JobRunner, ResourceHealth, RunnerContext, Slot,
};
use slotwatch::infra::portal::PortalStats;
use slotwatch::infra::{InMemoryCoordinator, MemorySink, SimulatedPortalFactory};
use slotwatch::util::ManualClock;

/// Fixed wall-clock start for every test.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap()
}

/// Config with settle delays removed and assist reminders off.
pub fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.coordinator.worker_id = "test-worker".into();
    cfg.scheduling.poll_secs = 5;
    cfg.scheduling.drain_timeout_secs = 30;
    cfg.session.post_nav_settle_ms = 0;
    cfg.session.click_settle_ms = 0;
    cfg.session.form_backoff_ms = 50;
    cfg.notify.assist_enabled = false;
    cfg
}

/// Same, but with engine-owned pacing so resources may run in parallel.
pub fn engine_paced_config() -> EngineConfig {
    let mut cfg = test_config();
    cfg.pacing.authority = PacingAuthority::Engine;
    cfg.pacing.engine_rps = 50.0;
    cfg.pacing.engine_burst = 50;
    cfg.pacing.resource_rps = 0.0;
    cfg.pacing.jitter_ms = 0;
    cfg
}

pub struct Harness {
    pub coordinator: Arc<InMemoryCoordinator>,
    pub portal: Arc<SimulatedPortalFactory>,
    pub sink: Arc<MemorySink>,
    pub clock: Arc<ManualClock>,
    pub engine: Engine,
}

impl Harness {
    pub fn new(cfg: EngineConfig) -> Self {
        Self::with_portal(cfg, |portal| portal)
    }

    pub fn with_portal(
        cfg: EngineConfig,
        customize: impl FnOnce(SimulatedPortalFactory) -> SimulatedPortalFactory,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let coordinator = Arc::new(InMemoryCoordinator::with_clock(
            clock.clone(),
            chrono::Duration::minutes(5),
        ));
        let portal = Arc::new(customize(SimulatedPortalFactory::new(
            cfg.session.layout.clone(),
            clock.clone(),
        )));
        let sink = Arc::new(MemorySink::new());
        let engine = EngineBuilder::new(cfg)
            .coordinator(coordinator.clone())
            .sessions(portal.clone())
            .sink(sink.clone())
            .clock(clock.clone())
            .build()
            .expect("engine builds");
        Self {
            coordinator,
            portal,
            sink,
            clock,
            engine,
        }
    }

    pub fn runner(&self) -> JobRunner {
        self.engine.runner().clone()
    }

    pub fn context(&self) -> &Arc<RunnerContext> {
        self.engine.runner().context()
    }

    pub fn health(&self) -> &Arc<ResourceHealth> {
        &self.context().health
    }

    pub fn stats(&self) -> Arc<PortalStats> {
        self.portal.stats()
    }

    /// Store `record` in the coordinator and return it as claimed.
    pub fn claimed(&self, record: JobRecord) -> JobRecord {
        self.coordinator.enqueue(record.clone());
        JobRecord {
            status: Some("searching".into()),
            locked_by: Some("test-worker".into()),
            ..record
        }
    }

    pub fn pause(&self, paused: bool) {
        let mut next = ControlsSnapshot::clone(&self.engine.controls().current());
        next.pause_all = paused;
        self.engine.controls().publish(next);
    }

    pub fn events(&self, id: JobId) -> Vec<String> {
        self.coordinator.events(id)
    }

    pub fn last_event(&self, id: JobId) -> String {
        self.coordinator
            .job(id)
            .and_then(|r| r.last_event)
            .unwrap_or_default()
    }
}

/// Position of the first event starting with `prefix`.
pub fn position(events: &[String], prefix: &str) -> Option<usize> {
    events.iter().position(|e| e.starts_with(prefix))
}

pub fn swap_record(id: JobId, reference: &str, resources: &[&str]) -> JobRecord {
    JobRecord {
        id,
        booking_type: Some("swap".into()),
        licence_number: Some(format!("LIC{id:04}XYZ")),
        booking_reference: Some(reference.into()),
        resources: resources.iter().map(|r| (*r).to_string()).collect(),
        status: Some("searching".into()),
        created_at: Some(start()),
        updated_at: Some(start()),
        ..JobRecord::default()
    }
}

pub fn new_booking_record(id: JobId, qualification: &str, resources: &[&str]) -> JobRecord {
    JobRecord {
        booking_type: Some("new".into()),
        booking_reference: None,
        qualification_reference: Some(qualification.into()),
        ..swap_record(id, "", resources)
    }
}

pub fn auto_book(record: JobRecord) -> JobRecord {
    JobRecord {
        options: JobOptions { auto_book: true },
        ..record
    }
}

pub fn slot(resource: &str, date: &str, time: &str) -> Slot {
    Slot {
        resource: resource.into(),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
    }
}
