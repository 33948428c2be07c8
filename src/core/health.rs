//! Per-resource and global circuit breaker.
//!
//! Every target resource has a failure counter and an optional cooldown. When the
//! counter reaches the threshold the cooldown starts and the counter resets to zero.
//! The reserved [`GLOBAL_KEY`] entry gates every resource at once and is set
//! directly by a challenge wall, independent of the counters.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::util::clock::SharedClock;

/// Reserved key for the global cooldown.
pub const GLOBAL_KEY: &str = "*global*";

/// Breaker parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that trip a resource.
    pub failure_threshold: u32,
    /// Per-resource cooldown length.
    pub cooldown: Duration,
}

/// Health state of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthEntry {
    /// Failures since the last trip.
    pub failures: u32,
    /// End of the active cooldown, if any.
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl HealthEntry {
    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// Thread-safe breaker shared by all job runners.
pub struct ResourceHealth {
    settings: BreakerSettings,
    entries: Mutex<HashMap<String, HealthEntry>>,
    clock: SharedClock,
}

impl ResourceHealth {
    /// Create an empty breaker.
    #[must_use]
    pub fn new(settings: BreakerSettings, clock: SharedClock) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Count a failure for `resource`. Returns `true` if this call started a cooldown.
    pub fn record_failure(&self, resource: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(resource.to_string()).or_default();
        entry.failures += 1;
        if entry.failures >= self.settings.failure_threshold.max(1) {
            entry.failures = 0;
            entry.cooldown_until = Some(now + self.settings.cooldown);
            warn!(
                resource,
                cooldown_secs = self.settings.cooldown.num_seconds(),
                "resource tripped breaker"
            );
            return true;
        }
        false
    }

    /// Clear the failure counter after a clean attempt.
    pub fn record_success(&self, resource: &str) {
        if let Some(entry) = self.entries.lock().get_mut(resource) {
            entry.failures = 0;
        }
    }

    /// Put `resource` into cooldown immediately, regardless of its counter.
    pub fn trip(&self, resource: &str) {
        let until = self.clock.now() + self.settings.cooldown;
        let mut entries = self.entries.lock();
        let entry = entries.entry(resource.to_string()).or_default();
        entry.failures = 0;
        entry.cooldown_until = Some(until);
        warn!(resource, %until, "resource cooldown forced");
    }

    /// Halt interaction with every resource for `duration`.
    ///
    /// An already-running longer global cooldown is kept.
    pub fn trip_global(&self, duration: Duration) {
        let until = self.clock.now() + duration;
        let mut entries = self.entries.lock();
        let entry = entries.entry(GLOBAL_KEY.to_string()).or_default();
        entry.cooldown_until = Some(entry.cooldown_until.map_or(until, |cur| cur.max(until)));
        warn!(%until, "global cooldown started");
    }

    /// End the global cooldown early (operator resume).
    pub fn clear_global(&self) {
        if let Some(entry) = self.entries.lock().get_mut(GLOBAL_KEY) {
            entry.cooldown_until = None;
            info!("global cooldown cleared");
        }
    }

    /// Whether the global cooldown has elapsed.
    #[must_use]
    pub fn global_allowed(&self) -> bool {
        let now = self.clock.now();
        !self
            .entries
            .lock()
            .get(GLOBAL_KEY)
            .is_some_and(|e| e.in_cooldown(now))
    }

    /// Whether `resource` may be attempted now (global and own cooldown both clear).
    #[must_use]
    pub fn is_allowed(&self, resource: &str) -> bool {
        let now = self.clock.now();
        let entries = self.entries.lock();
        let blocked = |key: &str| entries.get(key).is_some_and(|e| e.in_cooldown(now));
        !blocked(GLOBAL_KEY) && !blocked(resource)
    }

    /// When the global cooldown ends, if active.
    #[must_use]
    pub fn global_cooldown_until(&self) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(GLOBAL_KEY)
            .filter(|e| e.in_cooldown(now))
            .and_then(|e| e.cooldown_until)
    }

    /// Copy of the entry for `resource`.
    #[must_use]
    pub fn snapshot(&self, resource: &str) -> HealthEntry {
        self.entries.lock().get(resource).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::util::clock::ManualClock;

    fn breaker(threshold: u32, cooldown_secs: i64) -> (ResourceHealth, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let health = ResourceHealth::new(
            BreakerSettings {
                failure_threshold: threshold,
                cooldown: Duration::seconds(cooldown_secs),
            },
            Arc::new(clock.clone()),
        );
        (health, clock)
    }

    #[test]
    fn trips_after_threshold_and_resets_counter() {
        let (health, clock) = breaker(3, 120);
        assert!(!health.record_failure("north"));
        assert!(!health.record_failure("north"));
        assert_eq!(health.snapshot("north").failures, 2);
        assert!(health.record_failure("north"));
        assert_eq!(health.snapshot("north").failures, 0);
        assert!(!health.is_allowed("north"));
        assert!(health.is_allowed("south"));

        clock.advance(Duration::seconds(119));
        assert!(!health.is_allowed("north"));
        clock.advance(Duration::seconds(1));
        assert!(health.is_allowed("north"));
    }

    #[test]
    fn success_resets_consecutive_count() {
        let (health, _) = breaker(2, 60);
        health.record_failure("north");
        health.record_success("north");
        assert!(!health.record_failure("north"));
        assert!(health.is_allowed("north"));
    }

    #[test]
    fn global_cooldown_blocks_every_resource() {
        let (health, clock) = breaker(10, 60);
        health.trip_global(Duration::minutes(30));
        for resource in ["north", "south", "east"] {
            assert!(!health.is_allowed(resource));
        }
        assert!(!health.global_allowed());
        clock.advance(Duration::minutes(30));
        assert!(health.is_allowed("north"));
        assert!(health.global_allowed());
    }

    #[test]
    fn shorter_global_trip_does_not_shorten_active_one() {
        let (health, clock) = breaker(10, 60);
        health.trip_global(Duration::minutes(30));
        health.trip_global(Duration::minutes(1));
        clock.advance(Duration::minutes(5));
        assert!(!health.global_allowed());
    }

    #[test]
    fn clear_global_resumes_immediately() {
        let (health, _) = breaker(10, 60);
        health.trip_global(Duration::minutes(30));
        health.clear_global();
        assert!(health.global_allowed());
    }

    #[test]
    fn trip_forces_resource_cooldown() {
        let (health, _) = breaker(10, 60);
        health.trip("north");
        assert!(!health.is_allowed("north"));
        assert!(health.global_allowed());
    }

    #[test]
    fn concurrent_failures_trip_exactly_once_per_threshold() {
        let (health, _) = breaker(5, 60);
        let health = Arc::new(health);
        let trips = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let health = Arc::clone(&health);
                let trips = Arc::clone(&trips);
                std::thread::spawn(move || {
                    if health.record_failure("north") {
                        trips.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(trips.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(health.snapshot("north").failures, 0);
    }
}
