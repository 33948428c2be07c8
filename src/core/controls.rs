//! Immutable control snapshots shared through a `watch` channel.
//!
//! The claim loop and a background watcher publish; runners and sessions only read.
//! A [`PauseGate`] folds the pause flag and the shutdown token into one check that
//! sessions run before every network-visible action.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::quiet_hours::QuietHours;
use crate::core::coordinator::{Coordinator, RemoteControls};
use crate::core::error::{CoordinatorError, SessionError};
use crate::util::telemetry::human_error;

/// One consistent view of the control flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlsSnapshot {
    /// Global kill switch.
    pub pause_all: bool,
    /// Lowercased resource prefixes scanned first.
    pub priority_resources: Vec<String>,
    /// Quiet hours in effect.
    pub quiet_hours: QuietHours,
}

impl ControlsSnapshot {
    /// Local defaults used before the coordinator has answered.
    #[must_use]
    pub fn from_local(priority_resources: &[String], quiet_hours: QuietHours) -> Self {
        Self {
            pause_all: false,
            priority_resources: normalize_prefixes(priority_resources),
            quiet_hours,
        }
    }

    /// Apply a coordinator answer on top of `self`.
    ///
    /// An empty remote priority list keeps the current one; an unparsable quiet-hours
    /// override is logged and ignored.
    #[must_use]
    pub fn merged(&self, remote: &RemoteControls) -> Self {
        let priority = normalize_prefixes(&remote.priority_resources);
        let quiet_hours = match remote.quiet_hours.as_deref().map(str::parse::<QuietHours>) {
            Some(Ok(parsed)) => parsed,
            Some(Err(err)) => {
                warn!(error = %err, "ignoring coordinator quiet hours");
                self.quiet_hours.clone()
            }
            None => self.quiet_hours.clone(),
        };
        Self {
            pause_all: remote.pause_all,
            priority_resources: if priority.is_empty() {
                self.priority_resources.clone()
            } else {
                priority
            },
            quiet_hours,
        }
    }

    /// Whether `now` falls in quiet hours.
    #[must_use]
    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        self.quiet_hours.is_quiet(now)
    }
}

fn normalize_prefixes(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Why work must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Global pause flag set.
    Paused,
    /// Process shutting down.
    Shutdown,
}

impl StopReason {
    /// Breadcrumb reported when a job is handed back for this reason.
    #[must_use]
    pub const fn event(self) -> &'static str {
        match self {
            Self::Paused => "paused:global",
            Self::Shutdown => "paused:shutdown",
        }
    }
}

/// Publisher side of the controls channel.
#[derive(Debug)]
pub struct Controls {
    tx: watch::Sender<Arc<ControlsSnapshot>>,
}

impl Controls {
    /// Channel seeded with `initial`.
    #[must_use]
    pub fn new(initial: ControlsSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Latest snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<ControlsSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Replace the snapshot; receivers are only woken when it actually changed.
    pub fn publish(&self, next: ControlsSnapshot) {
        self.tx.send_if_modified(|current| {
            if **current == next {
                false
            } else {
                if current.pause_all != next.pause_all {
                    info!(pause_all = next.pause_all, "pause flag changed");
                }
                *current = Arc::new(next);
                true
            }
        });
    }

    /// Fetch remote controls and publish the merged snapshot.
    pub async fn refresh(
        &self,
        coordinator: &dyn Coordinator,
    ) -> Result<Arc<ControlsSnapshot>, CoordinatorError> {
        let remote = coordinator.controls().await?;
        self.publish(self.current().merged(&remote));
        Ok(self.current())
    }

    /// New receiver.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ControlsSnapshot>> {
        self.tx.subscribe()
    }

    /// Gate combining this channel with `shutdown`.
    #[must_use]
    pub fn gate(&self, shutdown: CancellationToken) -> PauseGate {
        PauseGate {
            rx: self.subscribe(),
            shutdown,
        }
    }
}

/// Cheap, cloneable stop check.
#[derive(Debug, Clone)]
pub struct PauseGate {
    rx: watch::Receiver<Arc<ControlsSnapshot>>,
    shutdown: CancellationToken,
}

impl PauseGate {
    /// Gate that never stops; for tests and one-off sessions.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(Arc::new(ControlsSnapshot::default()));
        Self {
            rx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reason to stop, shutdown first.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.shutdown.is_cancelled() {
            Some(StopReason::Shutdown)
        } else if self.rx.borrow().pause_all {
            Some(StopReason::Paused)
        } else {
            None
        }
    }

    /// `Err(Paused)` when work must stop before `stage`.
    pub fn check(&self, stage: &str) -> Result<(), SessionError> {
        match self.stop_reason() {
            Some(_) => Err(SessionError::Paused {
                stage: stage.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Latest snapshot seen by this gate.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ControlsSnapshot> {
        Arc::clone(&self.rx.borrow())
    }
}

/// Refresh controls every `interval` until `shutdown`, so pauses land mid-pass.
pub fn spawn_controls_watcher(
    coordinator: Arc<dyn Coordinator>,
    controls: Arc<Controls>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = controls.refresh(coordinator.as_ref()).await {
                        debug!(error = %human_error(&err), "controls refresh failed");
                    }
                }
            }
        }
    })
}
