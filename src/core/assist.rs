//! Reminder loop run after a slot is found but not auto-booked.
//!
//! The portal holds a found slot only briefly. While the window is open the operator
//! is reminded every ping interval, until the job is seen as booked or failed; a
//! final notice is sent if the window closes first.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::board::StatusBoard;
use crate::core::job::{Job, Slot};
use crate::core::notify::{LinkBuilder, Notification, NotificationKind, NotificationSink};

/// Window length and ping interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistSettings {
    /// Whether reminders are sent at all.
    pub enabled: bool,
    /// Total window.
    pub window: Duration,
    /// Gap between reminders.
    pub ping: Duration,
}

impl Default for AssistSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(15 * 60),
            ping: Duration::from_secs(60),
        }
    }
}

/// Everything the monitor needs, cloned out of the runner context.
#[derive(Clone)]
pub struct AssistMonitor {
    /// Timing.
    pub settings: AssistSettings,
    /// Where reminders go.
    pub sink: Arc<dyn NotificationSink>,
    /// Status source.
    pub board: Arc<StatusBoard>,
    /// Links embedded in reminders.
    pub links: LinkBuilder,
    /// Stops the loop early.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AssistMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistMonitor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn time_left(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("Time left: {:02}:{:02}", secs / 60, secs % 60)
}

impl AssistMonitor {
    /// Spawn the reminder loop for `job`/`slot`. Returns `None` when disabled.
    #[must_use]
    pub fn spawn(&self, job: Job, slot: Slot) -> Option<JoinHandle<()>> {
        if !self.settings.enabled {
            return None;
        }
        let monitor = self.clone();
        Some(tokio::spawn(async move { monitor.run(&job, &slot).await }))
    }

    /// Run the loop inline.
    pub async fn run(&self, job: &Job, slot: &Slot) {
        let deadline = Instant::now() + self.settings.window;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.board.is_settled(job.id) {
                debug!(job_id = job.id, "assist window closed by status");
                return;
            }
            self.sink.notify(
                Notification::for_job(NotificationKind::AssistReminder, job)
                    .with_slot(slot)
                    .with_links(&self.links, job)
                    .with_detail(time_left(deadline - now)),
            );
            let wait = self.settings.ping.min(deadline - now);
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = sleep(wait) => {}
            }
        }
        if !self.board.is_settled(job.id) {
            self.sink.notify(
                Notification::for_job(NotificationKind::AssistEnded, job)
                    .with_slot(slot)
                    .with_detail("If not booked, the slot may be gone."),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Utc};
    use parking_lot::Mutex;

    use super::*;
    use crate::core::job::{Credentials, JobMode, JobOptions, JobStatus, Lease};
    use crate::util::clock::ManualClock;

    #[derive(Default)]
    struct Collect(Mutex<Vec<NotificationKind>>);

    impl NotificationSink for Collect {
        fn notify(&self, notification: Notification) {
            self.0.lock().push(notification.kind);
        }
    }

    fn fixture() -> (AssistMonitor, Arc<Collect>, Job, Slot) {
        let sink = Arc::new(Collect::default());
        let monitor = AssistMonitor {
            settings: AssistSettings {
                enabled: true,
                window: Duration::from_secs(300),
                ping: Duration::from_secs(60),
            },
            sink: sink.clone(),
            board: Arc::new(StatusBoard::new(Arc::new(ManualClock::new(Utc::now())))),
            links: LinkBuilder::new("https://p/manage", "https://p/app", None),
            shutdown: CancellationToken::new(),
        };
        let job = Job {
            id: 11,
            mode: JobMode::NewBooking {
                qualification: "Q".into(),
            },
            credentials: Credentials {
                primary: "P".into(),
                email: None,
            },
            resources: vec!["alpha".into()],
            date_window: None,
            time_window: None,
            status: JobStatus::Found,
            last_event: None,
            lease: Lease::default(),
            created_at: None,
            updated_at: None,
            options: JobOptions::default(),
        };
        let slot = Slot {
            resource: "alpha".into(),
            date: NaiveDate::from_ymd_opt(2030, 5, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };
        (monitor, sink, job, slot)
    }

    #[tokio::test(start_paused = true)]
    async fn pings_until_window_ends() {
        let (monitor, sink, job, slot) = fixture();
        monitor.run(&job, &slot).await;
        let kinds = sink.0.lock().clone();
        assert_eq!(kinds.len(), 6);
        assert!(kinds[..5].iter().all(|k| *k == NotificationKind::AssistReminder));
        assert_eq!(kinds[5], NotificationKind::AssistEnded);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_quietly_once_booked() {
        let (monitor, sink, job, slot) = fixture();
        let board = monitor.board.clone();
        let handle = monitor.spawn(job.clone(), slot).unwrap();
        sleep(Duration::from_secs(90)).await;
        board.record(job.id, JobStatus::Booked, "booked");
        handle.await.unwrap();
        let kinds = sink.0.lock().clone();
        assert_eq!(kinds.len(), 2);
        assert!(!kinds.contains(&NotificationKind::AssistEnded));
    }
}
