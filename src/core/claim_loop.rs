//! Main engine loop: claim, rank, dispatch under a semaphore, repeat.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::coordinator::Coordinator;
use crate::core::health::{ResourceHealth, GLOBAL_KEY};
use crate::core::job::{Job, JobRecord};
use crate::core::runner::{JobRunner, PassOutcome, RESUME_EVENT};
use crate::core::scorer::PriorityScorer;
use crate::util::clock::SharedClock;
use crate::util::telemetry::human_error;

/// Loop tunables.
#[derive(Debug, Clone)]
pub struct ClaimLoopSettings {
    /// Identifier sent with claims.
    pub worker_id: String,
    /// Maximum concurrent runners.
    pub concurrency: usize,
    /// Sleep between idle ticks.
    pub poll_interval: Duration,
    /// Bound on draining in-flight runners at shutdown.
    pub drain_timeout: Duration,
    /// Rank claimed jobs before dispatch.
    pub score_candidates: bool,
}

impl Default for ClaimLoopSettings {
    fn default() -> Self {
        Self {
            worker_id: "worker".into(),
            concurrency: 8,
            poll_interval: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            score_candidates: true,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// This many runners were started.
    Dispatched(usize),
    /// Nothing to do: paused, quiet hours, an empty claim, or a global cooldown with
    /// no resumed job among the claimed ones.
    Idle(&'static str),
    /// Every permit is in use.
    Busy,
    /// Coordinator error; back off one poll interval.
    Backoff,
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Ticks executed.
    pub ticks: u64,
    /// Runners started.
    pub dispatched: u64,
    /// Runners that finished (including drained ones).
    pub completed: u64,
}

/// Claims work and keeps at most `concurrency` runners in flight.
pub struct ClaimLoop {
    runner: JobRunner,
    coordinator: Arc<dyn Coordinator>,
    health: Arc<ResourceHealth>,
    scorer: PriorityScorer,
    settings: ClaimLoopSettings,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    clock: SharedClock,
}

impl std::fmt::Debug for ClaimLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimLoop")
            .field("settings", &self.settings)
            .field("free_permits", &self.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}

impl ClaimLoop {
    /// Loop dispatching to `runner`. Coordinator, breaker, shutdown and clock are
    /// taken from the runner's context.
    #[must_use]
    pub fn new(runner: JobRunner, scorer: PriorityScorer, settings: ClaimLoopSettings) -> Self {
        let ctx = Arc::clone(runner.context());
        Self {
            coordinator: Arc::clone(&ctx.coordinator),
            health: Arc::clone(&ctx.health),
            shutdown: ctx.shutdown.clone(),
            clock: Arc::clone(&ctx.clock),
            semaphore: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            runner,
            scorer,
            settings,
        }
    }

    /// Runner slots not taken by `inflight`.
    #[must_use]
    pub fn free_slots(&self, inflight: &JoinSet<PassOutcome>) -> usize {
        self.settings.concurrency.max(1).saturating_sub(inflight.len())
    }

    fn rank(&self, records: Vec<JobRecord>) -> Vec<JobRecord> {
        if !self.settings.score_candidates || records.len() < 2 {
            return records;
        }
        let now = self.clock.now();
        let mut keyed: Vec<(f64, JobRecord)> = records
            .into_iter()
            .map(|record| {
                // Unrunnable records are dispatched first; they only report and exit.
                let score = Job::try_from(record.clone())
                    .map_or(f64::INFINITY, |job| self.scorer.score(&job, now));
                (score, record)
            })
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        keyed.into_iter().map(|(_, record)| record).collect()
    }

    fn dispatch(&self, inflight: &mut JoinSet<PassOutcome>, record: JobRecord) {
        let runner = self.runner.clone();
        let semaphore = Arc::clone(&self.semaphore);
        inflight.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return PassOutcome::Failed("semaphore closed".into());
            };
            let job_id = record.id;
            match AssertUnwindSafe(runner.run(record)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => runner.report_failure(job_id, "runner panicked").await,
            }
        });
    }

    /// One claim cycle.
    pub async fn tick(&self, inflight: &mut JoinSet<PassOutcome>) -> TickOutcome {
        let ctx = self.runner.context();
        let snapshot = match ctx.controls.refresh(self.coordinator.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %human_error(&err), "controls fetch failed, backing off");
                return TickOutcome::Backoff;
            }
        };
        if snapshot.pause_all {
            return TickOutcome::Idle("paused");
        }
        if snapshot.is_quiet(self.clock.now()) {
            return TickOutcome::Idle("quiet_hours");
        }
        let cooling = !self.health.global_allowed();

        let free = self.free_slots(inflight);
        if free == 0 {
            return TickOutcome::Busy;
        }
        let records = match self.coordinator.claim(free, &self.settings.worker_id).await {
            Ok(records) => records,
            Err(err) => {
                error!(error = %human_error(&err), "claim failed");
                return TickOutcome::Backoff;
            }
        };
        let records = if cooling {
            self.hold_back(records).await
        } else {
            records
        };
        if records.is_empty() {
            return TickOutcome::Idle(if cooling { "global_cooldown" } else { "no_jobs" });
        }

        let records = self.rank(records);
        let count = records.len();
        for record in records {
            debug!(job_id = record.id, "dispatching");
            self.dispatch(inflight, record);
        }
        info!(count, in_flight = inflight.len(), "dispatched");
        TickOutcome::Dispatched(count)
    }

    /// Global cooldown filter: only jobs carrying the resume event go on. One of them
    /// ends the cooldown early; the rest are handed back untouched.
    async fn hold_back(&self, records: Vec<JobRecord>) -> Vec<JobRecord> {
        let (resumed, held): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| r.last_event.as_deref() == Some(RESUME_EVENT));
        for record in &held {
            self.runner
                .hand_back(record.id, format!("cooldown_skip:{GLOBAL_KEY}"))
                .await;
        }
        if !resumed.is_empty() {
            info!(count = resumed.len(), "resume received, lifting global cooldown");
            self.health.clear_global();
        }
        resumed
    }

    fn reap(stats: &mut LoopStats, result: Result<PassOutcome, tokio::task::JoinError>) {
        stats.completed += 1;
        match result {
            Ok(outcome) => debug!(?outcome, "runner finished"),
            Err(err) => error!(error = %err, "runner task aborted"),
        }
    }

    /// Run until the shutdown token fires, then drain in-flight runners.
    pub async fn run(self) -> LoopStats {
        let mut stats = LoopStats::default();
        let mut inflight: JoinSet<PassOutcome> = JoinSet::new();
        info!(
            worker_id = %self.settings.worker_id,
            concurrency = self.settings.concurrency,
            poll_secs = self.settings.poll_interval.as_secs(),
            "claim loop started"
        );

        while !self.shutdown.is_cancelled() {
            while let Some(result) = inflight.try_join_next() {
                Self::reap(&mut stats, result);
            }

            stats.ticks += 1;
            let outcome = self.tick(&mut inflight).await;
            if let TickOutcome::Dispatched(n) = outcome {
                stats.dispatched += u64::try_from(n).unwrap_or(u64::MAX);
            }
            if let TickOutcome::Idle(reason) = outcome {
                debug!(reason, "idle tick");
            }

            let wait_for_runner =
                matches!(outcome, TickOutcome::Dispatched(_) | TickOutcome::Busy) && !inflight.is_empty();
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                Some(result) = inflight.join_next(), if wait_for_runner => Self::reap(&mut stats, result),
                () = sleep(self.settings.poll_interval) => {}
            }
        }

        info!(in_flight = inflight.len(), "shutdown requested, draining runners");
        let drain = async {
            while let Some(result) = inflight.join_next().await {
                Self::reap(&mut stats, result);
            }
        };
        let drained = timeout(self.settings.drain_timeout, drain).await.is_ok();
        if !drained {
            warn!(remaining = inflight.len(), "drain timed out, aborting runners");
            inflight.abort_all();
        }
        info!(?stats, "claim loop stopped");
        stats
    }
}
