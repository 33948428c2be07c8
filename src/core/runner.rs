//! Per-job execution: one pass over a job's target resources.
//!
//! A [`JobRunner`] takes a claimed [`JobRecord`], serialises on the job's identity,
//! hands stale or invalid jobs back, then scans the priority resources followed by
//! the remainder. Each resource attempt is checked against the pause gate, the circuit
//! breaker and (under engine pacing) the token buckets. The pass ends with exactly
//! one status report; every intermediate step leaves a breadcrumb event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::assist::{AssistMonitor, AssistSettings};
use crate::core::board::StatusBoard;
use crate::core::controls::{Controls, PauseGate, StopReason};
use crate::core::coordinator::{Coordinator, StatusUpdate};
use crate::core::error::{JobValidationError, SessionError};
use crate::core::health::{ResourceHealth, GLOBAL_KEY};
use crate::core::identity::IdentityMutex;
use crate::core::job::{Job, JobId, JobRecord, JobStatus, Slot};
use crate::core::lease::stale_reclaim;
use crate::core::notify::{LinkBuilder, Notification, NotificationKind, NotificationSink};
use crate::core::rate_limiter::{KeyedRateLimiter, RateLimiter};
use crate::core::scorer::{PriorityScorer, ResourcePlan};
use crate::core::session::{AutomationSession, CommitOutcome, SessionFactory, SessionSettings};
use crate::util::clock::SharedClock;
use crate::util::telemetry::human_error;
use crate::util::ttl_cache::TtlCache;

/// Event that lifts cooldown checks for one pass.
pub const RESUME_EVENT: &str = "resume_now";

/// Tunables for a runner pass.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// `searching` jobs untouched for longer are handed back.
    pub stale_window: chrono::Duration,
    /// Sessions per resource before giving up on it for the pass.
    pub resource_attempts: u32,
    /// Backoff unit between session attempts (multiplied by the attempt number).
    pub retry_backoff: Duration,
    /// Resources checked concurrently inside one job.
    pub parallel_checks: usize,
    /// Global switch for committing found slots.
    pub autobook_enabled: bool,
    /// Consecutive all-layout passes before a job is flagged.
    pub layout_attention_passes: u32,
    /// Global cooldown after a challenge wall.
    pub challenge_cooldown: chrono::Duration,
    /// Priority prefixes used when controls carry none.
    pub priority_resources: Vec<String>,
    /// Reminder loop after a found slot.
    pub assist: AssistSettings,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            stale_window: chrono::Duration::minutes(5),
            resource_attempts: 5,
            retry_backoff: Duration::from_millis(500),
            parallel_checks: 1,
            autobook_enabled: true,
            layout_attention_passes: 3,
            challenge_cooldown: chrono::Duration::minutes(30),
            priority_resources: Vec::new(),
            assist: AssistSettings::default(),
        }
    }
}

/// Shared state and ports used by every runner.
pub struct RunnerContext {
    /// Coordinator port.
    pub coordinator: Arc<dyn Coordinator>,
    /// Page factory.
    pub sessions: Arc<dyn SessionFactory>,
    /// Compiled session settings.
    pub session_settings: Arc<SessionSettings>,
    /// Per-session pacing `(rate, jitter_fraction)`; `None` when the engine paces.
    pub session_pacing: Option<(f64, f64)>,
    /// Engine-wide bucket (disabled under session pacing).
    pub engine_limiter: Arc<RateLimiter>,
    /// Per-resource buckets (disabled under session pacing).
    pub resource_limiter: Arc<KeyedRateLimiter>,
    /// Circuit breaker.
    pub health: Arc<ResourceHealth>,
    /// Identity exclusion.
    pub identities: Arc<IdentityMutex>,
    /// Operator notifications.
    pub notifier: Arc<dyn NotificationSink>,
    /// Link builder for notifications.
    pub links: LinkBuilder,
    /// Control flags.
    pub controls: Arc<Controls>,
    /// Process shutdown.
    pub shutdown: CancellationToken,
    /// Time source for breaker, caches and staleness.
    pub clock: SharedClock,
    /// Last-seen status per job.
    pub board: Arc<StatusBoard>,
    /// Pass tunables.
    pub options: RunnerOptions,
    last_slot: TtlCache<JobId, String>,
    layout_streaks: TtlCache<JobId, u32>,
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("options", &self.options)
            .field("session_pacing", &self.session_pacing)
            .finish_non_exhaustive()
    }
}

impl RunnerContext {
    /// Assemble a context; dedup and streak memory are created here.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        sessions: Arc<dyn SessionFactory>,
        session_settings: Arc<SessionSettings>,
        session_pacing: Option<(f64, f64)>,
        engine_limiter: Arc<RateLimiter>,
        resource_limiter: Arc<KeyedRateLimiter>,
        health: Arc<ResourceHealth>,
        notifier: Arc<dyn NotificationSink>,
        links: LinkBuilder,
        controls: Arc<Controls>,
        shutdown: CancellationToken,
        clock: SharedClock,
        options: RunnerOptions,
    ) -> Self {
        let day = chrono::Duration::hours(24);
        Self {
            coordinator,
            sessions,
            session_settings,
            session_pacing,
            engine_limiter,
            resource_limiter,
            health,
            identities: Arc::new(IdentityMutex::new()),
            notifier,
            links,
            board: Arc::new(StatusBoard::new(Arc::clone(&clock))),
            last_slot: TtlCache::new(day, 10_000, Arc::clone(&clock)),
            layout_streaks: TtlCache::new(day, 10_000, Arc::clone(&clock)),
            controls,
            shutdown,
            clock,
            options,
        }
    }

    /// Stop check bound to this context.
    #[must_use]
    pub fn gate(&self) -> PauseGate {
        self.controls.gate(self.shutdown.clone())
    }

    fn session_pacer(&self) -> Arc<RateLimiter> {
        Arc::new(
            self.session_pacing
                .map_or_else(RateLimiter::disabled, |(rate, jitter)| {
                    RateLimiter::paced(rate, jitter)
                }),
        )
    }

    fn assist_monitor(&self) -> AssistMonitor {
        AssistMonitor {
            settings: self.options.assist,
            sink: Arc::clone(&self.notifier),
            board: Arc::clone(&self.board),
            links: self.links.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Paused or shutting down; job handed back.
    Stopped(StopReason),
    /// Stale lease reclaimed.
    Stale,
    /// Record failed validation.
    Invalid(JobValidationError),
    /// Nothing available this round.
    NoSlots,
    /// Same slot as last time; not re-reported.
    Unchanged(Slot),
    /// New slot reported as found.
    Found(Slot),
    /// Slot committed.
    Booked {
        /// Committed slot.
        slot: Slot,
        /// Confirmation code, if extracted.
        confirmation: Option<String>,
    },
    /// Commit attempted and failed.
    BookingFailed(Slot),
    /// Challenge wall; global cooldown engaged.
    Challenge,
    /// Traffic block on a resource.
    Blocked(String),
    /// Every resource kept failing on layout for too many passes.
    NeedsAttention,
    /// The runner failed unexpectedly; reported as `error:<msg>`.
    Failed(String),
}

enum ResourceResult {
    Slots(Vec<Slot>),
    Empty,
    Skipped,
    Layout,
    Stopped(StopReason),
    Challenge,
    Blocked,
}

enum Halt {
    Stopped(StopReason),
    Challenge(String),
    Blocked(String),
}

#[derive(Default)]
struct PassState {
    found: Mutex<Option<Slot>>,
    halt: Mutex<Option<Halt>>,
    last_checked: Mutex<Option<String>>,
    attempted: AtomicUsize,
    layout_skips: AtomicUsize,
}

impl PassState {
    fn should_stop(&self) -> bool {
        self.found.lock().is_some() || self.halt.lock().is_some()
    }

    fn halt(&self, reason: Halt) {
        let mut halt = self.halt.lock();
        if halt.is_none() {
            *halt = Some(reason);
        }
    }

    fn offer(&self, slot: Slot) {
        let mut found = self.found.lock();
        if found.is_none() {
            *found = Some(slot);
        }
    }

    fn last_checked(&self) -> String {
        self.last_checked.lock().clone().unwrap_or_default()
    }

    fn take_halt(&self) -> Option<Halt> {
        self.halt.lock().take()
    }

    fn take_found(&self) -> Option<Slot> {
        self.found.lock().take()
    }
}

/// Executes passes for claimed jobs.
#[derive(Debug, Clone)]
pub struct JobRunner {
    ctx: Arc<RunnerContext>,
}

impl JobRunner {
    /// Runner over a shared context.
    #[must_use]
    pub const fn new(ctx: Arc<RunnerContext>) -> Self {
        Self { ctx }
    }

    /// Shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<RunnerContext> {
        &self.ctx
    }

    async fn event(&self, job_id: JobId, event: &str) {
        if let Err(err) = self.ctx.coordinator.post_event(job_id, event).await {
            warn!(job_id, event, error = %human_error(&err), "event report failed");
        }
    }

    async fn report(&self, job_id: JobId, update: StatusUpdate) {
        if let Some(status) = update.status {
            self.ctx.board.record(job_id, status, &update.event);
        }
        info!(job_id, status = ?update.status, event = %update.event, "job status");
        if let Err(err) = self.ctx.coordinator.set_status(job_id, &update).await {
            error!(job_id, event = %update.event, error = %human_error(&err), "status report failed");
        }
    }

    async fn requeue(&self, job_id: JobId, event: impl Into<String>) {
        self.report(job_id, StatusUpdate::new(JobStatus::Queued, event))
            .await;
    }

    /// Run one pass for a claimed record. Never fails: every outcome, including
    /// unexpected ones, ends as a status report.
    pub async fn run(&self, record: JobRecord) -> PassOutcome {
        let job_id = record.id;
        self.ctx.board.observe(&record);

        if let Some(reason) = self.ctx.gate().stop_reason() {
            self.requeue(job_id, reason.event()).await;
            return PassOutcome::Stopped(reason);
        }

        let identity = record.identity_key();
        let _guard = self.ctx.identities.lock(&identity).await;
        debug!(job_id, identity = %identity, "identity lock held");

        if let Some(event) = stale_reclaim(&record, self.ctx.clock.now(), self.ctx.options.stale_window) {
            self.requeue(job_id, event).await;
            return PassOutcome::Stale;
        }

        let job = match Job::try_from(record) {
            Ok(job) => Arc::new(job),
            Err(err) => {
                info!(job_id, reason = %err, "job not runnable");
                self.requeue(job_id, err.to_string()).await;
                return PassOutcome::Invalid(err);
            }
        };

        self.run_pass(job).await
    }

    /// Return a claimed job to `queued` without running it.
    pub async fn hand_back(&self, job_id: JobId, event: impl Into<String>) {
        self.requeue(job_id, event).await;
    }

    /// Hand a job back after an unexpected failure outside the normal pass flow.
    pub async fn report_failure(&self, job_id: JobId, message: &str) -> PassOutcome {
        error!(job_id, error = message, "runner failed");
        self.requeue(job_id, format!("error:{message}")).await;
        PassOutcome::Failed(message.to_string())
    }

    fn plan(&self, job: &Job) -> ResourcePlan {
        let snapshot = self.ctx.controls.current();
        let prefixes = if snapshot.priority_resources.is_empty() {
            &self.ctx.options.priority_resources
        } else {
            &snapshot.priority_resources
        };
        let mut plan = PriorityScorer::plan_resources(job, prefixes);
        if plan.is_empty() {
            plan.remainder.push("(no resource provided)".to_string());
        }
        plan
    }

    async fn run_pass(&self, job: Arc<Job>) -> PassOutcome {
        let plan = self.plan(&job);
        let resume_override = job.last_event.as_deref() == Some(RESUME_EVENT)
            || self.ctx.board.last_event(job.id).as_deref() == Some(RESUME_EVENT);
        if resume_override {
            info!(job_id = job.id, "resume override: cooldowns ignored this pass");
        }
        info!(
            job_id = job.id,
            mode = job.mode.label(),
            priority = plan.priority.len(),
            remainder = plan.remainder.len(),
            "pass started"
        );

        let pass = Arc::new(PassState::default());
        self.scan(&job, plan.priority, resume_override, &pass).await;
        if !pass.should_stop() {
            self.scan(&job, plan.remainder, resume_override, &pass).await;
        }

        self.conclude(&job, &pass).await
    }

    async fn scan(&self, job: &Arc<Job>, resources: Vec<String>, resume_override: bool, pass: &Arc<PassState>) {
        if resources.is_empty() || pass.should_stop() {
            return;
        }
        let parallel = if self.ctx.session_pacing.is_some() {
            1
        } else {
            self.ctx.options.parallel_checks.clamp(1, resources.len())
        };
        let mut pending = resources.into_iter();
        let mut inflight = FuturesUnordered::new();
        for resource in pending.by_ref().take(parallel) {
            inflight.push(self.clone().check_one(Arc::clone(job), resource, resume_override, Arc::clone(pass)));
        }
        while inflight.next().await.is_some() {
            if let Some(resource) = pending.next() {
                inflight.push(self.clone().check_one(Arc::clone(job), resource, resume_override, Arc::clone(pass)));
            }
        }
    }

    async fn check_one(self, job: Arc<Job>, resource: String, resume_override: bool, pass: Arc<PassState>) {
        if pass.should_stop() {
            return;
        }
        if let Some(reason) = self.ctx.gate().stop_reason() {
            pass.halt(Halt::Stopped(reason));
            return;
        }
        *pass.last_checked.lock() = Some(resource.clone());
        self.event(job.id, &format!("trying:{resource}")).await;

        match self.check_resource(&job, &resource, resume_override).await {
            ResourceResult::Slots(slots) => {
                pass.attempted.fetch_add(1, Ordering::SeqCst);
                if let Some(best) = slots.into_iter().min_by_key(|s| (s.date, s.time)) {
                    pass.offer(best);
                }
            }
            ResourceResult::Empty => {
                pass.attempted.fetch_add(1, Ordering::SeqCst);
            }
            ResourceResult::Skipped => {}
            ResourceResult::Layout => {
                pass.attempted.fetch_add(1, Ordering::SeqCst);
                pass.layout_skips.fetch_add(1, Ordering::SeqCst);
            }
            ResourceResult::Stopped(reason) => pass.halt(Halt::Stopped(reason)),
            ResourceResult::Challenge => pass.halt(Halt::Challenge(resource)),
            ResourceResult::Blocked => pass.halt(Halt::Blocked(resource)),
        }
    }

    async fn check_resource(&self, job: &Job, resource: &str, resume_override: bool) -> ResourceResult {
        let ctx = &self.ctx;
        if !resume_override {
            if !ctx.health.global_allowed() {
                self.event(job.id, &format!("cooldown_skip:{GLOBAL_KEY}")).await;
                return ResourceResult::Skipped;
            }
            if !ctx.health.is_allowed(resource) {
                self.event(job.id, &format!("cooldown_skip:{resource}")).await;
                return ResourceResult::Skipped;
            }
        }

        ctx.engine_limiter.acquire_with_jitter().await;
        ctx.resource_limiter.acquire(resource).await;

        let gate = ctx.gate();
        let attempts = ctx.options.resource_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(reason) = gate.stop_reason() {
                return ResourceResult::Stopped(reason);
            }
            let err = match self.session_check(job, resource, &gate).await {
                Ok(slots) => {
                    ctx.health.record_success(resource);
                    let count = slots.len();
                    let wanted: Vec<Slot> = slots.into_iter().filter(|s| job.accepts(s)).collect();
                    let event = if count == 0 {
                        format!("checked:{resource} · no_slots")
                    } else {
                        format!("checked:{resource} · {count} slots")
                    };
                    self.event(job.id, &event).await;
                    return if wanted.is_empty() {
                        ResourceResult::Empty
                    } else {
                        ResourceResult::Slots(wanted)
                    };
                }
                Err(err) => err,
            };

            let policy = err.policy();
            match &err {
                SessionError::Paused { .. } => {
                    return ResourceResult::Stopped(
                        gate.stop_reason().unwrap_or(StopReason::Paused),
                    );
                }
                SessionError::DefensiveSignal { stage } => {
                    warn!(job_id = job.id, resource, stage = %stage, "challenge wall, engaging global cooldown");
                    if policy.counts_failure {
                        ctx.health.record_failure(resource);
                    }
                    if policy.trips_global {
                        ctx.health.trip_global(ctx.options.challenge_cooldown);
                    }
                    if policy.notify {
                        ctx.notifier.notify(
                            Notification::for_job(NotificationKind::ChallengeRequired, job)
                                .with_resource(resource)
                                .with_links(&ctx.links, job)
                                .with_detail(
                                    "Complete the verification in the portal, then use the resume link.",
                                ),
                        );
                    }
                    self.event(job.id, &format!("captcha_cooldown:{resource}")).await;
                    return ResourceResult::Challenge;
                }
                SessionError::Blocked { stage } => {
                    warn!(job_id = job.id, resource, stage = %stage, "traffic block, cooling resource");
                    if policy.trips_resource {
                        ctx.health.trip(resource);
                    }
                    self.event(job.id, &format!("blocked_cooldown:{resource}")).await;
                    return ResourceResult::Blocked;
                }
                SessionError::LayoutIssue(msg) => {
                    warn!(job_id = job.id, resource, issue = %msg, "layout issue, skipping resource");
                    self.event(job.id, &format!("layout_issue:{resource}")).await;
                    return ResourceResult::Layout;
                }
                SessionError::ServiceClosed { .. }
                | SessionError::Timeout { .. }
                | SessionError::Driver(_) => {
                    if policy.counts_failure && ctx.health.record_failure(resource) {
                        warn!(job_id = job.id, resource, attempt, "resource breaker tripped");
                        return ResourceResult::Empty;
                    }
                    if !policy.retry_in_pass || attempt == attempts {
                        warn!(
                            job_id = job.id,
                            resource,
                            error = %human_error(&err),
                            attempts,
                            "giving up on resource for this pass"
                        );
                        return ResourceResult::Empty;
                    }
                    debug!(job_id = job.id, resource, attempt, error = %err, "retrying resource");
                    tokio::time::sleep(ctx.options.retry_backoff * attempt).await;
                }
            }
        }
        ResourceResult::Empty
    }

    async fn open_session(&self, job: &Job, resource: &str, gate: &PauseGate) -> Result<AutomationSession, SessionError> {
        let page = self.ctx.sessions.open(job, Some(resource)).await?;
        Ok(AutomationSession::new(
            page,
            Arc::clone(&self.ctx.session_settings),
            self.ctx.session_pacer(),
            gate.clone(),
            job.id,
        ))
    }

    async fn session_check(&self, job: &Job, resource: &str, gate: &PauseGate) -> Result<Vec<Slot>, SessionError> {
        let mut session = self.open_session(job, resource, gate).await?;
        let result = async {
            self.event(job.id, &format!("login_start:{resource}")).await;
            session.login(job).await?;
            self.event(job.id, &format!("login_ok:{resource}")).await;
            session.read_availability(resource).await
        }
        .await;
        session.close().await;
        result
    }

    async fn commit(&self, job: &Job, slot: &Slot) -> Result<CommitOutcome, SessionError> {
        let gate = self.ctx.gate();
        let mut session = self.open_session(job, &slot.resource, &gate).await?;
        let result = async {
            session.login(job).await?;
            session.commit(job, slot).await
        }
        .await;
        session.close().await;
        result
    }

    async fn conclude(&self, job: &Job, pass: &PassState) -> PassOutcome {
        let last = pass.last_checked();
        let halt = pass.take_halt();
        let found = pass.take_found();

        let stop = match &halt {
            Some(Halt::Stopped(reason)) => Some(*reason),
            _ => self.ctx.gate().stop_reason(),
        };
        if let Some(reason) = stop {
            self.requeue(job.id, reason.event()).await;
            return PassOutcome::Stopped(reason);
        }
        match halt {
            Some(Halt::Challenge(resource)) => {
                self.requeue(job.id, format!("captcha_cooldown:{resource}")).await;
                return PassOutcome::Challenge;
            }
            Some(Halt::Blocked(resource)) => {
                self.requeue(job.id, format!("blocked_cooldown:{resource}")).await;
                return PassOutcome::Blocked(resource);
            }
            _ => {}
        }

        let Some(slot) = found else {
            return self
                .conclude_empty(
                    job,
                    &last,
                    pass.attempted.load(Ordering::SeqCst),
                    pass.layout_skips.load(Ordering::SeqCst),
                )
                .await;
        };
        self.ctx.layout_streaks.remove(&job.id);

        let signature = slot.signature();
        if self.ctx.last_slot.get(&job.id).as_deref() == Some(signature.as_str()) {
            self.requeue(job.id, format!("slot_unchanged:{last}")).await;
            return PassOutcome::Unchanged(slot);
        }
        self.ctx.last_slot.insert(job.id, signature);

        if self.ctx.options.autobook_enabled && job.options.auto_book {
            return self.auto_book(job, slot).await;
        }

        info!(job_id = job.id, resource = %slot.resource, slot = %slot, "slot found");
        self.report(
            job.id,
            StatusUpdate::new(JobStatus::Found, format!("slot_found:{} · {slot}", slot.resource))
                .with_slot(slot.clone()),
        )
        .await;
        self.ctx.notifier.notify(
            Notification::for_job(NotificationKind::SlotFound, job)
                .with_slot(&slot)
                .with_links(&self.ctx.links, job)
                .with_detail("Act now: open the portal to confirm."),
        );
        let _ = self.ctx.assist_monitor().spawn(job.clone(), slot.clone());
        PassOutcome::Found(slot)
    }

    async fn conclude_empty(&self, job: &Job, last: &str, attempted: usize, layout_skips: usize) -> PassOutcome {
        if attempted > 0 && layout_skips == attempted {
            let streak = self.ctx.layout_streaks.get(&job.id).unwrap_or(0) + 1;
            if streak >= self.ctx.options.layout_attention_passes {
                self.ctx.layout_streaks.remove(&job.id);
                warn!(job_id = job.id, streak, "layout keeps failing, flagging job");
                self.requeue(job.id, "needs_attention:layout_changed").await;
                self.ctx.notifier.notify(
                    Notification::for_job(NotificationKind::NeedsAttention, job)
                        .with_resource(last)
                        .with_links(&self.ctx.links, job)
                        .with_detail(format!("Login form not found on {streak} consecutive passes.")),
                );
                return PassOutcome::NeedsAttention;
            }
            self.ctx.layout_streaks.insert(job.id, streak);
            self.requeue(job.id, format!("layout_changed:{last}")).await;
            return PassOutcome::NoSlots;
        }
        if attempted > 0 {
            self.ctx.layout_streaks.remove(&job.id);
        }
        self.requeue(job.id, format!("no_slots_this_round:{last}")).await;
        PassOutcome::NoSlots
    }

    async fn auto_book(&self, job: &Job, slot: Slot) -> PassOutcome {
        info!(job_id = job.id, slot = %slot, "auto-booking");
        match self.commit(job, &slot).await {
            Ok(CommitOutcome::Booked { confirmation }) => {
                self.report(
                    job.id,
                    StatusUpdate::new(JobStatus::Booked, format!("booked:{slot}"))
                        .with_slot(slot.clone())
                        .with_confirmation(confirmation.clone()),
                )
                .await;
                let mut note = Notification::for_job(NotificationKind::Booked, job).with_slot(&slot);
                if let Some(code) = &confirmation {
                    note = note.with_detail(format!("Confirmation: {code}"));
                }
                self.ctx.notifier.notify(note);
                PassOutcome::Booked { slot, confirmation }
            }
            outcome => {
                let detail = match &outcome {
                    Ok(_) => "no confirmation shown".to_string(),
                    Err(err) => human_error(err),
                };
                if let Err(SessionError::DefensiveSignal { .. }) = &outcome {
                    self.ctx.health.trip_global(self.ctx.options.challenge_cooldown);
                }
                warn!(job_id = job.id, slot = %slot, detail = %detail, "auto-book failed");
                self.report(
                    job.id,
                    StatusUpdate::new(JobStatus::Failed, format!("booking_failed:{slot}"))
                        .with_slot(slot.clone()),
                )
                .await;
                self.ctx.notifier.notify(
                    Notification::for_job(NotificationKind::BookingFailed, job)
                        .with_slot(&slot)
                        .with_links(&self.ctx.links, job)
                        .with_detail(detail),
                );
                PassOutcome::BookingFailed(slot)
            }
        }
    }
}
