//! In-process coordinator: a job table plus a timeline of everything reported.
//!
//! Used by the binary when no `API_BASE` is configured and by tests to script claims
//! and assert on breadcrumbs.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;

use crate::core::coordinator::{Coordinator, RemoteControls, StatusUpdate};
use crate::core::error::CoordinatorError;
use crate::core::job::{JobId, JobRecord, JobStatus};
use crate::util::clock::{system_clock, SharedClock};

/// One entry of the report timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// `post_event` call.
    Event {
        /// Job.
        job_id: JobId,
        /// Breadcrumb.
        event: String,
    },
    /// `set_status` call.
    Status {
        /// Job.
        job_id: JobId,
        /// Update as sent.
        update: StatusUpdate,
    },
}

impl Report {
    /// Job concerned.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Event { job_id, .. } | Self::Status { job_id, .. } => *job_id,
        }
    }

    /// Breadcrumb carried by either kind.
    #[must_use]
    pub fn event(&self) -> &str {
        match self {
            Self::Event { event, .. } => event,
            Self::Status { update, .. } => &update.event,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<JobId, JobRecord>,
    queue: VecDeque<JobId>,
    timeline: Vec<Report>,
    controls: RemoteControls,
    claims: Vec<usize>,
    fail_claims: bool,
    fail_controls: bool,
    requeue_on_report: bool,
}

/// [`Coordinator`] backed by memory.
///
/// A claim stamps the lease (`locked_by`, `lease_expires_at`, `updated_at`). Jobs
/// still `searching` after their lease lapsed are offered again as they are, the way
/// a coordinator re-offers work abandoned by a dead worker.
pub struct InMemoryCoordinator {
    state: Mutex<State>,
    clock: SharedClock,
    lease: Duration,
}

impl std::fmt::Debug for InMemoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCoordinator")
            .field("state", &self.state)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryCoordinator {
    fn default() -> Self {
        Self::with_clock(system_clock(), Duration::minutes(5))
    }
}

impl InMemoryCoordinator {
    /// Empty coordinator on the system clock. Jobs reported back as `queued` are not
    /// re-offered unless [`Self::set_requeue`] is enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty coordinator granting `lease`-long leases measured on `clock`.
    #[must_use]
    pub fn with_clock(clock: SharedClock, lease: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            lease,
        }
    }

    /// Add a record to the claimable queue.
    pub fn enqueue(&self, record: JobRecord) {
        let mut state = self.state.lock();
        let id = record.id;
        state.jobs.insert(id, record);
        if !state.queue.contains(&id) {
            state.queue.push_back(id);
        }
    }

    /// Re-offer jobs reported back as `queued`, like a real coordinator would.
    pub fn set_requeue(&self, enabled: bool) {
        self.state.lock().requeue_on_report = enabled;
    }

    /// Replace the served controls.
    pub fn set_controls(&self, controls: RemoteControls) {
        self.state.lock().controls = controls;
    }

    /// Toggle the pause flag only.
    pub fn set_paused(&self, paused: bool) {
        self.state.lock().controls.pause_all = paused;
    }

    /// Make `claim` fail with a transport error.
    pub fn fail_claims(&self, fail: bool) {
        self.state.lock().fail_claims = fail;
    }

    /// Make `controls` fail with a transport error.
    pub fn fail_controls(&self, fail: bool) {
        self.state.lock().fail_controls = fail;
    }

    /// Current stored record.
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.state.lock().jobs.get(&id).cloned()
    }

    /// Current stored status.
    #[must_use]
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.job(id).and_then(|r| r.parsed_status())
    }

    /// Everything reported so far, in order.
    #[must_use]
    pub fn timeline(&self) -> Vec<Report> {
        self.state.lock().timeline.clone()
    }

    /// Breadcrumbs for one job, in order.
    #[must_use]
    pub fn events(&self, id: JobId) -> Vec<String> {
        self.state
            .lock()
            .timeline
            .iter()
            .filter(|r| r.job_id() == id)
            .map(|r| r.event().to_string())
            .collect()
    }

    /// Status updates for one job, in order.
    #[must_use]
    pub fn status_updates(&self, id: JobId) -> Vec<StatusUpdate> {
        self.state
            .lock()
            .timeline
            .iter()
            .filter_map(|r| match r {
                Report::Status { job_id, update } if *job_id == id => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    /// `limit` of every claim call so far.
    #[must_use]
    pub fn claim_limits(&self) -> Vec<usize> {
        self.state.lock().claims.clone()
    }

    /// Jobs still waiting to be claimed.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

#[async_trait]
impl Coordinator for InMemoryCoordinator {
    async fn claim(&self, limit: usize, worker_id: &str) -> Result<Vec<JobRecord>, CoordinatorError> {
        let mut state = self.state.lock();
        if state.fail_claims {
            return Err(CoordinatorError::Transport("claim unavailable".into()));
        }
        state.claims.push(limit);
        let now = self.clock.now();
        let expires = now + self.lease;
        let mut claimed = Vec::new();
        while claimed.len() < limit {
            let Some(id) = state.queue.pop_front() else {
                break;
            };
            if let Some(record) = state.jobs.get_mut(&id) {
                record.status = Some(JobStatus::Searching.as_str().to_string());
                record.locked_by = Some(worker_id.to_string());
                record.lease_expires_at = Some(expires);
                record.updated_at = Some(now);
                claimed.push(record.clone());
            }
        }
        let abandoned = state
            .jobs
            .values_mut()
            .filter(|r| {
                r.parsed_status() == Some(JobStatus::Searching)
                    && r.lease_expires_at.is_some_and(|at| at <= now)
            })
            .take(limit - claimed.len());
        for record in abandoned {
            record.locked_by = Some(worker_id.to_string());
            record.lease_expires_at = Some(expires);
            claimed.push(record.clone());
        }
        Ok(claimed)
    }

    async fn controls(&self) -> Result<RemoteControls, CoordinatorError> {
        let state = self.state.lock();
        if state.fail_controls {
            return Err(CoordinatorError::Transport("controls unavailable".into()));
        }
        Ok(state.controls.clone())
    }

    async fn post_event(&self, job_id: JobId, event: &str) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        let record = state
            .jobs
            .get_mut(&job_id)
            .ok_or(CoordinatorError::JobNotFound(job_id))?;
        record.last_event = Some(event.to_string());
        state.timeline.push(Report::Event {
            job_id,
            event: event.to_string(),
        });
        Ok(())
    }

    async fn set_status(&self, job_id: JobId, update: &StatusUpdate) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock();
        let requeue = state.requeue_on_report;
        let record = state
            .jobs
            .get_mut(&job_id)
            .ok_or(CoordinatorError::JobNotFound(job_id))?;
        record.last_event = Some(update.event.clone());
        if let Some(status) = update.status {
            record.status = Some(status.as_str().to_string());
            if status != JobStatus::Searching {
                record.locked_by = None;
            }
        }
        state.timeline.push(Report::Status {
            job_id,
            update: update.clone(),
        });
        if requeue && update.status == Some(JobStatus::Queued) && !state.queue.contains(&job_id) {
            state.queue.push_back(job_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::util::clock::{Clock, ManualClock};

    fn record(id: JobId) -> JobRecord {
        JobRecord {
            id,
            status: Some("queued".into()),
            ..JobRecord::default()
        }
    }

    #[tokio::test]
    async fn claim_marks_searching_and_respects_limit() {
        let coord = InMemoryCoordinator::new();
        for id in 1..=3 {
            coord.enqueue(record(id));
        }
        let claimed = coord.claim(2, "w1").await.unwrap();
        assert_eq!(claimed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(coord.status(1), Some(JobStatus::Searching));
        assert_eq!(coord.job(1).unwrap().locked_by.as_deref(), Some("w1"));
        assert_eq!(coord.queued(), 1);
        assert_eq!(coord.claim_limits(), vec![2]);
    }

    #[tokio::test]
    async fn reports_are_recorded_in_order() {
        let coord = InMemoryCoordinator::new();
        coord.enqueue(record(5));
        coord.post_event(5, "trying:Elgin").await.unwrap();
        coord
            .set_status(5, &StatusUpdate::new(JobStatus::Queued, "no_slots_this_round:Elgin"))
            .await
            .unwrap();
        assert_eq!(coord.events(5), vec!["trying:Elgin", "no_slots_this_round:Elgin"]);
        assert_eq!(coord.status(5), Some(JobStatus::Queued));
        assert!(coord.job(5).unwrap().locked_by.is_none());
    }

    #[tokio::test]
    async fn claim_stamps_the_lease() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let coord = InMemoryCoordinator::with_clock(clock.clone(), Duration::minutes(5));
        coord.enqueue(record(1));
        let claimed = coord.claim(1, "w1").await.unwrap();
        assert_eq!(claimed[0].lease_expires_at, Some(clock.now() + Duration::minutes(5)));
        assert_eq!(claimed[0].updated_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn expired_lease_is_offered_again_untouched() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let coord = InMemoryCoordinator::with_clock(clock.clone(), Duration::minutes(5));
        coord.enqueue(record(1));
        let claimed_at = clock.now();
        coord.claim(1, "dead").await.unwrap();

        clock.advance(Duration::minutes(4));
        assert!(coord.claim(1, "w2").await.unwrap().is_empty());

        clock.advance(Duration::minutes(2));
        let again = coord.claim(1, "w2").await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].locked_by.as_deref(), Some("w2"));
        assert_eq!(again[0].updated_at, Some(claimed_at));
    }

    #[tokio::test]
    async fn unknown_job_is_rejected() {
        let coord = InMemoryCoordinator::new();
        let err = coord.post_event(99, "x").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::JobNotFound(99)));
    }

    #[tokio::test]
    async fn requeue_reoffers_jobs() {
        let coord = InMemoryCoordinator::new();
        coord.set_requeue(true);
        coord.enqueue(record(1));
        coord.claim(1, "w").await.unwrap();
        assert_eq!(coord.queued(), 0);
        coord
            .set_status(1, &StatusUpdate::new(JobStatus::Queued, "paused:global"))
            .await
            .unwrap();
        assert_eq!(coord.queued(), 1);
    }
}
