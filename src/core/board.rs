//! In-process view of each job's last known status and breadcrumb.

use chrono::Duration;

use crate::core::job::{JobId, JobRecord, JobStatus};
use crate::util::clock::SharedClock;
use crate::util::ttl_cache::TtlCache;

/// Last status/event per job, fed by claims and status reports.
pub struct StatusBoard {
    entries: TtlCache<JobId, (JobStatus, String)>,
}

impl std::fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBoard")
            .field("jobs", &self.entries.len())
            .finish()
    }
}

impl StatusBoard {
    /// Board that forgets jobs untouched for a day.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: TtlCache::new(Duration::hours(24), 10_000, clock),
        }
    }

    /// Record what a claim returned.
    pub fn observe(&self, record: &JobRecord) {
        let status = record.parsed_status().unwrap_or(JobStatus::Searching);
        let event = record.last_event.clone().unwrap_or_default();
        self.entries.insert(record.id, (status, event));
    }

    /// Record a status report.
    pub fn record(&self, job_id: JobId, status: JobStatus, event: &str) {
        self.entries.insert(job_id, (status, event.to_string()));
    }

    /// Last known status.
    #[must_use]
    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.entries.get(&job_id).map(|(status, _)| status)
    }

    /// Last known breadcrumb.
    #[must_use]
    pub fn last_event(&self, job_id: JobId) -> Option<String> {
        self.entries.get(&job_id).map(|(_, event)| event)
    }

    /// Whether the job reached `booked` or `failed`.
    #[must_use]
    pub fn is_settled(&self, job_id: JobId) -> bool {
        matches!(
            self.status(job_id),
            Some(JobStatus::Booked | JobStatus::Failed)
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::util::clock::ManualClock;

    #[test]
    fn tracks_claims_and_reports() {
        let board = StatusBoard::new(Arc::new(ManualClock::new(chrono::Utc::now())));
        board.observe(&JobRecord {
            id: 3,
            status: Some("searching".into()),
            last_event: Some("resume_now".into()),
            ..JobRecord::default()
        });
        assert_eq!(board.last_event(3).as_deref(), Some("resume_now"));
        assert!(!board.is_settled(3));
        board.record(3, JobStatus::Booked, "booked:2030-01-01 09:00");
        assert!(board.is_settled(3));
        assert_eq!(board.status(4), None);
    }
}
