//! Stale-lease reclaim for jobs left in `searching`.

use chrono::{DateTime, Duration, Utc};

use crate::core::job::{JobRecord, JobStatus};

/// Breadcrumb reported when a job is handed back to the queue as stale.
#[must_use]
pub fn stale_event(window: Duration) -> String {
    format!("stale_skipped:>{}m", window.num_minutes())
}

/// Decide whether `record` should be returned to `queued` before any work runs.
///
/// Only jobs observed in `searching` are eligible, and only when their last update
/// (or creation, if never updated) is older than `window`. Returns the event to
/// report alongside the status change.
#[must_use]
pub fn stale_reclaim(record: &JobRecord, now: DateTime<Utc>, window: Duration) -> Option<String> {
    if record.parsed_status() != Some(JobStatus::Searching) {
        return None;
    }
    let touched = record.updated_at.or(record.created_at)?;
    (now - touched > window).then(|| stale_event(window))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str, updated_mins_ago: Option<i64>, now: DateTime<Utc>) -> JobRecord {
        JobRecord {
            id: 7,
            status: Some(status.into()),
            updated_at: updated_mins_ago.map(|m| now - Duration::minutes(m)),
            ..JobRecord::default()
        }
    }

    #[test]
    fn old_searching_job_is_reclaimed() {
        let now = Utc::now();
        let window = Duration::minutes(30);
        assert_eq!(
            stale_reclaim(&record("searching", Some(31), now), now, window).as_deref(),
            Some("stale_skipped:>30m")
        );
    }

    #[test]
    fn fresh_or_non_searching_jobs_are_kept() {
        let now = Utc::now();
        let window = Duration::minutes(30);
        assert!(stale_reclaim(&record("searching", Some(5), now), now, window).is_none());
        assert!(stale_reclaim(&record("queued", Some(300), now), now, window).is_none());
        assert!(stale_reclaim(&record("searching", None, now), now, window).is_none());
    }

    #[test]
    fn created_at_is_used_when_never_updated() {
        let now = Utc::now();
        let rec = JobRecord {
            id: 1,
            status: Some("searching".into()),
            created_at: Some(now - Duration::hours(2)),
            ..JobRecord::default()
        };
        assert!(stale_reclaim(&rec, now, Duration::minutes(60)).is_some());
    }
}
