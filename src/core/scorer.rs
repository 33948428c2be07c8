//! Job ranking and per-job resource ordering.
//!
//! ```text
//! score = w1*urgency + w2*date_narrowness + w3*time_narrowness + w4*age_boost + w5*mode_bonus
//! ```
//!
//! Within one job, resources matching a priority prefix are always scanned before
//! the rest; the rest are shuffled with the job id as seed so retries of the same
//! job spread across resources instead of always hitting the same one first.

use chrono::{DateTime, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::core::job::{Job, JobMode};

/// Weights and constants for the score formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of window urgency.
    pub urgency: f64,
    /// Weight of date-window narrowness.
    pub date_narrowness: f64,
    /// Weight of time-window narrowness.
    pub time_narrowness: f64,
    /// Weight of the age boost.
    pub age: f64,
    /// Weight of the mode bonus.
    pub mode: f64,
    /// Bonus granted to swap jobs before weighting.
    pub swap_bonus: f64,
    /// Distance and length assumed for jobs without a date window.
    pub default_horizon_days: i64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            urgency: 3.0,
            date_narrowness: 1.0,
            time_narrowness: 10.0,
            age: 1.0,
            mode: 1.0,
            swap_bonus: 0.15,
            default_horizon_days: 30,
        }
    }
}

/// Individual score terms, exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    /// `1 / max(1, days_until_start + 1)`.
    pub urgency: f64,
    /// `1 / max(1, window_length_days)`.
    pub date_narrowness: f64,
    /// `1 / max(30, window_length_minutes)`.
    pub time_narrowness: f64,
    /// `log10(age_minutes + 10) / 2`.
    pub age_boost: f64,
    /// Swap bonus or zero.
    pub mode_bonus: f64,
    /// Weighted sum.
    pub total: f64,
}

/// Resources of one job split into scan phases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePlan {
    /// Resources matching a priority prefix, in job order.
    pub priority: Vec<String>,
    /// Everything else, shuffled per job.
    pub remainder: Vec<String>,
}

impl ResourcePlan {
    /// Whether the plan contains no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.remainder.is_empty()
    }

    /// Both phases in scan order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.priority.iter().chain(self.remainder.iter())
    }
}

/// Weighted scorer.
#[derive(Debug, Clone, Default)]
pub struct PriorityScorer {
    weights: ScoreWeights,
}

impl PriorityScorer {
    /// Scorer with explicit weights.
    #[must_use]
    pub const fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Score terms for `job` at `now`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn breakdown(&self, job: &Job, now: DateTime<Utc>) -> ScoreBreakdown {
        let w = &self.weights;
        let today: NaiveDate = now.date_naive();
        let (days_until, length_days) = job.date_window.map_or(
            (w.default_horizon_days, w.default_horizon_days),
            |win| ((win.start - today).num_days().max(0), win.length_days()),
        );
        let length_minutes = job.time_window.map_or(24 * 60, |win| win.length_minutes());
        let age_minutes = job
            .created_at
            .map_or(0, |created| (now - created).num_minutes().max(0));

        let urgency = 1.0 / ((days_until + 1).max(1) as f64);
        let date_narrowness = 1.0 / (length_days.max(1) as f64);
        let time_narrowness = 1.0 / (length_minutes.max(30) as f64);
        let age_boost = (age_minutes as f64 + 10.0).log10() / 2.0;
        let mode_bonus = match job.mode {
            JobMode::Swap { .. } => w.swap_bonus,
            JobMode::NewBooking { .. } => 0.0,
        };
        let total = w.urgency * urgency
            + w.date_narrowness * date_narrowness
            + w.time_narrowness * time_narrowness
            + w.age * age_boost
            + w.mode * mode_bonus;

        ScoreBreakdown {
            urgency,
            date_narrowness,
            time_narrowness,
            age_boost,
            mode_bonus,
            total,
        }
    }

    /// Weighted score for `job` at `now`.
    #[must_use]
    pub fn score(&self, job: &Job, now: DateTime<Utc>) -> f64 {
        self.breakdown(job, now).total
    }

    /// Sort jobs by descending score; ties keep claim order.
    pub fn rank(&self, jobs: &mut [Job], now: DateTime<Utc>) {
        let mut keyed: Vec<(f64, usize)> = jobs
            .iter()
            .enumerate()
            .map(|(idx, job)| (self.score(job, now), idx))
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let order: Vec<usize> = keyed.into_iter().map(|(_, idx)| idx).collect();
        apply_permutation(jobs, &order);
    }

    /// Split a job's resources into the priority and remainder phases.
    ///
    /// `prefixes` are matched case-insensitively against the start of each name.
    #[must_use]
    pub fn plan_resources(job: &Job, prefixes: &[String]) -> ResourcePlan {
        let prefixes: Vec<String> = prefixes
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        let (priority, mut remainder): (Vec<String>, Vec<String>) =
            job.resources.iter().cloned().partition(|name| {
                let lower = name.to_lowercase();
                prefixes.iter().any(|p| lower.starts_with(p.as_str()))
            });
        let mut rng = StdRng::seed_from_u64(job.id);
        remainder.shuffle(&mut rng);
        ResourcePlan {
            priority,
            remainder,
        }
    }
}

fn apply_permutation<T: Clone>(items: &mut [T], order: &[usize]) {
    let reordered: Vec<T> = order.iter().map(|&idx| items[idx].clone()).collect();
    items.clone_from_slice(&reordered);
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveTime};

    use super::*;
    use crate::core::job::{Credentials, DateWindow, JobOptions, JobStatus, Lease, TimeWindow};

    fn job(id: u64) -> Job {
        Job {
            id,
            mode: JobMode::NewBooking {
                qualification: "Q1".into(),
            },
            credentials: Credentials {
                primary: "P1".into(),
                email: None,
            },
            resources: vec![
                "Alpha".into(),
                "Bravo".into(),
                "Charlie".into(),
                "Delta".into(),
                "Echo".into(),
            ],
            date_window: None,
            time_window: None,
            status: JobStatus::Searching,
            last_event: None,
            lease: Lease::default(),
            created_at: None,
            updated_at: None,
            options: JobOptions::default(),
        }
    }

    fn window(now: DateTime<Utc>, start_in: i64, len: i64) -> DateWindow {
        let start = now.date_naive() + Duration::days(start_in);
        DateWindow {
            start,
            end: start + Duration::days(len - 1),
        }
    }

    #[test]
    fn earlier_window_scores_higher() {
        let now = Utc::now();
        let scorer = PriorityScorer::default();
        let mut soon = job(1);
        soon.date_window = Some(window(now, 2, 7));
        let mut later = job(2);
        later.date_window = Some(window(now, 20, 7));
        assert!(scorer.score(&soon, now) > scorer.score(&later, now));
    }

    #[test]
    fn narrower_window_scores_higher() {
        let now = Utc::now();
        let scorer = PriorityScorer::default();
        let mut narrow = job(1);
        narrow.date_window = Some(window(now, 5, 2));
        let mut wide = job(2);
        wide.date_window = Some(window(now, 5, 14));
        assert!(scorer.score(&narrow, now) > scorer.score(&wide, now));
    }

    #[test]
    fn narrower_time_window_scores_higher() {
        let now = Utc::now();
        let scorer = PriorityScorer::default();
        let mut narrow = job(1);
        narrow.time_window = Some(TimeWindow {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        });
        let wide = job(2);
        assert!(scorer.score(&narrow, now) > scorer.score(&wide, now));
    }

    #[test]
    fn score_is_monotone_in_age() {
        let now = Utc::now();
        let scorer = PriorityScorer::default();
        let mut previous = f64::MIN;
        for age in [0, 1, 5, 60, 600, 6000] {
            let mut j = job(1);
            j.created_at = Some(now - Duration::minutes(age));
            let score = scorer.score(&j, now);
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn swap_mode_gets_bonus() {
        let now = Utc::now();
        let scorer = PriorityScorer::default();
        let mut swap = job(1);
        swap.mode = JobMode::Swap {
            booking_reference: "12345678".into(),
        };
        assert!(scorer.score(&swap, now) > scorer.score(&job(2), now));
    }

    #[test]
    fn rank_orders_by_score_descending() {
        let now = Utc::now();
        let scorer = PriorityScorer::default();
        let mut far = job(1);
        far.date_window = Some(window(now, 40, 10));
        let mut near = job(2);
        near.date_window = Some(window(now, 0, 1));
        let mut jobs = vec![far, near];
        scorer.rank(&mut jobs, now);
        assert_eq!(jobs[0].id, 2);
    }

    #[test]
    fn plan_puts_prefixed_resources_first() {
        let plan = PriorityScorer::plan_resources(&job(9), &["ch".into(), "ECHO".into()]);
        assert_eq!(plan.priority, vec!["Charlie".to_string(), "Echo".to_string()]);
        assert_eq!(plan.remainder.len(), 3);
        assert!(plan.remainder.iter().all(|r| r != "Charlie" && r != "Echo"));
    }

    #[test]
    fn remainder_shuffle_is_deterministic_per_job() {
        let a = PriorityScorer::plan_resources(&job(42), &[]);
        let b = PriorityScorer::plan_resources(&job(42), &[]);
        assert_eq!(a, b);
        let mut sorted = a.remainder.clone();
        sorted.sort();
        assert_eq!(sorted, job(42).resources);
    }
}
