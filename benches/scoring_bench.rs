//! Benchmarks for the hot paths of a claim tick.
//!
//! Benchmarks cover:
//! - Candidate scoring and ranking
//! - Resource planning (priority split plus seeded shuffle)
//! - Token bucket acquisition when tokens are available
//! - Defensive-signal scanning of page HTML

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;

use chrono::{Days, TimeZone, Utc};
use tokio::runtime::Runtime;

use slotwatch::core::{
    Job, JobRecord, PriorityScorer, RateLimiter, ScoreWeights, SignalDetector, SignalMarkers,
    WindowRecord,
};

// ============================================================================
// Fixtures
// ============================================================================

fn build_job(id: u64) -> Job {
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
    let start = now.date_naive() + Days::new(id % 30);
    let end = start + Days::new(1 + id % 20);
    let record = JobRecord {
        id,
        booking_type: Some(if id % 3 == 0 { "new" } else { "swap" }.into()),
        licence_number: Some(format!("LIC{id:06}")),
        booking_reference: Some(format!("{:08}", 10_000_000 + id)),
        qualification_reference: Some(format!("Q{id:07}")),
        resources: (0..8).map(|r| format!("Resource {}", (id + r) % 13)).collect(),
        date_window: Some(WindowRecord {
            start: Some(start.format("%Y-%m-%d").to_string()),
            end: Some(end.format("%Y-%m-%d").to_string()),
        }),
        time_window: (id % 2 == 0).then(|| WindowRecord {
            start: Some("08:00".into()),
            end: Some(format!("{}:00", 10 + id % 8)),
        }),
        status: Some("queued".into()),
        created_at: Some(now - chrono::Duration::minutes(i64::try_from(id % 600).unwrap())),
        ..JobRecord::default()
    };
    Job::try_from(record).unwrap()
}

// ============================================================================
// Scoring
// ============================================================================

fn bench_rank_candidates(c: &mut Criterion) {
    let scorer = PriorityScorer::new(ScoreWeights::default());
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
    let mut group = c.benchmark_group("scorer/rank");

    for size in [8u64, 64, 512] {
        let jobs: Vec<Job> = (0..size).map(build_job).collect();
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &jobs, |b, jobs| {
            b.iter(|| {
                let mut batch = jobs.clone();
                scorer.rank(&mut batch, now);
                black_box(batch);
            });
        });
    }
    group.finish();
}

fn bench_plan_resources(c: &mut Criterion) {
    let job = build_job(42);
    let prefixes = vec!["resource 1".to_string(), "resource 7".to_string()];
    c.bench_function("scorer/plan_resources", |b| {
        b.iter(|| black_box(PriorityScorer::plan_resources(black_box(&job), &prefixes)));
    });
}

// ============================================================================
// Pacing
// ============================================================================

fn bench_bucket_acquire(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let limiter = RateLimiter::new(1_000_000.0, 1_000_000, Duration::ZERO);
    c.bench_function("rate_limiter/acquire_hot", |b| {
        b.to_async(&rt).iter(|| async {
            limiter.acquire().await;
        });
    });
}

// ============================================================================
// Signal scanning
// ============================================================================

fn bench_signal_scan(c: &mut Criterion) {
    let detector = SignalDetector::new(&SignalMarkers::default());
    let clean = format!(
        "<html><body><main id=\"main-content\">{}</main></body></html>",
        "<div class=\"slot\">Tuesday 09:40</div>".repeat(200)
    );
    let challenge = format!("{clean}<div class=\"cf-challenge\"></div>");

    let mut group = c.benchmark_group("signals/scan");
    group.throughput(Throughput::Bytes(clean.len() as u64));
    group.bench_function("clean", |b| {
        b.iter(|| black_box(detector.scan(black_box(&clean), "search")));
    });
    group.bench_function("challenge", |b| {
        b.iter(|| black_box(detector.scan(black_box(&challenge), "search")));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_rank_candidates,
    bench_plan_resources,
    bench_bucket_acquire,
    bench_signal_scan
);
criterion_main!(benches);
