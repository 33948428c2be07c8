//! Pacing authority: session pacing serialises resources, engine pacing lets a job
//! fan out across resources under the shared token bucket.

mod support;

use std::time::Duration;

use tokio::time::Instant;

use slotwatch::core::{PassOutcome, RateLimiter};
use slotwatch::infra::PortalScript;
use support::{engine_paced_config, slot, swap_record, test_config, Harness};

#[tokio::test(start_paused = true)]
async fn engine_pacing_checks_resources_in_parallel() {
    let mut cfg = engine_paced_config();
    cfg.scheduling.job_max_parallel_checks = 3;
    let h = Harness::with_portal(cfg, |p| p.with_search_delay(Duration::from_secs(20)));
    let record = h.claimed(swap_record(60, "60606060", &["Alpha", "Beta", "Gamma"]));

    let started = Instant::now();
    assert_eq!(h.runner().run(record).await, PassOutcome::NoSlots);

    assert_eq!(h.stats().opened(), 3);
    assert_eq!(h.stats().peak_open(), 3);
    assert!(started.elapsed() < Duration::from_secs(40), "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn session_pacing_keeps_one_resource_at_a_time() {
    let mut cfg = test_config();
    cfg.scheduling.job_max_parallel_checks = 3;
    let h = Harness::with_portal(cfg, |p| p.with_search_delay(Duration::from_secs(20)));
    let record = h.claimed(swap_record(61, "61616161", &["Alpha", "Beta", "Gamma"]));

    let started = Instant::now();
    assert_eq!(h.runner().run(record).await, PassOutcome::NoSlots);

    assert_eq!(h.stats().opened(), 3);
    assert_eq!(h.stats().peak_open(), 1);
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn session_pacing_spaces_page_actions() {
    let h = Harness::new(test_config());
    let record = h.claimed(swap_record(62, "62626262", &["Alpha"]));

    let started = Instant::now();
    h.runner().run(record).await;

    // goto, two fills, submit and search: four paced gaps at 0.5 actions/s.
    assert!(started.elapsed() >= Duration::from_secs(8), "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn every_fill_and_click_is_followed_by_a_settle() {
    let mut cfg = engine_paced_config();
    cfg.session.click_settle_ms = 1_000;
    let h = Harness::new(cfg);
    let record = h.claimed(swap_record(64, "64646464", &["Alpha"]));

    let started = Instant::now();
    assert_eq!(h.runner().run(record).await, PassOutcome::NoSlots);

    // Two fills and the submit click settle for at least one second each.
    assert!(started.elapsed() >= Duration::from_secs(3), "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn parallel_pass_reports_a_single_slot() {
    let mut cfg = engine_paced_config();
    cfg.scheduling.job_max_parallel_checks = 2;
    let h = Harness::new(cfg);
    let late = slot("Alpha", "2026-12-01", "09:00");
    let early = slot("Beta", "2026-11-02", "09:00");
    h.portal.script("Alpha", PortalScript::Slots(vec![late]));
    h.portal.script("Beta", PortalScript::Slots(vec![early]));
    let record = h.claimed(swap_record(63, "63636363", &["Alpha", "Beta"]));

    match h.runner().run(record).await {
        PassOutcome::Found(found) => assert!(found.resource == "Alpha" || found.resource == "Beta"),
        other => panic!("expected a found slot, got {other:?}"),
    }
    assert_eq!(h.sink.count(slotwatch::core::NotificationKind::SlotFound), 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_challenge_names_the_resource_that_raised_it() {
    let mut cfg = engine_paced_config();
    cfg.scheduling.job_max_parallel_checks = 2;
    cfg.pacing.jitter_ms = 50;
    let h = Harness::with_portal(cfg, |p| p.with_search_delay(Duration::from_secs(5)));
    h.portal.script("Alpha", PortalScript::Challenge);
    h.portal.script("Beta", PortalScript::NoSlots);
    let record = h.claimed(swap_record(65, "65656565", &["Alpha", "Beta"]));

    assert_eq!(h.runner().run(record).await, PassOutcome::Challenge);
    assert_eq!(h.last_event(65), "captcha_cooldown:Alpha");
}

#[tokio::test(start_paused = true)]
async fn token_bucket_bounds_the_sustained_rate() {
    let limiter = RateLimiter::new(5.0, 1, Duration::ZERO);
    let started = Instant::now();
    for _ in 0..11 {
        limiter.acquire().await;
    }
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn token_bucket_allows_the_configured_burst() {
    let limiter = RateLimiter::new(1.0, 4, Duration::ZERO);
    let started = Instant::now();
    for _ in 0..4 {
        limiter.acquire().await;
    }
    assert!(started.elapsed() < Duration::from_millis(10));
    limiter.acquire().await;
    assert!(started.elapsed() >= Duration::from_millis(900));
}
