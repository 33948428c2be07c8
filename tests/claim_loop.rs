//! Claim loop ticks and the full engine run with a shutdown drain.

mod support;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::task::JoinSet;

use slotwatch::core::{
    Coordinator, JobRecord, JobValidationError, PassOutcome, RemoteControls, TickOutcome,
};
use support::{swap_record, test_config, Harness};

async fn drain(inflight: &mut JoinSet<PassOutcome>) -> Vec<PassOutcome> {
    let mut outcomes = Vec::new();
    while let Some(result) = inflight.join_next().await {
        outcomes.push(result.expect("runner task"));
    }
    outcomes
}

#[tokio::test(start_paused = true)]
async fn paused_controls_skip_claiming() {
    let h = Harness::new(test_config());
    h.coordinator.enqueue(swap_record(40, "40404040", &["Alpha"]));
    h.coordinator.set_paused(true);
    let mut inflight = JoinSet::new();

    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Idle("paused"));
    assert!(h.coordinator.claim_limits().is_empty());
    assert_eq!(h.coordinator.queued(), 1);
}

#[tokio::test(start_paused = true)]
async fn quiet_hours_skip_claiming() {
    let h = Harness::new(test_config());
    h.coordinator.enqueue(swap_record(41, "41414141", &["Alpha"]));
    h.coordinator.set_controls(RemoteControls {
        pause_all: false,
        priority_resources: vec![],
        quiet_hours: Some("0-0".into()),
    });
    let mut inflight = JoinSet::new();

    assert_eq!(
        h.engine.claim_loop().tick(&mut inflight).await,
        TickOutcome::Idle("quiet_hours")
    );
    assert!(h.coordinator.claim_limits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn global_cooldown_hands_claimed_jobs_back() {
    let h = Harness::new(test_config());
    h.coordinator.set_requeue(true);
    h.coordinator.enqueue(swap_record(42, "42424242", &["Alpha"]));
    h.health().trip_global(ChronoDuration::minutes(30));
    let mut inflight = JoinSet::new();

    assert_eq!(
        h.engine.claim_loop().tick(&mut inflight).await,
        TickOutcome::Idle("global_cooldown")
    );
    assert!(inflight.is_empty());
    assert_eq!(h.last_event(42), "cooldown_skip:*global*");
    assert_eq!(h.coordinator.queued(), 1);

    h.clock.advance(ChronoDuration::minutes(31));
    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Dispatched(1));
    drain(&mut inflight).await;
}

#[tokio::test(start_paused = true)]
async fn resumed_job_runs_through_the_global_cooldown() {
    let h = Harness::new(test_config());
    h.coordinator.set_requeue(true);
    let mut resumed = swap_record(51, "51515151", &["Alpha"]);
    resumed.last_event = Some("resume_now".into());
    h.coordinator.enqueue(resumed);
    h.coordinator.enqueue(swap_record(52, "52525252", &["Beta"]));
    h.health().trip_global(ChronoDuration::minutes(30));
    let mut inflight = JoinSet::new();

    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Dispatched(1));
    assert_eq!(drain(&mut inflight).await, vec![PassOutcome::NoSlots]);
    assert_eq!(h.stats().opened_for("Alpha"), 1);
    assert_eq!(h.last_event(52), "cooldown_skip:*global*");
    assert!(h.health().global_allowed());
}

#[tokio::test(start_paused = true)]
async fn claims_never_exceed_free_slots() {
    let mut cfg = test_config();
    cfg.scheduling.concurrency = 2;
    let h = Harness::new(cfg);
    for (id, reference) in [(43, "43434343"), (44, "44444444"), (45, "45454545")] {
        h.coordinator.enqueue(swap_record(id, reference, &["Alpha"]));
    }
    let claim_loop = h.engine.claim_loop();
    let mut inflight = JoinSet::new();

    assert_eq!(claim_loop.tick(&mut inflight).await, TickOutcome::Dispatched(2));
    assert_eq!(claim_loop.tick(&mut inflight).await, TickOutcome::Busy);
    assert_eq!(h.coordinator.claim_limits(), vec![2]);
    assert_eq!(h.coordinator.queued(), 1);

    let outcomes = drain(&mut inflight).await;
    assert_eq!(outcomes, vec![PassOutcome::NoSlots, PassOutcome::NoSlots]);
    assert_eq!(claim_loop.free_slots(&inflight), 2);
    assert_eq!(claim_loop.tick(&mut inflight).await, TickOutcome::Dispatched(1));
    assert_eq!(h.coordinator.claim_limits(), vec![2, 2]);
    drain(&mut inflight).await;
}

#[tokio::test(start_paused = true)]
async fn empty_queue_is_idle() {
    let h = Harness::new(test_config());
    let mut inflight = JoinSet::new();
    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Idle("no_jobs"));
}

#[tokio::test(start_paused = true)]
async fn claim_failure_backs_off() {
    let h = Harness::new(test_config());
    h.coordinator.enqueue(swap_record(46, "46464646", &["Alpha"]));
    h.coordinator.fail_claims(true);
    let mut inflight = JoinSet::new();

    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Backoff);
    assert!(inflight.is_empty());
}

#[tokio::test(start_paused = true)]
async fn controls_outage_backs_off_and_keeps_the_last_snapshot() {
    let h = Harness::new(test_config());
    h.coordinator.set_paused(true);
    let mut inflight = JoinSet::new();
    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Idle("paused"));

    h.coordinator.set_paused(false);
    h.coordinator.fail_controls(true);
    h.coordinator.enqueue(swap_record(53, "53535353", &["Alpha"]));
    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Backoff);
    assert!(h.engine.controls().current().pause_all);
    assert!(h.coordinator.claim_limits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_record_is_handed_back_with_reason() {
    let h = Harness::new(test_config());
    h.coordinator.enqueue(JobRecord {
        id: 47,
        booking_type: Some("swap".into()),
        booking_reference: Some("47474747".into()),
        status: Some("queued".into()),
        ..JobRecord::default()
    });
    let mut inflight = JoinSet::new();

    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Dispatched(1));
    let outcomes = drain(&mut inflight).await;

    assert_eq!(
        outcomes,
        vec![PassOutcome::Invalid(JobValidationError::MissingLicence)]
    );
    assert_eq!(h.last_event(47), "missing_licence_number");
    assert_eq!(h.stats().opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_lease_is_reclaimed_as_stale() {
    let h = Harness::new(test_config());
    h.coordinator.enqueue(swap_record(54, "54545454", &["Alpha"]));
    h.coordinator.claim(1, "crashed-worker").await.expect("claim");
    h.clock.advance(ChronoDuration::minutes(10));
    let mut inflight = JoinSet::new();

    assert_eq!(h.engine.claim_loop().tick(&mut inflight).await, TickOutcome::Dispatched(1));
    assert_eq!(drain(&mut inflight).await, vec![PassOutcome::Stale]);
    assert_eq!(h.last_event(54), "stale_skipped:>5m");
    assert_eq!(h.stats().opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn engine_run_drains_on_shutdown() {
    let h = Harness::new(test_config());
    h.coordinator.enqueue(swap_record(48, "48484848", &["Alpha", "Beta"]));
    h.coordinator.enqueue(swap_record(49, "49494949", &["Gamma"]));
    let Harness {
        coordinator, engine, ..
    } = h;
    let token = engine.shutdown_token();

    let run = tokio::spawn(engine.run());
    tokio::time::sleep(Duration::from_secs(1)).await;
    token.cancel();
    let stats = run.await.expect("engine task");

    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.completed, 2);
    for id in [48, 49] {
        assert_eq!(
            coordinator.job(id).and_then(|r| r.last_event).as_deref(),
            Some("paused:shutdown")
        );
    }
}

#[tokio::test(start_paused = true)]
async fn engine_keeps_polling_until_work_arrives() {
    let h = Harness::new(test_config());
    h.coordinator.set_requeue(false);
    let Harness {
        coordinator, engine, ..
    } = h;
    let token = engine.shutdown_token();
    let run = tokio::spawn(engine.run());

    tokio::time::sleep(Duration::from_secs(12)).await;
    coordinator.enqueue(swap_record(50, "50505050", &["Alpha"]));
    tokio::time::sleep(Duration::from_secs(120)).await;
    token.cancel();
    let stats = run.await.expect("engine task");

    assert!(stats.ticks >= 3, "{stats:?}");
    assert_eq!(stats.dispatched, 1);
    assert!(coordinator
        .job(50)
        .and_then(|r| r.last_event)
        .is_some_and(|e| e.starts_with("no_slots_this_round:")));
}
