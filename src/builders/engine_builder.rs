//! Assemble a runnable [`Engine`] from configuration plus injected ports.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{EngineConfig, PacingAuthority, PortalMode};
use crate::core::assist::AssistSettings;
use crate::core::claim_loop::{ClaimLoop, ClaimLoopSettings, LoopStats};
use crate::core::controls::{spawn_controls_watcher, Controls, ControlsSnapshot};
use crate::core::coordinator::Coordinator;
use crate::core::error::EngineError;
use crate::core::health::{BreakerSettings, ResourceHealth};
use crate::core::notify::{DebouncedSink, LinkBuilder, NotificationSink};
use crate::core::rate_limiter::{KeyedRateLimiter, RateLimiter};
use crate::core::runner::{JobRunner, RunnerContext, RunnerOptions};
use crate::core::scorer::{PriorityScorer, ScoreWeights};
use crate::core::session::{SessionFactory, SessionSettings};
use crate::infra::coordinator::HttpCoordinator;
use crate::infra::notify::{FanoutSink, TracingSink, WebhookSink};
use crate::infra::portal::{PortalScript, SimulatedPortalFactory};
use crate::util::clock::{system_clock, SharedClock};
use crate::util::signing::ResumeLinkSigner;

/// Builder for [`Engine`]. Ports that are not injected are derived from the config:
/// an HTTP coordinator, the simulated portal (in `simulate` mode), and a log sink
/// plus an optional webhook.
pub struct EngineBuilder {
    config: EngineConfig,
    coordinator: Option<Arc<dyn Coordinator>>,
    sessions: Option<Arc<dyn SessionFactory>>,
    sink: Option<Arc<dyn NotificationSink>>,
    clock: Option<SharedClock>,
    shutdown: Option<CancellationToken>,
    weights: ScoreWeights,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator.is_some())
            .field("sessions", &self.sessions.is_some())
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            coordinator: None,
            sessions: None,
            sink: None,
            clock: None,
            shutdown: None,
            weights: ScoreWeights::default(),
        }
    }

    /// Use `coordinator` instead of the HTTP client.
    #[must_use]
    pub fn coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Use `sessions` as the portal driver.
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Deliver notifications to `sink` (still debounced).
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Time source.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Shutdown token; a fresh one is created otherwise.
    #[must_use]
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Scoring weights.
    #[must_use]
    pub fn weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    fn runner_options(cfg: &EngineConfig) -> RunnerOptions {
        let window_secs = u64::try_from(cfg.notify.assist_window_min.max(0)).unwrap_or(0) * 60;
        RunnerOptions {
            stale_window: cfg.scheduling.stale_window(),
            resource_attempts: cfg.scheduling.resource_attempts,
            retry_backoff: Duration::from_millis(500),
            parallel_checks: cfg.scheduling.job_max_parallel_checks,
            autobook_enabled: cfg.scheduling.autobook_enabled,
            layout_attention_passes: cfg.scheduling.layout_attention_passes,
            challenge_cooldown: cfg.breaker.challenge_cooldown(),
            priority_resources: cfg.scheduling.priority_resources.clone(),
            assist: AssistSettings {
                enabled: cfg.notify.assist_enabled,
                window: Duration::from_secs(window_secs),
                ping: Duration::from_secs(cfg.notify.assist_ping_secs),
            },
        }
    }

    fn default_sink(cfg: &EngineConfig) -> Result<Arc<dyn NotificationSink>, EngineError> {
        let log: Arc<dyn NotificationSink> = Arc::new(TracingSink);
        let Some(url) = cfg.notify.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(log);
        };
        let webhook = WebhookSink::new(url, cfg.coordinator.timeout())
            .map_err(|e| EngineError::Config(format!("webhook client: {e}")))?;
        Ok(Arc::new(FanoutSink::new(vec![log, Arc::new(webhook)])))
    }

    /// Validate the config and wire every component.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the config is invalid or a required port
    /// cannot be derived (an external portal without an injected driver).
    pub fn build(self) -> Result<Engine, EngineError> {
        let cfg = self.config;
        cfg.validate().map_err(EngineError::Config)?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let shutdown = self.shutdown.unwrap_or_default();

        let coordinator: Arc<dyn Coordinator> = match self.coordinator {
            Some(c) => c,
            None => Arc::new(HttpCoordinator::new(&cfg.coordinator)?),
        };
        let sessions: Arc<dyn SessionFactory> = match (self.sessions, cfg.session.portal_mode) {
            (Some(s), _) => s,
            (None, PortalMode::Simulate) => Arc::new(
                SimulatedPortalFactory::new(cfg.session.layout.clone(), Arc::clone(&clock)).with_default(
                    PortalScript::Random {
                        slot_rate: cfg.session.simulated_slot_rate,
                    },
                ),
            ),
            (None, PortalMode::External) => {
                return Err(EngineError::Config(
                    "portal_mode external requires an injected session factory".into(),
                ))
            }
        };
        let raw_sink = match self.sink {
            Some(s) => s,
            None => Self::default_sink(&cfg)?,
        };
        let notifier: Arc<dyn NotificationSink> = if cfg.notify.debounce_secs > 0 {
            Arc::new(DebouncedSink::new(raw_sink, cfg.notify.debounce(), Arc::clone(&clock)))
        } else {
            raw_sink
        };

        let session_settings =
            Arc::new(SessionSettings::from_config(&cfg.session).map_err(EngineError::Config)?);
        let (session_pacing, engine_limiter, resource_limiter) = match cfg.pacing.authority {
            PacingAuthority::Session => (
                Some((cfg.pacing.session_rps, cfg.pacing.session_rps_jitter)),
                RateLimiter::disabled(),
                KeyedRateLimiter::disabled(),
            ),
            PacingAuthority::Engine => (
                None,
                RateLimiter::new(cfg.pacing.engine_rps, cfg.pacing.engine_burst, cfg.pacing.jitter()),
                KeyedRateLimiter::new(cfg.pacing.resource_rps, 1, Duration::ZERO),
            ),
        };

        let health = Arc::new(ResourceHealth::new(
            BreakerSettings {
                failure_threshold: cfg.breaker.fails_threshold,
                cooldown: cfg.breaker.cooldown(),
            },
            Arc::clone(&clock),
        ));
        let controls = Arc::new(Controls::new(ControlsSnapshot::from_local(
            &cfg.scheduling.priority_resources,
            cfg.scheduling.quiet_hours.clone(),
        )));
        let signer = cfg
            .notify
            .resume_url
            .as_deref()
            .and_then(|url| ResumeLinkSigner::new(url, &cfg.coordinator.token));
        let links = LinkBuilder::new(&cfg.session.url_change, &cfg.session.url_book, signer);

        let context = Arc::new(RunnerContext::new(
            Arc::clone(&coordinator),
            sessions,
            session_settings,
            session_pacing,
            Arc::new(engine_limiter),
            Arc::new(resource_limiter),
            health,
            notifier,
            links,
            Arc::clone(&controls),
            shutdown.clone(),
            clock,
            Self::runner_options(&cfg),
        ));
        let runner = JobRunner::new(context);
        let claim_loop = ClaimLoop::new(
            runner.clone(),
            PriorityScorer::new(self.weights),
            ClaimLoopSettings {
                worker_id: cfg.coordinator.worker_id.clone(),
                concurrency: cfg.scheduling.concurrency,
                poll_interval: cfg.scheduling.poll_interval(),
                drain_timeout: cfg.scheduling.drain_timeout(),
                score_candidates: cfg.scheduling.score_candidates,
            },
        );

        info!(
            worker_id = %cfg.coordinator.worker_id,
            pacing = ?cfg.pacing.authority,
            portal = ?cfg.session.portal_mode,
            "engine assembled"
        );
        Ok(Engine {
            claim_loop,
            runner,
            coordinator,
            controls,
            controls_interval: cfg.scheduling.controls_interval(),
            shutdown,
        })
    }
}

/// A wired engine: claim loop plus the background controls watcher.
pub struct Engine {
    claim_loop: ClaimLoop,
    runner: JobRunner,
    coordinator: Arc<dyn Coordinator>,
    controls: Arc<Controls>,
    controls_interval: Duration,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("claim_loop", &self.claim_loop)
            .field("controls_interval", &self.controls_interval)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Runner used by the loop; handy for single passes.
    #[must_use]
    pub const fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Claim loop, for driving ticks by hand.
    #[must_use]
    pub const fn claim_loop(&self) -> &ClaimLoop {
        &self.claim_loop
    }

    /// Controls channel.
    #[must_use]
    pub const fn controls(&self) -> &Arc<Controls> {
        &self.controls
    }

    /// Token that stops the engine.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown, then drain.
    pub async fn run(self) -> LoopStats {
        let watcher = spawn_controls_watcher(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.controls),
            self.controls_interval,
            self.shutdown.clone(),
        );
        let stats = self.claim_loop.run().await;
        self.shutdown.cancel();
        if let Err(err) = watcher.await {
            tracing::warn!(error = %err, "controls watcher ended abnormally");
        }
        stats
    }
}
