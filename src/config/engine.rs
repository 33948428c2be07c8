//! Engine configuration: one section per concern, loadable from env or JSON.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::quiet_hours::QuietHours;
use crate::core::session::PortalLayout;
use crate::core::signals::SignalMarkers;

/// Which layer owns request pacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingAuthority {
    /// Engine-wide and per-resource token buckets in the runner.
    Engine,
    /// A min-gap pacer inside each session; engine buckets are disabled.
    #[default]
    Session,
}

/// Which portal driver the binary wires in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalMode {
    /// Built-in simulated portal.
    #[default]
    Simulate,
    /// A driver supplied by the embedding application.
    External,
}

/// Coordinator connection settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Base URL, e.g. `https://api.example.com`. Empty disables the HTTP client.
    pub api_base: String,
    /// Bearer token; also the resume-link signing secret.
    pub token: String,
    /// Identifier sent with claims.
    pub worker_id: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: f64,
    /// POST attempts before giving up.
    pub post_attempts: u32,
    /// GET attempts before giving up.
    pub get_attempts: u32,
}

impl std::fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("api_base", &self.api_base)
            .field("token", &if self.token.is_empty() { "" } else { "***" })
            .field("worker_id", &self.worker_id)
            .field("timeout_secs", &self.timeout_secs)
            .field("post_attempts", &self.post_attempts)
            .field("get_attempts", &self.get_attempts)
            .finish()
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            token: String::new(),
            worker_id: format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            timeout_secs: 10.0,
            post_attempts: 6,
            get_attempts: 3,
        }
    }
}

impl CoordinatorConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    /// Validate connection values.
    pub fn validate(&self) -> Result<(), String> {
        if !self.api_base.is_empty() && !self.api_base.starts_with("http") {
            return Err("api_base must be an http(s) URL".into());
        }
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err("timeout_secs must be greater than 0".into());
        }
        if self.post_attempts == 0 || self.get_attempts == 0 {
            return Err("post_attempts and get_attempts must be greater than 0".into());
        }
        if self.worker_id.trim().is_empty() {
            return Err("worker_id must not be empty".into());
        }
        Ok(())
    }
}

/// Claim loop and job runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Idle sleep between ticks, in seconds.
    pub poll_secs: u64,
    /// Background controls refresh interval, in seconds.
    pub controls_secs: u64,
    /// Maximum concurrent job runners.
    pub concurrency: usize,
    /// Maximum resources checked in parallel inside one job (engine pacing only).
    pub job_max_parallel_checks: usize,
    /// UTC quiet hours during which nothing is claimed.
    pub quiet_hours: QuietHours,
    /// `searching` jobs untouched for longer than this are handed back.
    pub stale_minutes: i64,
    /// Resource prefixes scanned before the rest when controls do not override them.
    pub priority_resources: Vec<String>,
    /// Rank claimed jobs by score before dispatch.
    pub score_candidates: bool,
    /// Sessions opened per resource before giving up on it for the pass.
    pub resource_attempts: u32,
    /// Consecutive all-layout passes before a job is flagged for attention.
    pub layout_attention_passes: u32,
    /// Commit found slots for jobs that opted in.
    pub autobook_enabled: bool,
    /// Grace period for in-flight runners on shutdown, in seconds.
    pub drain_timeout_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_secs: 30,
            controls_secs: 10,
            concurrency: 8,
            job_max_parallel_checks: 4,
            quiet_hours: QuietHours::default(),
            stale_minutes: 5,
            priority_resources: Vec::new(),
            score_candidates: true,
            resource_attempts: 5,
            layout_attention_passes: 3,
            autobook_enabled: true,
            drain_timeout_secs: 30,
        }
    }
}

impl SchedulingConfig {
    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    /// Controls refresh interval.
    #[must_use]
    pub const fn controls_interval(&self) -> Duration {
        Duration::from_secs(self.controls_secs)
    }

    /// Shutdown drain bound.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Staleness window.
    #[must_use]
    pub fn stale_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_minutes)
    }

    /// Validate scheduling values.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_secs == 0 {
            return Err("poll_secs must be greater than 0".into());
        }
        if self.controls_secs == 0 {
            return Err("controls_secs must be greater than 0".into());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".into());
        }
        if self.job_max_parallel_checks == 0 {
            return Err("job_max_parallel_checks must be greater than 0".into());
        }
        if self.stale_minutes <= 0 {
            return Err("stale_minutes must be greater than 0".into());
        }
        if self.resource_attempts == 0 {
            return Err("resource_attempts must be greater than 0".into());
        }
        if self.layout_attention_passes == 0 {
            return Err("layout_attention_passes must be greater than 0".into());
        }
        Ok(())
    }
}

/// Rate-limit settings for both pacing layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Layer that owns pacing.
    pub authority: PacingAuthority,
    /// Engine-wide rate, requests per second.
    pub engine_rps: f64,
    /// Engine-wide burst.
    pub engine_burst: u32,
    /// Per-resource rate, requests per second. Zero disables per-resource buckets.
    pub resource_rps: f64,
    /// Upper bound of the random delay after each engine acquire, in ms.
    pub jitter_ms: u64,
    /// Session min-gap rate, actions per second.
    pub session_rps: f64,
    /// Session jitter as a fraction of the min gap.
    pub session_rps_jitter: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            authority: PacingAuthority::Session,
            engine_rps: 4.0,
            engine_burst: 4,
            resource_rps: 1.0,
            jitter_ms: 400,
            session_rps: 0.5,
            session_rps_jitter: 0.35,
        }
    }
}

impl PacingConfig {
    /// Engine jitter bound.
    #[must_use]
    pub const fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    /// Validate pacing values.
    pub fn validate(&self) -> Result<(), String> {
        match self.authority {
            PacingAuthority::Engine => {
                if !(self.engine_rps.is_finite() && self.engine_rps > 0.0) {
                    return Err("engine_rps must be greater than 0 under engine pacing".into());
                }
                if self.engine_burst == 0 {
                    return Err("engine_burst must be greater than 0".into());
                }
            }
            PacingAuthority::Session => {
                if !(self.session_rps.is_finite() && self.session_rps > 0.0) {
                    return Err("session_rps must be greater than 0 under session pacing".into());
                }
            }
        }
        if !(0.0..=1.0).contains(&self.session_rps_jitter) {
            return Err("session_rps_jitter must be within 0..=1".into());
        }
        if self.resource_rps < 0.0 {
            return Err("resource_rps must not be negative".into());
        }
        Ok(())
    }
}

/// Circuit-breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures before a resource cools down.
    pub fails_threshold: u32,
    /// Resource cooldown, in seconds.
    pub cooldown_secs: i64,
    /// Global cooldown after a challenge wall, in minutes.
    pub challenge_cooldown_min: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            fails_threshold: 12,
            cooldown_secs: 120,
            challenge_cooldown_min: 30,
        }
    }
}

impl BreakerConfig {
    /// Resource cooldown.
    #[must_use]
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs)
    }

    /// Global challenge cooldown; at least one minute.
    #[must_use]
    pub fn challenge_cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.challenge_cooldown_min.max(1))
    }

    /// Validate breaker values.
    pub fn validate(&self) -> Result<(), String> {
        if self.fails_threshold == 0 {
            return Err("fails_threshold must be greater than 0".into());
        }
        if self.cooldown_secs <= 0 {
            return Err("cooldown_secs must be greater than 0".into());
        }
        if self.challenge_cooldown_min <= 0 {
            return Err("challenge_cooldown_min must be greater than 0".into());
        }
        Ok(())
    }
}

/// Automation session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Driver selection for the binary.
    pub portal_mode: PortalMode,
    /// Entry point for swap jobs.
    pub url_change: String,
    /// Entry point for new bookings.
    pub url_book: String,
    /// Navigation timeout, in ms.
    pub nav_timeout_ms: u64,
    /// Bound on the whole readiness gate, in ms.
    pub ready_max_ms: u64,
    /// Settle delay after navigation, in ms (randomised up to 1.5x).
    pub post_nav_settle_ms: u64,
    /// Settle delay after a click, in ms (randomised up to 1.5x).
    pub click_settle_ms: u64,
    /// Form discovery attempts.
    pub form_attempts: u32,
    /// Pause between form discovery attempts, in ms.
    pub form_backoff_ms: u64,
    /// Confirmation-code extraction attempts after a commit.
    pub confirmation_attempts: u32,
    /// Availability probability per check for the simulated portal.
    pub simulated_slot_rate: f64,
    /// Field labels, selectors and markers.
    pub layout: PortalLayout,
    /// Defensive-signal markers.
    pub markers: SignalMarkers,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            portal_mode: PortalMode::Simulate,
            url_change: "https://portal.example.com/manage".into(),
            url_book: "https://portal.example.com/application".into(),
            nav_timeout_ms: 25_000,
            ready_max_ms: 30_000,
            post_nav_settle_ms: 800,
            click_settle_ms: 700,
            form_attempts: 5,
            form_backoff_ms: 800,
            confirmation_attempts: 3,
            simulated_slot_rate: 0.3,
            layout: PortalLayout::default(),
            markers: SignalMarkers::default(),
        }
    }
}

impl SessionConfig {
    /// Validate session values.
    pub fn validate(&self) -> Result<(), String> {
        if self.url_change.trim().is_empty() || self.url_book.trim().is_empty() {
            return Err("url_change and url_book must be set".into());
        }
        if self.nav_timeout_ms == 0 || self.ready_max_ms == 0 {
            return Err("nav_timeout_ms and ready_max_ms must be greater than 0".into());
        }
        if self.form_attempts == 0 {
            return Err("form_attempts must be greater than 0".into());
        }
        if self.confirmation_attempts == 0 {
            return Err("confirmation_attempts must be greater than 0".into());
        }
        if !(0.0..=1.0).contains(&self.simulated_slot_rate) {
            return Err("simulated_slot_rate must be within 0..=1".into());
        }
        Ok(())
    }
}

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving JSON notifications; logs only when unset.
    pub webhook_url: Option<String>,
    /// Minimum gap between two notifications of one kind for one identity, in seconds.
    pub debounce_secs: i64,
    /// Base URL for signed resume links.
    pub resume_url: Option<String>,
    /// Send assist-window reminders after a found slot.
    pub assist_enabled: bool,
    /// Assist window length, in minutes.
    pub assist_window_min: i64,
    /// Gap between assist reminders, in seconds.
    pub assist_ping_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            debounce_secs: 600,
            resume_url: None,
            assist_enabled: true,
            assist_window_min: 15,
            assist_ping_secs: 60,
        }
    }
}

impl NotifyConfig {
    /// Debounce window.
    #[must_use]
    pub fn debounce(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.debounce_secs)
    }

    /// Validate notification values.
    pub fn validate(&self) -> Result<(), String> {
        if self.debounce_secs < 0 {
            return Err("debounce_secs must not be negative".into());
        }
        if self.assist_enabled && (self.assist_window_min <= 0 || self.assist_ping_secs == 0) {
            return Err("assist window and ping interval must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Coordinator connection.
    pub coordinator: CoordinatorConfig,
    /// Claim loop and runner behaviour.
    pub scheduling: SchedulingConfig,
    /// Pacing.
    pub pacing: PacingConfig,
    /// Circuit breaker.
    pub breaker: BreakerConfig,
    /// Automation sessions.
    pub session: SessionConfig,
    /// Notifications.
    pub notify: NotifyConfig,
}

impl EngineConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.coordinator
            .validate()
            .map_err(|e| format!("coordinator invalid: {e}"))?;
        self.scheduling
            .validate()
            .map_err(|e| format!("scheduling invalid: {e}"))?;
        self.pacing
            .validate()
            .map_err(|e| format!("pacing invalid: {e}"))?;
        self.breaker
            .validate()
            .map_err(|e| format!("breaker invalid: {e}"))?;
        self.session
            .validate()
            .map_err(|e| format!("session invalid: {e}"))?;
        self.notify
            .validate()
            .map_err(|e| format!("notify invalid: {e}"))?;
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` (if present) and read configuration from the process environment.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a snapshot of variables.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, String> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build configuration from any key lookup; unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut cfg = Self::default();

        let c = &mut cfg.coordinator;
        env.set_string("API_BASE", &mut c.api_base);
        c.api_base = c.api_base.trim_end_matches('/').to_string();
        env.set_string("WORKER_TOKEN", &mut c.token);
        env.set_string("WORKER_ID", &mut c.worker_id);
        env.set("WORKER_TIMEOUT_SEC", &mut c.timeout_secs)?;

        let s = &mut cfg.scheduling;
        env.set("WORKER_POLL_SEC", &mut s.poll_secs)?;
        env.set("WORKER_CONTROLS_SEC", &mut s.controls_secs)?;
        env.set("WORKER_CONCURRENCY", &mut s.concurrency)?;
        env.set("JOB_MAX_PARALLEL_CHECKS", &mut s.job_max_parallel_checks)?;
        env.set("QUIET_HOURS", &mut s.quiet_hours)?;
        env.set("STALE_MINUTES", &mut s.stale_minutes)?;
        if let Some(raw) = env.get("PRIORITY_RESOURCES") {
            s.priority_resources = split_list(&raw);
        }
        env.set_bool("SCORE_CANDIDATES", &mut s.score_candidates)?;
        env.set("RESOURCE_ATTEMPTS", &mut s.resource_attempts)?;
        env.set("LAYOUT_ATTENTION_PASSES", &mut s.layout_attention_passes)?;
        env.set_bool("AUTOBOOK_ENABLED", &mut s.autobook_enabled)?;

        let p = &mut cfg.pacing;
        let mut honour_client = p.authority == PacingAuthority::Session;
        env.set_bool("HONOUR_CLIENT_RPS", &mut honour_client)?;
        p.authority = if honour_client {
            PacingAuthority::Session
        } else {
            PacingAuthority::Engine
        };
        env.set("ENGINE_RPS", &mut p.engine_rps)?;
        env.set("ENGINE_BURST", &mut p.engine_burst)?;
        env.set("RESOURCE_RPS", &mut p.resource_rps)?;
        env.set("WORKER_JITTER_MS", &mut p.jitter_ms)?;
        env.set("SESSION_RPS", &mut p.session_rps)?;
        env.set("SESSION_RPS_JITTER", &mut p.session_rps_jitter)?;

        let b = &mut cfg.breaker;
        env.set("CB_FAILS_THRESHOLD", &mut b.fails_threshold)?;
        env.set("CB_COOLDOWN_SEC", &mut b.cooldown_secs)?;
        env.set("CAPTCHA_COOLDOWN_MIN", &mut b.challenge_cooldown_min)?;

        let sess = &mut cfg.session;
        if let Some(raw) = env.get("PORTAL_MODE") {
            sess.portal_mode = match raw.to_ascii_lowercase().as_str() {
                "simulate" => PortalMode::Simulate,
                "external" => PortalMode::External,
                other => return Err(format!("PORTAL_MODE must be simulate or external, got `{other}`")),
            };
        }
        env.set_string("PORTAL_URL_CHANGE", &mut sess.url_change);
        env.set_string("PORTAL_URL_BOOK", &mut sess.url_book);
        env.set("PORTAL_NAV_TIMEOUT_MS", &mut sess.nav_timeout_ms)?;
        env.set("PORTAL_READY_MAX_MS", &mut sess.ready_max_ms)?;
        env.set("PORTAL_POST_NAV_SETTLE_MS", &mut sess.post_nav_settle_ms)?;
        env.set("PORTAL_CLICK_SETTLE_MS", &mut sess.click_settle_ms)?;
        env.set("SIMULATED_SLOT_RATE", &mut sess.simulated_slot_rate)?;

        let n = &mut cfg.notify;
        n.webhook_url = env.get("NOTIFY_WEBHOOK_URL");
        env.set("NOTIFY_DEBOUNCE_SEC", &mut n.debounce_secs)?;
        n.resume_url = env
            .get("RESUME_URL")
            .map(|u| u.trim_end_matches('/').to_string());
        env.set_bool("ASSIST_NOTIFY_ENABLED", &mut n.assist_enabled)?;
        env.set("ASSIST_NOTIFY_WINDOW_MIN", &mut n.assist_window_min)?;
        env.set("ASSIST_NOTIFY_PING_SECONDS", &mut n.assist_ping_secs)?;

        cfg.validate()?;
        Ok(cfg)
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn set_string(&self, name: &str, slot: &mut String) {
        if let Some(v) = self.get(name) {
            *slot = v;
        }
    }

    fn set<T>(&self, name: &str, slot: &mut T) -> Result<(), String>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(v) = self.get(name) {
            *slot = v
                .parse()
                .map_err(|e| format!("{name} is invalid (`{v}`): {e}"))?;
        }
        Ok(())
    }

    fn set_bool(&self, name: &str, slot: &mut bool) -> Result<(), String> {
        if let Some(v) = self.get(name) {
            *slot = parse_bool(name, &v)?;
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        _ => Err(format!("{name} must be a boolean (true/false/1/0)")),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
