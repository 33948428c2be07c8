//! Defence-aware automation session against the portal.
//!
//! An [`AutomationSession`] drives one [`PortalPage`] through
//! `Init → Navigated → ReadinessConfirmed → FormLocated → FieldsFilled → Submitted →
//! ResultsRead → Success`, with `LayoutIssue` and `DefensiveSignalDetected` as the
//! failure branches. Every network-visible action is preceded by a pause check and a
//! pass through the session pacer, and followed by a randomised settle delay.
//! Concrete selectors live in [`PortalLayout`] so a portal redesign is a data change.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::engine::SessionConfig;
use crate::core::controls::PauseGate;
use crate::core::error::{PageError, SessionError};
use crate::core::job::{Job, JobId, JobMode, Slot};
use crate::core::rate_limiter::RateLimiter;
use crate::core::signals::SignalDetector;

/// Login form field, for heuristic discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Primary identity string.
    Primary,
    /// Existing booking reference (swap mode).
    BookingReference,
    /// Qualification reference (new-booking mode).
    Qualification,
}

/// How a page element is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Accessible label text (substring match).
    Label(String),
    /// CSS selector.
    Css(String),
    /// Visible text.
    Text(String),
    /// Driver-specific scan for an input of this kind.
    Heuristic(FieldKind),
}

impl Locator {
    /// Parse layout notation: `text=...` is a text locator, anything else CSS.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.strip_prefix("text=").map_or_else(
            || Self::Css(raw.to_string()),
            |text| Self::Text(text.to_string()),
        )
    }
}

/// Browser page abstraction. One page per session; never shared.
#[async_trait]
pub trait PortalPage: Send {
    /// Navigate to `url`.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), PageError>;
    /// Current document markup.
    async fn content(&mut self) -> Result<String, PageError>;
    /// Whether `locator` resolves to a visible element.
    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, PageError>;
    /// Wait until the network is idle; `false` if `timeout` elapsed first.
    async fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<bool, PageError>;
    /// Type `value` into the element.
    async fn fill(&mut self, locator: &Locator, value: &str) -> Result<(), PageError>;
    /// Click the element.
    async fn click(&mut self, locator: &Locator) -> Result<(), PageError>;
    /// Open the availability view for `resource` and read offered slots.
    async fn search_resource(&mut self, resource: &str) -> Result<Vec<Slot>, PageError>;
    /// Choose `slot` from the availability view.
    async fn select_slot(&mut self, slot: &Slot) -> Result<(), PageError>;
    /// Release browser resources.
    async fn close(&mut self);
}

/// Opens fresh pages. `resource` is the target of the session, if known.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// New isolated page.
    async fn open(&self, job: &Job, resource: Option<&str>) -> Result<Box<dyn PortalPage>, PageError>;
}

/// Labels, selectors and markers describing the portal's pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalLayout {
    /// Labels of the primary identity field.
    pub primary_labels: Vec<String>,
    /// Labels of the booking-reference field.
    pub reference_labels: Vec<String>,
    /// Labels of the qualification field.
    pub qualification_labels: Vec<String>,
    /// Attribute-pattern selectors of the primary identity field.
    pub primary_selectors: Vec<String>,
    /// Attribute-pattern selectors of the booking-reference field.
    pub reference_selectors: Vec<String>,
    /// Attribute-pattern selectors of the qualification field.
    pub qualification_selectors: Vec<String>,
    /// Controls that reveal the qualification field.
    pub qualification_toggle: Vec<String>,
    /// Submit controls.
    pub submit: Vec<String>,
    /// Consent-banner buttons dismissed best-effort.
    pub consent: Vec<String>,
    /// Elements whose visibility means the page is ready.
    pub ready: Vec<String>,
    /// Markup fragments present while the page is still loading.
    pub loading_markers: Vec<String>,
    /// Control confirming a swap.
    pub confirm_change: Vec<String>,
    /// Control completing a new booking.
    pub complete_booking: Vec<String>,
    /// Markup fragments shown after a successful commit.
    pub success_markers: Vec<String>,
    /// Regexes tried in order to extract a confirmation code (first capture group).
    pub confirmation_patterns: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for PortalLayout {
    fn default() -> Self {
        Self {
            primary_labels: strings(&[
                "Driving licence number",
                "Driving license number",
                "Driver number",
                "Licence number",
            ]),
            reference_labels: strings(&[
                "Application reference number",
                "Booking reference",
                "Reference number",
            ]),
            qualification_labels: strings(&["Theory test pass number", "Theory pass number"]),
            primary_selectors: strings(&[
                "input[name='driving-licence-number']",
                "input#driving-licence-number",
                "input[name*='licence']",
                "input[name*='driver']",
            ]),
            reference_selectors: strings(&[
                "input[name='application-reference-number']",
                "input#application-reference-number",
                "input[name*='reference']",
            ]),
            qualification_selectors: strings(&[
                "input[name='theory-test-pass-number']",
                "input#theory-test-pass-number",
                "input[name*='theory']",
            ]),
            qualification_toggle: strings(&["label:has-text('theory')", "#use-theory", "text=theory"]),
            submit: strings(&[
                "button[type='submit']",
                "input[type='submit']",
                "text=Continue",
            ]),
            consent: strings(&[
                "#accept-additional-cookies",
                "#accept-all-cookies",
                "text=Accept cookies",
                "#hide-cookie-banner",
            ]),
            ready: strings(&["main", "#main-content", "form"]),
            loading_markers: strings(&["aria-busy=\"true\"", "class=\"loading\""]),
            confirm_change: strings(&["#confirm-changes", "text=Confirm changes"]),
            complete_booking: strings(&["#complete-booking", "text=Confirm booking"]),
            success_markers: strings(&["booking confirmed", "your booking has been changed"]),
            confirmation_patterns: strings(&[
                r"(?i)booking reference\W{0,20}([A-Z0-9]{6,12})",
                r"(?i)confirmation (?:number|code)\W{0,20}([A-Z0-9]{6,12})",
                r"\b(\d{8})\b",
            ]),
        }
    }
}

/// Compiled session settings shared by all sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Entry URL for swap jobs.
    pub url_change: String,
    /// Entry URL for new bookings.
    pub url_book: String,
    /// Navigation timeout.
    pub nav_timeout: Duration,
    /// Bound on the readiness gate.
    pub ready_max: Duration,
    /// Base settle delay after navigation.
    pub post_nav_settle: Duration,
    /// Base settle delay after clicks.
    pub click_settle: Duration,
    /// Form discovery attempts.
    pub form_attempts: u32,
    /// Pause between form discovery attempts.
    pub form_backoff: Duration,
    /// Confirmation extraction attempts.
    pub confirmation_attempts: u32,
    /// Page description.
    pub layout: PortalLayout,
    detector: SignalDetector,
    confirmation_patterns: Vec<Regex>,
}

impl SessionSettings {
    /// Compile settings; fails on an invalid confirmation regex.
    pub fn from_config(cfg: &SessionConfig) -> Result<Self, String> {
        let confirmation_patterns = cfg
            .layout
            .confirmation_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| format!("confirmation pattern `{p}`: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            url_change: cfg.url_change.clone(),
            url_book: cfg.url_book.clone(),
            nav_timeout: Duration::from_millis(cfg.nav_timeout_ms),
            ready_max: Duration::from_millis(cfg.ready_max_ms),
            post_nav_settle: Duration::from_millis(cfg.post_nav_settle_ms),
            click_settle: Duration::from_millis(cfg.click_settle_ms),
            form_attempts: cfg.form_attempts.max(1),
            form_backoff: Duration::from_millis(cfg.form_backoff_ms),
            confirmation_attempts: cfg.confirmation_attempts.max(1),
            layout: cfg.layout.clone(),
            detector: SignalDetector::new(&cfg.markers),
            confirmation_patterns,
        })
    }

    /// Entry URL for a job mode.
    #[must_use]
    pub fn entry_url(&self, mode: &JobMode) -> &str {
        match mode {
            JobMode::Swap { .. } => &self.url_change,
            JobMode::NewBooking { .. } => &self.url_book,
        }
    }

    /// Defensive-signal detector.
    #[must_use]
    pub const fn detector(&self) -> &SignalDetector {
        &self.detector
    }

    /// First confirmation code found by the ordered patterns.
    #[must_use]
    pub fn extract_confirmation(&self, html: &str) -> Option<String> {
        self.confirmation_patterns.iter().find_map(|re| {
            re.captures(html)
                .and_then(|c| c.get(1).or_else(|| c.get(0)))
                .map(|m| m.as_str().to_string())
        })
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Page opened, nothing loaded.
    Init,
    /// Entry page loaded.
    Navigated,
    /// Readiness gate passed.
    ReadinessConfirmed,
    /// Login form found.
    FormLocated,
    /// Login form could not be found.
    LayoutIssue,
    /// Credentials entered.
    FieldsFilled,
    /// Form submitted.
    Submitted,
    /// Availability read.
    ResultsRead,
    /// A challenge or block page was seen.
    DefensiveSignalDetected,
    /// Commit confirmed.
    Success,
}

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The portal confirmed the change or booking.
    Booked {
        /// Extracted confirmation code, when one was shown.
        confirmation: Option<String>,
    },
    /// The commit flow ran but no confirmation was shown.
    NotConfirmed,
}

struct LoginForm {
    primary: Locator,
    secondary: Locator,
    submit: Option<Locator>,
}

/// One automation session bound to a single page.
pub struct AutomationSession {
    page: Box<dyn PortalPage>,
    settings: Arc<SessionSettings>,
    pacer: Arc<RateLimiter>,
    gate: PauseGate,
    job_id: JobId,
    history: Vec<SessionState>,
}

impl std::fmt::Debug for AutomationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationSession")
            .field("job_id", &self.job_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AutomationSession {
    /// Wrap an opened page.
    #[must_use]
    pub fn new(
        page: Box<dyn PortalPage>,
        settings: Arc<SessionSettings>,
        pacer: Arc<RateLimiter>,
        gate: PauseGate,
        job_id: JobId,
    ) -> Self {
        Self {
            page,
            settings,
            pacer,
            gate,
            job_id,
            history: vec![SessionState::Init],
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.history.last().copied().unwrap_or(SessionState::Init)
    }

    /// Every state entered so far, in order.
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn transition(&mut self, next: SessionState) {
        debug!(job_id = self.job_id, from = ?self.state(), to = ?next, "session transition");
        self.history.push(next);
    }

    async fn settle(base: Duration) {
        if base.is_zero() {
            return;
        }
        let extra = rand::rng().random_range(0..=base.as_millis() / 2);
        sleep(base + Duration::from_millis(u64::try_from(extra).unwrap_or(0))).await;
    }

    async fn before_action(&mut self, stage: &str) -> Result<(), SessionError> {
        self.gate.check(stage)?;
        self.pacer.acquire_with_jitter().await;
        self.gate.check(stage)
    }

    async fn detect(&mut self, stage: &str) -> Result<(), SessionError> {
        let html = self.page.content().await?;
        if let Some(err) = self.settings.detector().scan(&html, stage) {
            self.transition(SessionState::DefensiveSignalDetected);
            warn!(job_id = self.job_id, stage, error = %err, "defensive signal");
            return Err(err);
        }
        Ok(())
    }

    async fn readiness_gate(&mut self) -> Result<(), PageError> {
        loop {
            let html = self.page.content().await?;
            if !self
                .settings
                .layout
                .loading_markers
                .iter()
                .any(|m| html.contains(m.as_str()))
            {
                break;
            }
            sleep(Duration::from_millis(200)).await;
        }
        let ready = self.settings.layout.ready.clone();
        for raw in &ready {
            if self.page.is_visible(&Locator::parse(raw)).await? {
                return Ok(());
            }
        }
        let max = self.settings.ready_max;
        self.page.wait_for_network_idle(max).await?;
        Ok(())
    }

    async fn await_ready(&mut self, stage: &str) -> Result<(), SessionError> {
        let max = self.settings.ready_max;
        match timeout(max, self.readiness_gate()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                self.detect(stage).await?;
                return Err(SessionError::ServiceClosed {
                    stage: stage.to_string(),
                });
            }
        }
        self.transition(SessionState::ReadinessConfirmed);
        Self::settle(self.settings.post_nav_settle).await;
        Ok(())
    }

    async fn navigate(&mut self, url: &str, stage: &str) -> Result<(), SessionError> {
        self.before_action(stage).await?;
        let nav_timeout = self.settings.nav_timeout;
        match timeout(nav_timeout, self.page.goto(url, nav_timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(PageError::Timeout(_))) | Err(_) => {
                return Err(SessionError::ServiceClosed {
                    stage: stage.to_string(),
                })
            }
            Ok(Err(err)) => return Err(err.into()),
        }
        self.transition(SessionState::Navigated);
        self.detect(stage).await?;
        self.await_ready(stage).await?;
        self.detect(stage).await
    }

    async fn click(&mut self, locator: &Locator, stage: &str) -> Result<(), SessionError> {
        self.before_action(stage).await?;
        self.page.click(locator).await?;
        Self::settle(self.settings.click_settle).await;
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, value: &str, stage: &str) -> Result<(), SessionError> {
        self.before_action(stage).await?;
        self.page.fill(locator, value).await?;
        Self::settle(self.settings.click_settle).await;
        Ok(())
    }

    async fn first_visible(&mut self, raw: &[String]) -> Result<Option<Locator>, SessionError> {
        for item in raw {
            let locator = Locator::parse(item);
            if self.page.is_visible(&locator).await? {
                return Ok(Some(locator));
            }
        }
        Ok(None)
    }

    async fn find_field(
        &mut self,
        labels: &[String],
        selectors: &[String],
        kind: FieldKind,
    ) -> Result<Option<Locator>, SessionError> {
        for label in labels {
            let locator = Locator::Label(label.clone());
            if self.page.is_visible(&locator).await? {
                return Ok(Some(locator));
            }
        }
        if let Some(found) = self.first_visible(selectors).await? {
            return Ok(Some(found));
        }
        let heuristic = Locator::Heuristic(kind);
        Ok(self.page.is_visible(&heuristic).await?.then_some(heuristic))
    }

    async fn dismiss_banners(&mut self, stage: &str) {
        let consent = self.settings.layout.consent.clone();
        for raw in &consent {
            let locator = Locator::parse(raw);
            if matches!(self.page.is_visible(&locator).await, Ok(true)) {
                if let Err(err) = self.click(&locator, stage).await {
                    debug!(job_id = self.job_id, error = %err, "consent banner click failed");
                }
            }
        }
    }

    async fn locate_form(&mut self, job: &Job, stage: &str) -> Result<LoginForm, SessionError> {
        self.dismiss_banners(stage).await;
        let layout = self.settings.layout.clone();
        let primary = self
            .find_field(&layout.primary_labels, &layout.primary_selectors, FieldKind::Primary)
            .await?
            .ok_or_else(|| SessionError::LayoutIssue(format!("{stage}: primary field not found")))?;

        let secondary = match job.mode {
            JobMode::Swap { .. } => {
                self.find_field(
                    &layout.reference_labels,
                    &layout.reference_selectors,
                    FieldKind::BookingReference,
                )
                .await?
            }
            JobMode::NewBooking { .. } => {
                let direct = self
                    .find_field(
                        &layout.qualification_labels,
                        &layout.qualification_selectors,
                        FieldKind::Qualification,
                    )
                    .await?;
                match direct {
                    Some(found) => Some(found),
                    None => match self.first_visible(&layout.qualification_toggle).await? {
                        Some(toggle) => {
                            self.click(&toggle, stage).await?;
                            self.await_ready(stage).await?;
                            self.find_field(
                                &layout.qualification_labels,
                                &layout.qualification_selectors,
                                FieldKind::Qualification,
                            )
                            .await?
                        }
                        None => None,
                    },
                }
            }
        }
        .ok_or_else(|| SessionError::LayoutIssue(format!("{stage}: credential field not found")))?;

        let submit = self.first_visible(&layout.submit).await?;
        self.transition(SessionState::FormLocated);
        Ok(LoginForm {
            primary,
            secondary,
            submit,
        })
    }

    /// Navigate to the mode's entry page and sign in with the job's credentials.
    pub async fn login(&mut self, job: &Job) -> Result<(), SessionError> {
        let stage = match job.mode {
            JobMode::Swap { .. } => "login_swap",
            JobMode::NewBooking { .. } => "login_new",
        };
        let url = self.settings.entry_url(&job.mode).to_string();
        self.navigate(&url, stage).await?;

        let attempts = self.settings.form_attempts;
        let mut form = None;
        let mut last_issue = String::new();
        for attempt in 1..=attempts {
            match self.locate_form(job, stage).await {
                Ok(found) => {
                    form = Some(found);
                    break;
                }
                Err(SessionError::LayoutIssue(msg)) => {
                    self.transition(SessionState::LayoutIssue);
                    debug!(job_id = self.job_id, attempt, issue = %msg, "login form not located");
                    last_issue = msg;
                    if attempt < attempts {
                        sleep(self.settings.form_backoff).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        let form = form.ok_or_else(|| {
            SessionError::LayoutIssue(format!(
                "layout changed: {last_issue} (gave up after {attempts})"
            ))
        })?;

        self.fill(&form.primary, &job.credentials.primary, stage).await?;
        self.fill(&form.secondary, job.mode.secondary(), stage).await?;
        self.transition(SessionState::FieldsFilled);
        if let Some(submit) = &form.submit {
            self.click(submit, stage).await?;
        }
        self.transition(SessionState::Submitted);
        self.await_ready(stage).await?;
        self.detect(stage).await
    }

    /// Read offered slots for `resource`.
    pub async fn read_availability(&mut self, resource: &str) -> Result<Vec<Slot>, SessionError> {
        let stage = "search";
        self.before_action(stage).await?;
        let slots = self.page.search_resource(resource).await?;
        Self::settle(self.settings.post_nav_settle).await;
        self.detect(stage).await?;
        self.transition(SessionState::ResultsRead);
        Ok(slots)
    }

    /// Commit `slot` for `job`. Requires a prior [`Self::login`].
    pub async fn commit(&mut self, job: &Job, slot: &Slot) -> Result<CommitOutcome, SessionError> {
        let stage = "commit";
        self.before_action(stage).await?;
        self.page.select_slot(slot).await?;
        Self::settle(self.settings.click_settle).await;
        self.detect(stage).await?;

        let layout = self.settings.layout.clone();
        let controls = match job.mode {
            JobMode::Swap { .. } => &layout.confirm_change,
            JobMode::NewBooking { .. } => &layout.complete_booking,
        };
        let control = self.first_visible(controls).await?.ok_or_else(|| {
            SessionError::LayoutIssue(format!("{stage}: commit control not found"))
        })?;
        self.click(&control, stage).await?;
        self.await_ready(stage).await?;
        self.detect(stage).await?;

        for attempt in 1..=self.settings.confirmation_attempts {
            let html = self.page.content().await?;
            let confirmed = layout
                .success_markers
                .iter()
                .any(|m| html.to_lowercase().contains(&m.to_lowercase()));
            let code = self.settings.extract_confirmation(&html);
            let done = match job.mode {
                JobMode::Swap { .. } => confirmed,
                JobMode::NewBooking { .. } => code.is_some() || confirmed,
            };
            if done {
                self.transition(SessionState::Success);
                return Ok(CommitOutcome::Booked { confirmation: code });
            }
            if attempt < self.settings.confirmation_attempts {
                sleep(Duration::from_secs(1)).await;
            }
        }
        Ok(CommitOutcome::NotConfirmed)
    }

    /// Release the page.
    pub async fn close(mut self) {
        self.page.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings::from_config(&SessionConfig::default()).unwrap()
    }

    #[test]
    fn locator_notation() {
        assert_eq!(Locator::parse("text=Continue"), Locator::Text("Continue".into()));
        assert_eq!(Locator::parse("#main"), Locator::Css("#main".into()));
    }

    #[test]
    fn confirmation_patterns_apply_in_order() {
        let s = settings();
        assert_eq!(
            s.extract_confirmation("<p>Booking reference: AB12CD34</p>").as_deref(),
            Some("AB12CD34")
        );
        assert_eq!(
            s.extract_confirmation("<p>Your number 55554444 is ready</p>").as_deref(),
            Some("55554444")
        );
        assert!(s.extract_confirmation("<p>nothing here</p>").is_none());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut cfg = SessionConfig::default();
        cfg.layout.confirmation_patterns = vec!["(".into()];
        assert!(SessionSettings::from_config(&cfg).is_err());
    }

    #[test]
    fn entry_url_depends_on_mode() {
        let s = settings();
        let swap = JobMode::Swap {
            booking_reference: "12345678".into(),
        };
        let new = JobMode::NewBooking {
            qualification: "Q".into(),
        };
        assert_eq!(s.entry_url(&swap), s.url_change);
        assert_eq!(s.entry_url(&new), s.url_book);
    }
}
