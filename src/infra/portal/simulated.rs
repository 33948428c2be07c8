//! Scripted portal driver.
//!
//! Renders the configured [`PortalLayout`] as a fake page: every configured label and
//! selector is "visible", navigation produces HTML that the signal detector and the
//! confirmation extractor can read, and each resource follows a script. The binary
//! runs it in `PORTAL_MODE=simulate`; tests use it to drive every failure path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveTime};
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::core::error::PageError;
use crate::core::job::{Job, Slot};
use crate::core::session::{Locator, PortalLayout, PortalPage, SessionFactory};
use crate::util::clock::SharedClock;

/// How the portal behaves for one resource during one session.
#[derive(Debug, Clone, PartialEq)]
pub enum PortalScript {
    /// Offer exactly these slots.
    Slots(Vec<Slot>),
    /// Offer nothing.
    NoSlots,
    /// Render a challenge wall on first navigation.
    Challenge,
    /// Render a traffic-block page on first navigation.
    Blocked,
    /// Page loads but none of the form fields exist.
    LayoutMissing,
    /// Navigation never completes.
    NavTimeout,
    /// The availability search times out.
    SearchTimeout,
    /// Offer one random slot with probability `slot_rate`.
    Random {
        /// Probability of a slot per search.
        slot_rate: f64,
    },
}

const CHALLENGE_PAGE: &str =
    "<html><body><div class=\"cf-challenge\">Checking your browser</div></body></html>";
const BLOCKED_PAGE: &str = "<html><body><h1>Access denied</h1><p>Request blocked.</p></body></html>";
const FORM_PAGE: &str = "<html><body><main id=\"main-content\"><form></form></main></body></html>";
const EMPTY_PAGE: &str = "<html><body><main><p>Service update in progress</p></main></body></html>";
const RESULTS_PAGE: &str = "<html><body><main><table class=\"slots\"></table></main></body></html>";
const FAILED_PAGE: &str = "<html><body><main><p>Something went wrong. Please try again.</p></main></body></html>";

/// Counters shared by every page of a factory.
#[derive(Debug, Default)]
pub struct PortalStats {
    opened: AtomicUsize,
    open_now: AtomicUsize,
    peak_open: AtomicUsize,
    actions: AtomicUsize,
    commits: AtomicUsize,
    per_resource: Mutex<HashMap<String, usize>>,
}

impl PortalStats {
    /// Sessions opened in total.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions.
    #[must_use]
    pub fn peak_open(&self) -> usize {
        self.peak_open.load(Ordering::SeqCst)
    }

    /// Network-visible actions (goto, fill, click, search, select).
    #[must_use]
    pub fn actions(&self) -> usize {
        self.actions.load(Ordering::SeqCst)
    }

    /// Successful commits.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Sessions opened for `resource`.
    #[must_use]
    pub fn opened_for(&self, resource: &str) -> usize {
        self.per_resource
            .lock()
            .get(&resource.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    fn on_open(&self, resource: Option<&str>) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_open.fetch_max(now, Ordering::SeqCst);
        if let Some(resource) = resource {
            *self
                .per_resource
                .lock()
                .entry(resource.to_lowercase())
                .or_default() += 1;
        }
    }

    fn on_close(&self) {
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }

    fn on_action(&self) {
        self.actions.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds [`SimulatedPortal`] pages according to per-resource scripts.
pub struct SimulatedPortalFactory {
    layout: PortalLayout,
    clock: SharedClock,
    default_script: PortalScript,
    scripts: Mutex<HashMap<String, Vec<PortalScript>>>,
    commit_succeeds: Mutex<bool>,
    search_delay: Duration,
    consent_banner: bool,
    stats: Arc<PortalStats>,
}

impl std::fmt::Debug for SimulatedPortalFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPortalFactory")
            .field("default_script", &self.default_script)
            .field("search_delay", &self.search_delay)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl SimulatedPortalFactory {
    /// Factory whose unscripted resources offer nothing.
    #[must_use]
    pub fn new(layout: PortalLayout, clock: SharedClock) -> Self {
        Self {
            layout,
            clock,
            default_script: PortalScript::NoSlots,
            scripts: Mutex::new(HashMap::new()),
            commit_succeeds: Mutex::new(true),
            search_delay: Duration::ZERO,
            consent_banner: false,
            stats: Arc::new(PortalStats::default()),
        }
    }

    /// Script used for resources without their own.
    #[must_use]
    pub fn with_default(mut self, script: PortalScript) -> Self {
        self.default_script = script;
        self
    }

    /// Delay every availability search by `delay`.
    #[must_use]
    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = delay;
        self
    }

    /// Show a cookie banner that must be dismissed on each page.
    #[must_use]
    pub fn with_consent_banner(mut self) -> Self {
        self.consent_banner = true;
        self
    }

    /// Script every session for `resource`.
    pub fn script(&self, resource: &str, script: PortalScript) {
        self.scripts.lock().insert(resource.to_lowercase(), vec![script]);
    }

    /// Script successive sessions for `resource`; the last entry repeats.
    pub fn script_sequence(&self, resource: &str, scripts: Vec<PortalScript>) {
        self.scripts.lock().insert(resource.to_lowercase(), scripts);
    }

    /// Whether commits reach a confirmation page.
    pub fn set_commit_succeeds(&self, succeeds: bool) {
        *self.commit_succeeds.lock() = succeeds;
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<PortalStats> {
        Arc::clone(&self.stats)
    }

    fn next_script(&self, resource: Option<&str>) -> PortalScript {
        let Some(resource) = resource else {
            return self.default_script.clone();
        };
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(&resource.to_lowercase()) {
            Some(seq) if seq.len() > 1 => seq.remove(0),
            Some(seq) => seq.first().cloned().unwrap_or_else(|| self.default_script.clone()),
            None => self.default_script.clone(),
        }
    }
}

#[async_trait]
impl SessionFactory for SimulatedPortalFactory {
    async fn open(&self, job: &Job, resource: Option<&str>) -> Result<Box<dyn PortalPage>, PageError> {
        let script = self.next_script(resource);
        debug!(job_id = job.id, resource = resource.unwrap_or(""), ?script, "simulated session opened");
        self.stats.on_open(resource);
        Ok(Box::new(SimulatedPortal {
            layout: self.layout.clone(),
            script,
            resource: resource.map(str::to_string),
            job_id: job.id,
            html: String::new(),
            consent_visible: self.consent_banner,
            selected: None,
            commit_succeeds: *self.commit_succeeds.lock(),
            search_delay: self.search_delay,
            today: self.clock.now().date_naive(),
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }
}

/// One simulated browser page.
#[derive(Debug)]
pub struct SimulatedPortal {
    layout: PortalLayout,
    script: PortalScript,
    resource: Option<String>,
    job_id: u64,
    html: String,
    consent_visible: bool,
    selected: Option<Slot>,
    commit_succeeds: bool,
    search_delay: Duration,
    today: chrono::NaiveDate,
    stats: Arc<PortalStats>,
    closed: bool,
}

impl SimulatedPortal {
    fn form_rendered(&self) -> bool {
        !matches!(self.script, PortalScript::LayoutMissing) && self.html == FORM_PAGE
    }

    fn is_consent(&self, locator: &Locator) -> bool {
        self.layout
            .consent
            .iter()
            .any(|raw| Locator::parse(raw) == *locator)
    }

    fn in_layout(&self, locator: &Locator) -> bool {
        let l = &self.layout;
        match locator {
            Locator::Label(label) => l
                .primary_labels
                .iter()
                .chain(&l.reference_labels)
                .chain(&l.qualification_labels)
                .any(|known| known == label),
            Locator::Heuristic(_) => true,
            Locator::Css(_) | Locator::Text(_) => l
                .primary_selectors
                .iter()
                .chain(&l.reference_selectors)
                .chain(&l.qualification_selectors)
                .chain(&l.submit)
                .chain(&l.ready)
                .any(|raw| Locator::parse(raw) == *locator),
        }
    }

    fn commit_control(&self, locator: &Locator) -> bool {
        self.layout
            .confirm_change
            .iter()
            .chain(&self.layout.complete_booking)
            .any(|raw| Locator::parse(raw) == *locator)
    }

    fn random_slot(&self, resource: &str) -> Slot {
        let mut rng = rand::rng();
        let days = rng.random_range(1..=45);
        let hour = rng.random_range(8..=15);
        let minute = [0, 7, 14, 21, 28, 35, 42, 49, 56][rng.random_range(0..9)];
        Slot {
            resource: resource.to_string(),
            date: self.today.checked_add_days(Days::new(days)).unwrap_or(self.today),
            time: NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    fn success_page(&self) -> String {
        format!(
            "<html><body><main><h1>Booking confirmed</h1><p>Booking reference: SW{:06}</p></main></body></html>",
            self.job_id % 1_000_000
        )
    }
}

#[async_trait]
impl PortalPage for SimulatedPortal {
    async fn goto(&mut self, _url: &str, timeout: Duration) -> Result<(), PageError> {
        self.stats.on_action();
        match self.script {
            PortalScript::NavTimeout => {
                sleep(timeout).await;
                Err(PageError::Timeout("navigation".into()))
            }
            PortalScript::Challenge => {
                self.html = CHALLENGE_PAGE.to_string();
                Ok(())
            }
            PortalScript::Blocked => {
                self.html = BLOCKED_PAGE.to_string();
                Ok(())
            }
            PortalScript::LayoutMissing => {
                self.html = EMPTY_PAGE.to_string();
                Ok(())
            }
            _ => {
                self.html = FORM_PAGE.to_string();
                Ok(())
            }
        }
    }

    async fn content(&mut self) -> Result<String, PageError> {
        Ok(self.html.clone())
    }

    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, PageError> {
        if self.is_consent(locator) {
            return Ok(self.consent_visible);
        }
        if self.selected.is_some() && self.commit_control(locator) {
            return Ok(true);
        }
        Ok(self.form_rendered() && self.in_layout(locator))
    }

    async fn wait_for_network_idle(&mut self, _timeout: Duration) -> Result<bool, PageError> {
        Ok(true)
    }

    async fn fill(&mut self, locator: &Locator, _value: &str) -> Result<(), PageError> {
        self.stats.on_action();
        if self.form_rendered() && self.in_layout(locator) {
            Ok(())
        } else {
            Err(PageError::NotFound(format!("{locator:?}")))
        }
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), PageError> {
        self.stats.on_action();
        if self.is_consent(locator) {
            self.consent_visible = false;
            return Ok(());
        }
        if self.selected.is_some() && self.commit_control(locator) {
            self.html = if self.commit_succeeds {
                self.stats.commits.fetch_add(1, Ordering::SeqCst);
                self.success_page()
            } else {
                FAILED_PAGE.to_string()
            };
        }
        Ok(())
    }

    async fn search_resource(&mut self, resource: &str) -> Result<Vec<Slot>, PageError> {
        self.stats.on_action();
        if !self.search_delay.is_zero() {
            sleep(self.search_delay).await;
        }
        self.html = RESULTS_PAGE.to_string();
        match &self.script {
            PortalScript::Slots(slots) => Ok(slots.clone()),
            PortalScript::SearchTimeout => Err(PageError::Timeout("search".into())),
            PortalScript::Random { slot_rate } => {
                let hit = rand::rng().random_bool(slot_rate.clamp(0.0, 1.0));
                Ok(if hit { vec![self.random_slot(resource)] } else { Vec::new() })
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn select_slot(&mut self, slot: &Slot) -> Result<(), PageError> {
        self.stats.on_action();
        if self
            .resource
            .as_deref()
            .is_some_and(|r| !r.eq_ignore_ascii_case(&slot.resource))
        {
            return Err(PageError::NotFound(format!("slot on {}", slot.resource)));
        }
        self.selected = Some(slot.clone());
        self.html = RESULTS_PAGE.to_string();
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.on_close();
        }
    }
}

impl Drop for SimulatedPortal {
    fn drop(&mut self) {
        if !self.closed {
            self.stats.on_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::core::job::JobRecord;
    use crate::util::clock::ManualClock;

    fn factory() -> SimulatedPortalFactory {
        SimulatedPortalFactory::new(PortalLayout::default(), Arc::new(ManualClock::new(Utc::now())))
    }

    fn job() -> Job {
        Job::try_from(JobRecord {
            id: 1,
            booking_type: Some("swap".into()),
            licence_number: Some("LIC".into()),
            booking_reference: Some("12345678".into()),
            resources: vec!["Elgin".into()],
            ..JobRecord::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn scripted_slots_are_returned() {
        let f = factory();
        let slot = Slot {
            resource: "Elgin".into(),
            date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };
        f.script("elgin", PortalScript::Slots(vec![slot.clone()]));
        let mut page = f.open(&job(), Some("Elgin")).await.unwrap();
        page.goto("https://portal", Duration::from_secs(1)).await.unwrap();
        assert!(page.is_visible(&Locator::Label("Booking reference".into())).await.unwrap());
        assert_eq!(page.search_resource("Elgin").await.unwrap(), vec![slot]);
        page.close().await;
        assert_eq!(f.stats().opened_for("ELGIN"), 1);
    }

    #[tokio::test]
    async fn sequences_advance_and_last_repeats() {
        let f = factory();
        f.script_sequence("a", vec![PortalScript::Challenge, PortalScript::NoSlots]);
        assert_eq!(f.next_script(Some("a")), PortalScript::Challenge);
        assert_eq!(f.next_script(Some("a")), PortalScript::NoSlots);
        assert_eq!(f.next_script(Some("a")), PortalScript::NoSlots);
        assert_eq!(f.next_script(Some("b")), PortalScript::NoSlots);
    }

    #[tokio::test]
    async fn missing_layout_hides_fields() {
        let f = factory();
        f.script("x", PortalScript::LayoutMissing);
        let mut page = f.open(&job(), Some("x")).await.unwrap();
        page.goto("https://portal", Duration::from_secs(1)).await.unwrap();
        assert!(!page.is_visible(&Locator::Heuristic(crate::core::session::FieldKind::Primary)).await.unwrap());
    }

    #[tokio::test]
    async fn peak_tracks_open_pages() {
        let f = factory();
        let a = f.open(&job(), Some("x")).await.unwrap();
        let mut b = f.open(&job(), Some("y")).await.unwrap();
        b.close().await;
        drop(a);
        assert_eq!(f.stats().peak_open(), 2);
        assert_eq!(f.stats().opened(), 2);
    }
}
