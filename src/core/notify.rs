//! Operator notifications: message model, sink port and debounce wrapper.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::core::job::{Job, JobId, JobMode, Slot};
use crate::util::clock::SharedClock;
use crate::util::signing::ResumeLinkSigner;
use crate::util::ttl_cache::TtlCache;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A challenge wall needs a human.
    ChallengeRequired,
    /// A matching slot was seen.
    SlotFound,
    /// A slot was committed.
    Booked,
    /// A commit attempt failed.
    BookingFailed,
    /// The job keeps failing in a way automation cannot fix.
    NeedsAttention,
    /// Periodic reminder while a found slot may still be held.
    AssistReminder,
    /// The assist window elapsed without a booking.
    AssistEnded,
}

impl NotificationKind {
    /// Whether repeats for the same identity are suppressed inside the debounce window.
    ///
    /// Slot alerts are deduplicated by slot signature upstream, so a different slot
    /// always gets through.
    #[must_use]
    pub const fn debounced(self) -> bool {
        !matches!(
            self,
            Self::SlotFound | Self::Booked | Self::AssistReminder | Self::AssistEnded
        )
    }

    const fn headline(self) -> &'static str {
        match self {
            Self::ChallengeRequired => "Human verification required",
            Self::SlotFound => "Slot found",
            Self::Booked => "Booking confirmed",
            Self::BookingFailed => "Booking failed",
            Self::NeedsAttention => "Job needs attention",
            Self::AssistReminder => "Slot may still be held",
            Self::AssistEnded => "Assist window ended",
        }
    }
}

/// A one-way message to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Kind.
    pub kind: NotificationKind,
    /// Job concerned.
    pub job_id: JobId,
    /// Identity used for debounce.
    pub identity: String,
    /// `swap` or `new`.
    pub mode: &'static str,
    /// Resource concerned, if any.
    pub resource: Option<String>,
    /// Slot concerned, if any.
    pub slot: Option<Slot>,
    /// Portal deep link for manual action.
    pub portal_link: Option<String>,
    /// Signed link that resumes the job immediately.
    pub resume_link: Option<String>,
    /// Free-form extra line.
    pub detail: Option<String>,
}

impl Notification {
    /// Bare notification for `job`.
    #[must_use]
    pub fn for_job(kind: NotificationKind, job: &Job) -> Self {
        Self {
            kind,
            job_id: job.id,
            identity: job.identity_key(),
            mode: job.mode.label(),
            resource: None,
            slot: None,
            portal_link: None,
            resume_link: None,
            detail: None,
        }
    }

    /// Attach the resource.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach the slot (and its resource).
    #[must_use]
    pub fn with_slot(mut self, slot: &Slot) -> Self {
        self.resource = Some(slot.resource.clone());
        self.slot = Some(slot.clone());
        self
    }

    /// Attach a detail line.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach portal and resume links.
    #[must_use]
    pub fn with_links(mut self, links: &LinkBuilder, job: &Job) -> Self {
        self.portal_link = Some(links.portal_link(job));
        self.resume_link = links.resume_link(job);
        self
    }

    /// Plain-text message body.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "{}\nJob #{} ({})",
            self.kind.headline(),
            self.job_id,
            self.mode
        );
        if let Some(resource) = &self.resource {
            let _ = write!(out, "\nResource: {resource}");
        }
        if let Some(slot) = &self.slot {
            let _ = write!(out, "\nSlot: {slot}");
        }
        if let Some(detail) = &self.detail {
            let _ = write!(out, "\n{detail}");
        }
        if let Some(link) = &self.portal_link {
            let _ = write!(out, "\nOpen the portal: {link}");
        }
        if let Some(link) = &self.resume_link {
            let _ = write!(out, "\nResume this job now: {link}");
        }
        out
    }
}

/// One-way, best-effort delivery. Must not block the caller.
pub trait NotificationSink: Send + Sync {
    /// Deliver or drop `notification`.
    fn notify(&self, notification: Notification);
}

/// Builds the links embedded in notifications.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    url_change: String,
    url_book: String,
    signer: Option<ResumeLinkSigner>,
}

impl LinkBuilder {
    /// Links into the portal, plus signed resume links when a signer is configured.
    #[must_use]
    pub fn new(url_change: &str, url_book: &str, signer: Option<ResumeLinkSigner>) -> Self {
        Self {
            url_change: url_change.to_string(),
            url_book: url_book.to_string(),
            signer,
        }
    }

    /// Mode-specific portal entry with `sid` appended.
    #[must_use]
    pub fn portal_link(&self, job: &Job) -> String {
        let base = match job.mode {
            JobMode::Swap { .. } => &self.url_change,
            JobMode::NewBooking { .. } => &self.url_book,
        };
        let sep = if base.contains('?') { '&' } else { '?' };
        format!("{base}{sep}sid={}", job.id)
    }

    /// Signed resume link, if configured.
    #[must_use]
    pub fn resume_link(&self, job: &Job) -> Option<String> {
        self.signer
            .as_ref()
            .map(|s| s.link(job.id, &job.identity_key()))
    }
}

/// Suppresses repeats of one kind for one identity within a window.
pub struct DebouncedSink {
    inner: Arc<dyn NotificationSink>,
    recent: TtlCache<(String, NotificationKind), ()>,
}

impl std::fmt::Debug for DebouncedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedSink")
            .field("tracked", &self.recent.len())
            .finish_non_exhaustive()
    }
}

impl DebouncedSink {
    /// Wrap `inner` with a `window`-long debounce.
    #[must_use]
    pub fn new(inner: Arc<dyn NotificationSink>, window: chrono::Duration, clock: SharedClock) -> Self {
        Self {
            inner,
            recent: TtlCache::new(window, 4096, clock),
        }
    }
}

impl NotificationSink for DebouncedSink {
    fn notify(&self, notification: Notification) {
        if notification.kind.debounced()
            && !self
                .recent
                .insert_if_absent((notification.identity.clone(), notification.kind), ())
        {
            tracing::debug!(
                job_id = notification.job_id,
                kind = ?notification.kind,
                "notification debounced"
            );
            return;
        }
        self.inner.notify(notification);
    }
}
