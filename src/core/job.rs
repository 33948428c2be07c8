//! Job records as sent by the coordinator and their typed, validated form.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::error::JobValidationError;

/// Coordinator-assigned job identifier.
pub type JobId = u64;

/// Loose job record exactly as the coordinator serialises it.
///
/// Every field is optional on the wire; [`Job::try_from`] decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    /// Job identifier.
    pub id: JobId,
    /// `"swap"` or `"new"`.
    pub booking_type: Option<String>,
    /// Primary identity string.
    pub licence_number: Option<String>,
    /// Existing-booking reference (swap mode).
    pub booking_reference: Option<String>,
    /// Qualification credential (new-booking mode).
    #[serde(alias = "theory_pass")]
    pub qualification_reference: Option<String>,
    /// Contact address, passed through to the portal when asked.
    pub email: Option<String>,
    /// Ordered acceptable target resources.
    #[serde(alias = "centres")]
    pub resources: Vec<String>,
    /// Acceptable date range.
    pub date_window: Option<WindowRecord>,
    /// Acceptable time-of-day range.
    pub time_window: Option<WindowRecord>,
    /// Lifecycle status string.
    pub status: Option<String>,
    /// Last breadcrumb.
    pub last_event: Option<String>,
    /// Lease holder.
    pub locked_by: Option<String>,
    /// Lease expiry.
    #[serde(deserialize_with = "lenient_timestamp")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Creation time.
    #[serde(deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    #[serde(deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Per-job options.
    pub options: JobOptions,
}

/// Raw `{start, end}` pair before parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowRecord {
    /// Inclusive start.
    pub start: Option<String>,
    /// Inclusive end.
    pub end: Option<String>,
}

/// Per-job behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Commit a found slot automatically.
    pub auto_book: bool,
}

/// Lifecycle status mirrored to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed and being worked.
    Searching,
    /// A matching slot was observed.
    Found,
    /// A slot was committed.
    Booked,
    /// Commit was attempted and failed.
    Failed,
}

impl JobStatus {
    /// Wire string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Searching => "searching",
            Self::Found => "found",
            Self::Booked => "booked",
            Self::Failed => "failed",
        }
    }

    /// Parse a wire string; unknown values yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "searching" => Some(Self::Searching),
            "found" => Some(Self::Found),
            "booked" => Some(Self::Booked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether no further work is expected for the job.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Booked | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking mode with its mode-specific credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobMode {
    /// Move an existing booking to a better slot.
    Swap {
        /// Existing-booking reference (8 digits).
        booking_reference: String,
    },
    /// Acquire a brand-new booking.
    NewBooking {
        /// Qualification credential.
        qualification: String,
    },
}

impl JobMode {
    /// Short label used in logs and notifications.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Swap { .. } => "swap",
            Self::NewBooking { .. } => "new",
        }
    }

    /// The mode-specific secondary credential.
    #[must_use]
    pub fn secondary(&self) -> &str {
        match self {
            Self::Swap { booking_reference } => booking_reference,
            Self::NewBooking { qualification } => qualification,
        }
    }
}

/// Credential bundle shared by both modes.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Primary identity string.
    pub primary: String,
    /// Optional contact address.
    pub email: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("primary", &mask(&self.primary))
            .field("email", &self.email.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    /// First acceptable day.
    pub start: NaiveDate,
    /// Last acceptable day.
    pub end: NaiveDate,
}

impl DateWindow {
    /// Inclusive length in days (at least 1).
    #[must_use]
    pub fn length_days(&self) -> i64 {
        ((self.end - self.start).num_days() + 1).max(1)
    }

    /// Whether `day` falls inside the window.
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// Time-of-day range; an end before the start wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Earliest acceptable time.
    pub start: NaiveTime,
    /// Latest acceptable time.
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Window length in minutes.
    #[must_use]
    pub fn length_minutes(&self) -> i64 {
        let minutes = (self.end - self.start).num_minutes();
        if minutes >= 0 {
            minutes
        } else {
            minutes + 24 * 60
        }
    }

    /// Whether `time` falls inside the window.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// Lease fields stamped by the coordinator on claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lease {
    /// Worker holding the lease.
    pub locked_by: Option<String>,
    /// When the lease lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Validated job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Identifier.
    pub id: JobId,
    /// Mode and its credential.
    pub mode: JobMode,
    /// Shared credentials.
    pub credentials: Credentials,
    /// Acceptable resources, normalised.
    pub resources: Vec<String>,
    /// Optional date preference.
    pub date_window: Option<DateWindow>,
    /// Optional time preference.
    pub time_window: Option<TimeWindow>,
    /// Status as claimed.
    pub status: JobStatus,
    /// Breadcrumb as claimed.
    pub last_event: Option<String>,
    /// Lease stamped by the coordinator.
    pub lease: Lease,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    pub updated_at: Option<DateTime<Utc>>,
    /// Options.
    pub options: JobOptions,
}

impl TryFrom<JobRecord> for Job {
    type Error = JobValidationError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let primary = non_empty(record.licence_number.as_deref())
            .ok_or(JobValidationError::MissingLicence)?
            .to_string();

        let mode = match record
            .booking_type
            .as_deref()
            .map(|t| t.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("swap") => {
                let reference = non_empty(record.booking_reference.as_deref())
                    .filter(|r| r.len() == 8 && r.bytes().all(|b| b.is_ascii_digit()))
                    .ok_or(JobValidationError::BadBookingReference)?;
                JobMode::Swap {
                    booking_reference: reference.to_string(),
                }
            }
            Some("new" | "") | None => {
                let qualification = non_empty(record.qualification_reference.as_deref())
                    .ok_or(JobValidationError::MissingQualification)?;
                JobMode::NewBooking {
                    qualification: qualification.to_string(),
                }
            }
            Some(other) => return Err(JobValidationError::UnknownMode(other.to_string())),
        };

        Ok(Self {
            id: record.id,
            mode,
            credentials: Credentials {
                primary,
                email: non_empty(record.email.as_deref()).map(str::to_string),
            },
            resources: normalize_resources(&record.resources),
            date_window: record.date_window.as_ref().and_then(parse_date_window),
            time_window: record.time_window.as_ref().and_then(parse_time_window),
            status: record
                .status
                .as_deref()
                .and_then(JobStatus::parse)
                .unwrap_or(JobStatus::Searching),
            last_event: record.last_event,
            lease: Lease {
                locked_by: record.locked_by,
                expires_at: record.lease_expires_at,
            },
            created_at: record.created_at,
            updated_at: record.updated_at,
            options: record.options,
        })
    }
}

impl Job {
    /// Identity used by the identity mutex and alert debounce.
    #[must_use]
    pub fn identity_key(&self) -> String {
        normalize_identity(self.mode.secondary()).unwrap_or_else(|| format!("job{}", self.id))
    }

    /// Whether a slot satisfies the job's date and time preferences.
    #[must_use]
    pub fn accepts(&self, slot: &Slot) -> bool {
        self.date_window.is_none_or(|w| w.contains(slot.date))
            && self.time_window.is_none_or(|w| w.contains(slot.time))
    }
}

impl JobRecord {
    /// Identity key computed from the raw record, so records that fail validation
    /// still serialise against the right identity.
    #[must_use]
    pub fn identity_key(&self) -> String {
        let secondary = match self.booking_type.as_deref().map(str::trim) {
            Some(t) if t.eq_ignore_ascii_case("swap") => self.booking_reference.as_deref(),
            _ => self.qualification_reference.as_deref(),
        };
        secondary
            .and_then(normalize_identity)
            .unwrap_or_else(|| format!("job{}", self.id))
    }

    /// Parsed status, if recognised.
    #[must_use]
    pub fn parsed_status(&self) -> Option<JobStatus> {
        self.status.as_deref().and_then(JobStatus::parse)
    }
}

/// One available appointment slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    /// Resource offering the slot.
    pub resource: String,
    /// Day.
    pub date: NaiveDate,
    /// Start time.
    pub time: NaiveTime,
}

impl Slot {
    /// Signature used to deduplicate repeated observations.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}|{}|{}", self.resource, self.date, self.time.format("%H:%M"))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time.format("%H:%M"))
    }
}

/// Leading words the portal omits from resource names.
const RESOURCE_QUALIFIERS: [&str; 3] = ["london", "city", "borough"];

/// Collapse whitespace, strip leading qualifiers ("London Borough X" is "X"), then
/// drop empties and case-insensitive duplicates, keeping order.
#[must_use]
pub fn normalize_resources(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .map(|r| {
            let all: Vec<&str> = r.split_whitespace().collect();
            let mut words = all.as_slice();
            while words.len() >= 2 && RESOURCE_QUALIFIERS.contains(&words[0].to_lowercase().as_str()) {
                words = &words[1..];
            }
            words.join(" ")
        })
        .filter(|r| !r.is_empty())
        .filter(|r| seen.insert(r.to_lowercase()))
        .collect()
}

/// Identity string without whitespace, upper-cased and capped at 20 characters.
#[must_use]
pub fn normalize_identity(raw: &str) -> Option<String> {
    let key: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .take(20)
        .collect::<String>()
        .to_uppercase();
    (!key.is_empty()).then_some(key)
}

/// Parse an RFC 3339 timestamp, or a naive one taken as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(de: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn parse_date_window(raw: &WindowRecord) -> Option<DateWindow> {
    let start = NaiveDate::parse_from_str(raw.start.as_deref()?.trim(), "%Y-%m-%d").ok()?;
    let end = raw
        .end
        .as_deref()
        .and_then(|e| NaiveDate::parse_from_str(e.trim(), "%Y-%m-%d").ok())
        .unwrap_or(start);
    (start <= end).then_some(DateWindow { start, end })
}

fn parse_time_window(raw: &WindowRecord) -> Option<TimeWindow> {
    Some(TimeWindow {
        start: parse_time(raw.start.as_deref()?)?,
        end: parse_time(raw.end.as_deref()?)?,
    })
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn mask(raw: &str) -> String {
    let visible: String = raw.chars().take(3).collect();
    format!("{visible}***")
}
