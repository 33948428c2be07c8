//! Port to the coordinating service that owns job storage.

use async_trait::async_trait;

use crate::core::error::CoordinatorError;
use crate::core::job::{JobId, JobRecord, JobStatus, Slot};

/// Control flags as served by the coordinator, before merging with local config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteControls {
    /// Stop all work as soon as possible.
    pub pause_all: bool,
    /// Resource prefixes to scan first. Empty means "keep the configured list".
    pub priority_resources: Vec<String>,
    /// Quiet-hours override in `"22-6,13-14"` form.
    pub quiet_hours: Option<String>,
}

/// A status transition plus the breadcrumb explaining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New status; `None` reports the event only.
    pub status: Option<JobStatus>,
    /// Breadcrumb.
    pub event: String,
    /// Slot involved, for found/booked transitions.
    pub slot: Option<Slot>,
    /// Confirmation code extracted after a commit.
    pub confirmation: Option<String>,
}

impl StatusUpdate {
    /// Status change with a breadcrumb.
    #[must_use]
    pub fn new(status: JobStatus, event: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            event: event.into(),
            slot: None,
            confirmation: None,
        }
    }

    /// Attach the slot.
    #[must_use]
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Attach a confirmation code, if any.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: Option<String>) -> Self {
        self.confirmation = confirmation;
        self
    }
}

/// Operations the engine needs from the coordinator.
///
/// Implementations are expected to retry transient failures themselves; errors
/// returned here are final for the call.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Claim up to `limit` jobs for `worker_id`. Claimed jobs are marked `searching`.
    async fn claim(&self, limit: usize, worker_id: &str) -> Result<Vec<JobRecord>, CoordinatorError>;

    /// Current control flags.
    async fn controls(&self) -> Result<RemoteControls, CoordinatorError>;

    /// Append a breadcrumb to the job's event log.
    async fn post_event(&self, job_id: JobId, event: &str) -> Result<(), CoordinatorError>;

    /// Change job status (and record the event).
    async fn set_status(&self, job_id: JobId, update: &StatusUpdate) -> Result<(), CoordinatorError>;
}
