//! Wire models for the coordinator's worker API.

use serde::{Deserialize, Serialize};

use crate::core::coordinator::{RemoteControls, StatusUpdate};
use crate::core::job::JobRecord;

/// `POST /api/worker/claim` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Maximum jobs to hand out.
    pub limit: usize,
    /// Claiming worker.
    pub worker_id: String,
}

/// `POST /api/worker/claim` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimResponse {
    /// Claimed records, already marked `searching`.
    pub items: Vec<JobRecord>,
}

/// `GET /api/worker/controls` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsResponse {
    /// Global pause.
    pub pause_all: bool,
    /// Resource prefixes to scan first.
    #[serde(alias = "priority_centres")]
    pub priority_resources: Vec<String>,
    /// Quiet-hours override.
    pub quiet_hours: Option<String>,
}

impl From<ControlsResponse> for RemoteControls {
    fn from(resp: ControlsResponse) -> Self {
        Self {
            pause_all: resp.pause_all,
            priority_resources: resp
                .priority_resources
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            quiet_hours: resp.quiet_hours.filter(|q| !q.trim().is_empty()),
        }
    }
}

/// `POST /api/worker/searches/{id}/event` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReport {
    /// Breadcrumb.
    pub event: String,
}

/// `POST /api/worker/searches/{id}/status` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// New status, omitted for event-only reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Breadcrumb.
    pub event: String,
    /// `"<resource> <date> <HH:MM>"` for found and booked transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    /// Confirmation code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
}

impl From<&StatusUpdate> for StatusReport {
    fn from(update: &StatusUpdate) -> Self {
        Self {
            status: update.status.map(|s| s.as_str().to_string()),
            event: update.event.clone(),
            slot: update
                .slot
                .as_ref()
                .map(|slot| format!("{} {slot}", slot.resource)),
            confirmation: update.confirmation.clone(),
        }
    }
}
