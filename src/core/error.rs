//! Error types for engine, coordinator and session operations.

use thiserror::Error;

/// Errors produced by engine plumbing (configuration, coordinator, internal).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration could not be loaded or failed validation.
    #[error("config error: {0}")]
    Config(String),
    /// Coordinator call failed after retries.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
    /// Unexpected internal failure with context.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures talking to the coordinating service.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No API base URL configured.
    #[error("API base URL not set")]
    NotConfigured,
    /// Transport-level failure (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status.
    #[error("unexpected status {status} from {path}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request path.
        path: String,
    },
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The coordinator does not know the job.
    #[error("job not found: {0}")]
    JobNotFound(u64),
}

/// Reasons a coordinator job record cannot be turned into a runnable job.
///
/// The `Display` form is the breadcrumb reported back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobValidationError {
    /// Primary identity string missing.
    #[error("missing_licence_number")]
    MissingLicence,
    /// Swap job without a well-formed booking reference.
    #[error("missing_or_bad_booking_reference")]
    BadBookingReference,
    /// New-booking job without a qualification reference.
    #[error("missing_qualification_reference")]
    MissingQualification,
    /// Unknown booking mode string.
    #[error("unknown_booking_type:{0}")]
    UnknownMode(String),
}

/// Errors raised by a [`crate::core::session::PortalPage`] driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    /// Navigation or wait exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The requested element does not exist on the page.
    #[error("element not found: {0}")]
    NotFound(String),
    /// Any other driver failure.
    #[error("driver error: {0}")]
    Driver(String),
}

/// Outcome taxonomy of an automation session step.
///
/// Callers branch on the variant and consult [`SessionError::policy`] rather than
/// hard-coding retry and cooldown rules at each call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A challenge wall was rendered.
    #[error("challenge at {stage}")]
    DefensiveSignal {
        /// Session stage where it was seen.
        stage: String,
    },
    /// A traffic block page was rendered.
    #[error("blocked at {stage}")]
    Blocked {
        /// Session stage where it was seen.
        stage: String,
    },
    /// An expected element could not be located with any strategy.
    #[error("layout issue: {0}")]
    LayoutIssue(String),
    /// The portal did not become usable (navigation timeout, readiness timeout).
    #[error("service closed at {stage}")]
    ServiceClosed {
        /// Session stage where it happened.
        stage: String,
    },
    /// A bounded wait other than navigation timed out.
    #[error("timeout at {stage}")]
    Timeout {
        /// Session stage where it happened.
        stage: String,
    },
    /// Global pause or shutdown observed before a network-visible action.
    #[error("paused before {stage}")]
    Paused {
        /// Action that was about to run.
        stage: String,
    },
    /// Other driver failure.
    #[error("driver: {0}")]
    Driver(String),
}

/// What the runner must do when a session step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct FailurePolicy {
    /// Retry the resource within the current pass.
    pub retry_in_pass: bool,
    /// Stop attempting further resources for this job in this pass.
    pub ends_pass: bool,
    /// Count one failure toward the resource's breaker.
    pub counts_failure: bool,
    /// Put the resource into cooldown immediately.
    pub trips_resource: bool,
    /// Impose the global challenge cooldown.
    pub trips_global: bool,
    /// Alert a human operator.
    pub notify: bool,
}

impl SessionError {
    /// Policy row for this failure.
    #[must_use]
    pub const fn policy(&self) -> FailurePolicy {
        match self {
            Self::DefensiveSignal { .. } => FailurePolicy {
                retry_in_pass: false,
                ends_pass: true,
                counts_failure: true,
                trips_resource: false,
                trips_global: true,
                notify: true,
            },
            Self::Blocked { .. } => FailurePolicy {
                retry_in_pass: false,
                ends_pass: true,
                counts_failure: false,
                trips_resource: true,
                trips_global: false,
                notify: false,
            },
            Self::LayoutIssue(_) => FailurePolicy {
                retry_in_pass: false,
                ends_pass: false,
                counts_failure: false,
                trips_resource: false,
                trips_global: false,
                notify: false,
            },
            Self::ServiceClosed { .. } | Self::Timeout { .. } | Self::Driver(_) => FailurePolicy {
                retry_in_pass: true,
                ends_pass: false,
                counts_failure: true,
                trips_resource: false,
                trips_global: false,
                notify: false,
            },
            Self::Paused { .. } => FailurePolicy {
                retry_in_pass: false,
                ends_pass: true,
                counts_failure: false,
                trips_resource: false,
                trips_global: false,
                notify: false,
            },
        }
    }

    /// Stage label carried by the variant, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::DefensiveSignal { stage }
            | Self::Blocked { stage }
            | Self::ServiceClosed { stage }
            | Self::Timeout { stage }
            | Self::Paused { stage } => Some(stage),
            Self::LayoutIssue(_) | Self::Driver(_) => None,
        }
    }
}

impl From<PageError> for SessionError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::Timeout(stage) => Self::Timeout { stage },
            PageError::NotFound(what) => Self::LayoutIssue(what),
            PageError::Driver(msg) => Self::Driver(msg),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_and_block_differ_in_policy() {
        let challenge = SessionError::DefensiveSignal { stage: "login".into() }.policy();
        let block = SessionError::Blocked { stage: "login".into() }.policy();
        assert!(challenge.ends_pass && block.ends_pass);
        assert!(challenge.trips_global && challenge.notify);
        assert!(!block.trips_global && !block.notify);
        assert!(block.trips_resource);
    }

    #[test]
    fn layout_issue_does_not_touch_health() {
        let policy = SessionError::LayoutIssue("no field".into()).policy();
        assert!(!policy.counts_failure && !policy.trips_resource && !policy.ends_pass);
    }

    #[test]
    fn transient_failures_are_retried_and_counted() {
        for err in [
            SessionError::ServiceClosed { stage: "nav".into() },
            SessionError::Timeout { stage: "idle".into() },
            SessionError::Driver("socket".into()),
        ] {
            let policy = err.policy();
            assert!(policy.retry_in_pass && policy.counts_failure, "{err}");
        }
    }

    #[test]
    fn page_not_found_maps_to_layout_issue() {
        let err: SessionError = PageError::NotFound("#licence".into()).into();
        assert!(matches!(err, SessionError::LayoutIssue(_)));
    }

    #[test]
    fn validation_errors_render_as_breadcrumbs() {
        assert_eq!(JobValidationError::MissingLicence.to_string(), "missing_licence_number");
        assert_eq!(
            JobValidationError::BadBookingReference.to_string(),
            "missing_or_bad_booking_reference"
        );
    }
}
