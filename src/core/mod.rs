//! Engine core: job model, pacing, breaker, sessions, runners and the claim loop.

pub mod assist;
pub mod board;
pub mod claim_loop;
pub mod controls;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod identity;
pub mod job;
pub mod lease;
pub mod notify;
pub mod rate_limiter;
pub mod runner;
pub mod scorer;
pub mod session;
pub mod signals;

pub use assist::{AssistMonitor, AssistSettings};
pub use board::StatusBoard;
pub use claim_loop::{ClaimLoop, ClaimLoopSettings, LoopStats, TickOutcome};
pub use controls::{spawn_controls_watcher, Controls, ControlsSnapshot, PauseGate, StopReason};
pub use coordinator::{Coordinator, RemoteControls, StatusUpdate};
pub use error::{
    AppResult, CoordinatorError, EngineError, FailurePolicy, JobValidationError, PageError,
    SessionError,
};
pub use health::{BreakerSettings, HealthEntry, ResourceHealth, GLOBAL_KEY};
pub use identity::{IdentityGuard, IdentityMutex};
pub use job::{
    Credentials, DateWindow, Job, JobId, JobMode, JobOptions, JobRecord, JobStatus, Lease, Slot,
    TimeWindow, WindowRecord,
};
pub use lease::{stale_event, stale_reclaim};
pub use notify::{DebouncedSink, LinkBuilder, Notification, NotificationKind, NotificationSink};
pub use rate_limiter::{KeyedRateLimiter, RateLimiter};
pub use runner::{JobRunner, PassOutcome, RunnerContext, RunnerOptions, RESUME_EVENT};
pub use scorer::{PriorityScorer, ResourcePlan, ScoreBreakdown, ScoreWeights};
pub use session::{
    AutomationSession, CommitOutcome, FieldKind, Locator, PortalLayout, PortalPage, SessionFactory,
    SessionSettings, SessionState,
};
pub use signals::{Signal, SignalDetector, SignalMarkers};
